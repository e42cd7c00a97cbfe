//! Spline evaluation shared by the road and river generators.

use glam::Vec3;

/// Node index quadruple for segment `i` of a spline with `count` nodes.
/// Looped splines wrap; open splines clamp at the ends.
pub fn segment_ids(i: i64, count: usize, looped: bool) -> (usize, usize, usize, usize) {
    let n = count as i64;
    if looped {
        let wrap = |k: i64| ((k % n + n) % n) as usize;
        (wrap(i - 1), wrap(i), wrap(i + 1), wrap(i + 2))
    } else {
        let clamp = |k: i64| k.clamp(0, n - 1) as usize;
        (clamp(i - 1), clamp(i), clamp(i + 1), clamp(i + 2))
    }
}

/// Standard Catmull-Rom with tension 0.5.
pub fn catmull_rom(a0: Vec3, a1: Vec3, a2: Vec3, a3: Vec3, t: f32) -> Vec3 {
    0.5 * ((2.0 * a1)
        + (a2 - a0) * t
        + (2.0 * a0 - 5.0 * a1 + 4.0 * a2 - a3) * (t * t)
        + (3.0 * a1 - a0 - 3.0 * a2 + a3) * (t * t * t))
}

/// Cubic with an adjustable smoothness parameter, the curve decal roads
/// use.  At `s = 0.5` this matches [`catmull_rom`].
pub fn smooth_cubic(p1: Vec3, p2: Vec3, p3: Vec3, p4: Vec3, s: f32, t: f32) -> Vec3 {
    let c0 = p2;
    let c1 = s * (p3 - p1);
    let c2 = 2.0 * s * p1 + (s - 3.0) * p2 + (3.0 - 2.0 * s) * p3 - s * p4;
    let c3 = -s * p1 + (2.0 - s) * p2 + (s - 2.0) * p3 + s * p4;
    c0 + c1 * t + c2 * (t * t) + c3 * (t * t * t)
}

/// Scalar variant of [`smooth_cubic`], used for interpolated widths.
pub fn smooth_cubic_f32(w0: f32, w1: f32, w2: f32, w3: f32, s: f32, t: f32) -> f32 {
    let c0 = w1;
    let c1 = s * (w2 - w0);
    let c2 = 2.0 * s * w0 + (s - 3.0) * w1 + (3.0 - 2.0 * s) * w2 - s * w3;
    let c3 = -s * w0 + (2.0 - s) * w1 + (s - 2.0) * w2 + s * w3;
    c0 + c1 * t + c2 * (t * t) + c3 * (t * t * t)
}

/// Any unit vector perpendicular to `v`.
pub fn any_orthogonal(v: Vec3) -> Vec3 {
    let other = if v.x.abs() < 0.9 { Vec3::X } else { Vec3::Y };
    v.cross(other).normalize_or_zero()
}

/// Forward direction per sample row by central difference, one-sided at
/// the ends.  Degenerate rows fall back to +X.
pub fn row_forward(points: &[Vec3], j: usize) -> Vec3 {
    let rows = points.len();
    let fwd = if j == 0 {
        points[1] - points[0]
    } else if j == rows - 1 {
        points[rows - 1] - points[rows - 2]
    } else {
        points[j + 1] - points[j - 1]
    };
    let fwd = fwd.normalize_or_zero();
    if fwd == Vec3::ZERO {
        Vec3::X
    } else {
        fwd
    }
}

/// Right vector for a row: forward crossed with world up, with a fallback
/// for vertical forwards.
pub fn row_right(fwd: Vec3) -> Vec3 {
    let rvec = fwd.cross(Vec3::Z);
    if rvec.length_squared() == 0.0 {
        any_orthogonal(Vec3::Z)
    } else {
        rvec.normalize()
    }
}
