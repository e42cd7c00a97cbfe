//! River ribbons: a two-column quad strip along a Catmull-Rom spline,
//! with both edges dropped onto the scene where a downward ray hits.

use glam::{Vec2, Vec3};

use super::bvh::SceneRaycaster;
use super::spline;
use crate::mesh::MeshBuffer;
use crate::records::River;

const RAY_DOWN_MAX: f32 = 5000.0;
const DECAL_BIAS: f32 = 0.01;

fn sample_spline(river: &River) -> (Vec<Vec3>, Vec<f32>) {
    let p: Vec<Vec3> = river.nodes.iter().map(|n| n.pos).collect();
    let w: Vec<f32> = river.nodes.iter().map(|n| n.width).collect();
    let count = p.len();

    let mut out_pos = Vec::new();
    let mut out_w = Vec::new();
    for i in 0..count - 1 {
        // Clamped endpoints instead of wraparound.
        let p0 = if i >= 1 { p[i - 1] } else { p[i] };
        let p3 = if i + 2 < count { p[i + 2] } else { p[i + 1] };
        let w0 = if i >= 1 { w[i - 1] } else { w[i] };
        let w3 = if i + 2 < count { w[i + 2] } else { w[i + 1] };
        let chord = (p[i + 1] - p[i]).length();
        let steps = (chord / river.subdivide_length).ceil().max(1.0) as usize;
        for s in 0..=steps {
            if i > 0 && s == 0 {
                continue;
            }
            let t = s as f32 / steps as f32;
            out_pos.push(spline::catmull_rom(p0, p[i], p[i + 1], p3, t));
            out_w.push(spline::smooth_cubic_f32(w0, w[i], w[i + 1], w3, 0.5, t));
        }
    }
    (out_pos, out_w)
}

/// Builds the water surface strip.  Returns `None` when sampling yields
/// fewer than two rows.
pub fn build_river(river: &River, scene: &SceneRaycaster) -> Option<MeshBuffer> {
    let (samples, widths) = sample_spline(river);
    let rows = samples.len();
    if rows < 2 {
        return None;
    }

    let mut mesh = MeshBuffer::default();
    for j in 0..rows {
        let rvec = spline::row_right(spline::row_forward(&samples, j));
        let half = widths[j] * 0.5;
        let mut left = samples[j] - rvec * half;
        let mut right = samples[j] + rvec * half;
        if let Some(z) = scene.ground_height(left + Vec3::Z, RAY_DOWN_MAX, true) {
            left.z = z + DECAL_BIAS;
        }
        if let Some(z) = scene.ground_height(right + Vec3::Z, RAY_DOWN_MAX, true) {
            right.z = z + DECAL_BIAS;
        }
        let v = j as f32 / (rows - 1) as f32;
        mesh.push_vertex(left, Vec2::new(0.0, v));
        mesh.push_vertex(right, Vec2::new(1.0, v));
    }
    for j in 0..rows as u32 - 1 {
        let a = 2 * j;
        mesh.push_quad([a, a + 1, a + 3, a + 2], 0);
    }
    Some(mesh)
}
