//! Mesh road extrusion.
//!
//! A mesh road is a solid body: the node spline is resampled with
//! break-angle decimation, a frame is built per row from the node
//! normals, and the cross section (top grid, bottom strip, two walls
//! and two end caps) is extruded along it.  Material slot 0 is the top,
//! 1 the bottom, 2 the sides and caps.

use glam::{Vec2, Vec3};

use super::spline;
use crate::mesh::MeshBuffer;
use crate::records::MeshRoad;

/// Minimum resample segment length in meters.
const MIN_SEGMENT: f32 = 1.0;

struct RowSamples {
    pos: Vec<Vec3>,
    width: Vec<f32>,
    depth: Vec<f32>,
    normal: Vec<Vec3>,
}

/// Resamples the spline at roughly one-meter steps, then keeps only the
/// samples where the direction turns more than the break angle (segment
/// ends always survive).  The first node seeds the row list.
fn decimate(road: &MeshRoad) -> RowSamples {
    let p: Vec<Vec3> = road.nodes.iter().map(|n| n.pos).collect();
    let w: Vec<f32> = road.nodes.iter().map(|n| n.width).collect();
    let d: Vec<f32> = road.nodes.iter().map(|n| n.depth).collect();
    let n: Vec<Vec3> = road.nodes.iter().map(|n| n.normal).collect();
    let count = p.len();

    let mut rows = RowSamples {
        pos: vec![p[0]],
        width: vec![w[0]],
        depth: vec![d[0]],
        normal: vec![n[0]],
    };
    let mut last_break_pos = p[0];
    let mut last_break_dir: Option<Vec3> = None;

    for i in 1..count {
        let (n1, n2, n3, n4) = spline::segment_ids(i as i64 - 1, count, false);
        let chord = (p[i] - p[i - 1]).length();
        let steps = (chord / MIN_SEGMENT).ceil().max(1.0) as usize;
        for s in 0..steps {
            let t = (s + 1) as f32 / steps as f32;
            let pos = spline::catmull_rom(p[n1], p[n2], p[n3], p[n4], t);
            let wid = spline::smooth_cubic_f32(w[n1], w[n2], w[n3], w[n4], 0.5, t);
            let dep = spline::smooth_cubic_f32(d[n1], d[n2], d[n3], d[n4], 0.5, t);
            let mut nor = spline::catmull_rom(n[n1], n[n2], n[n3], n[n4], t);
            if nor.length_squared() == 0.0 {
                nor = Vec3::Z;
            }
            let nor = nor.normalize();

            let to_vec = pos - last_break_pos;
            if to_vec.length() <= 1e-6 {
                continue;
            }
            let to_dir = to_vec.normalize();
            let add = match last_break_dir {
                None => true,
                Some(prev) => {
                    let angle = to_dir.dot(prev).clamp(-1.0, 1.0).acos().to_degrees();
                    angle > road.break_angle || s == steps - 1
                }
            };
            if add {
                rows.pos.push(pos);
                rows.width.push(wid);
                rows.depth.push(dep);
                rows.normal.push(nor);
                last_break_pos = pos;
                last_break_dir = Some(to_dir);
            }
        }
    }
    rows
}

/// Builds the extruded road body.  Returns `None` when decimation leaves
/// fewer than two rows.
pub fn build_mesh_road(road: &MeshRoad) -> Option<MeshBuffer> {
    let rows = decimate(road);
    let count = rows.pos.len();
    if count < 2 {
        return None;
    }

    // Per-row frame: right from forward x up-normal, forward re-squared.
    let mut right = Vec::with_capacity(count);
    for j in 0..count {
        let fv = spline::row_forward(&rows.pos, j);
        let up = rows.normal[j];
        let rv = {
            let rv = fv.cross(up);
            if rv.length_squared() == 0.0 {
                spline::any_orthogonal(up)
            } else {
                rv.normalize()
            }
        };
        right.push(rv);
    }

    // Cross-section corners: top left/right, bottom left/right.
    let mut top_left = Vec::with_capacity(count);
    let mut top_right = Vec::with_capacity(count);
    let mut bot_left = Vec::with_capacity(count);
    let mut bot_right = Vec::with_capacity(count);
    for j in 0..count {
        let half = rows.width[j] * 0.5;
        let left = rows.pos[j] - right[j] * half;
        let r = rows.pos[j] + right[j] * half;
        top_left.push(left);
        top_right.push(r);
        bot_left.push(left - rows.normal[j] * rows.depth[j]);
        bot_right.push(r - rows.normal[j] * rows.depth[j]);
    }

    let mut v_rows = vec![0.0f32];
    for j in 1..count {
        let d = (rows.pos[j] - rows.pos[j - 1]).length() / road.texture_length.max(1e-6);
        v_rows.push(v_rows[j - 1] + d);
    }

    let mut mesh = MeshBuffer::default();
    let slots = [
        road.top_material.as_deref(),
        road.bottom_material.as_deref(),
        road.side_material.as_deref(),
    ];
    let fallback = slots.iter().flatten().next().copied();
    for slot in slots {
        if let Some(name) = slot.or(fallback) {
            mesh.materials.push(name.to_string());
        }
    }
    let material_count = mesh.materials.len();
    let slot = move |want: u32| want.min(material_count.saturating_sub(1) as u32);

    // Top grid: U runs 1 -> 0 across the width.
    let subdiv = road.width_subdivisions as usize;
    let cols_top = subdiv + 2;
    for j in 0..count {
        let v = v_rows[j];
        mesh.push_vertex(top_left[j], Vec2::new(1.0, v));
        for d_i in 0..subdiv {
            let t = (d_i + 1) as f32 / (subdiv + 1) as f32;
            mesh.push_vertex(top_left[j].lerp(top_right[j], t), Vec2::new(1.0 - t, v));
        }
        mesh.push_vertex(top_right[j], Vec2::new(0.0, v));
    }
    let top_idx = |r: usize, c: usize| (r * cols_top + c) as u32;
    for j in 0..count - 1 {
        for c in 0..cols_top - 1 {
            mesh.push_quad(
                [
                    top_idx(j, c),
                    top_idx(j, c + 1),
                    top_idx(j + 1, c + 1),
                    top_idx(j + 1, c),
                ],
                slot(0),
            );
        }
    }

    let base_bottom = mesh.positions.len() as u32;
    for j in 0..count {
        let v = v_rows[j];
        mesh.push_vertex(bot_right[j], Vec2::new(0.0, v));
        mesh.push_vertex(bot_left[j], Vec2::new(1.0, v));
    }
    let bot_idx = |r: usize, c: usize| base_bottom + (r * 2 + c) as u32;
    for j in 0..count - 1 {
        mesh.push_quad(
            [bot_idx(j, 0), bot_idx(j, 1), bot_idx(j + 1, 1), bot_idx(j + 1, 0)],
            slot(1),
        );
    }

    let base_left = mesh.positions.len() as u32;
    for j in 0..count {
        let v = v_rows[j];
        mesh.push_vertex(top_left[j], Vec2::new(1.0, v));
        mesh.push_vertex(bot_left[j], Vec2::new(0.0, v));
    }
    let left_idx = |r: usize, c: usize| base_left + (r * 2 + c) as u32;
    for j in 0..count - 1 {
        mesh.push_quad(
            [left_idx(j, 0), left_idx(j, 1), left_idx(j + 1, 1), left_idx(j + 1, 0)],
            slot(2),
        );
    }

    let base_right = mesh.positions.len() as u32;
    for j in 0..count {
        let v = v_rows[j];
        mesh.push_vertex(top_right[j], Vec2::new(1.0, v));
        mesh.push_vertex(bot_right[j], Vec2::new(0.0, v));
    }
    let right_idx = |r: usize, c: usize| base_right + (r * 2 + c) as u32;
    for j in 0..count - 1 {
        mesh.push_quad(
            [right_idx(j, 0), right_idx(j, 1), right_idx(j + 1, 1), right_idx(j + 1, 0)],
            slot(2),
        );
    }

    // End caps.
    mesh.push_quad(
        [top_idx(0, 0), top_idx(0, cols_top - 1), bot_idx(0, 1), bot_idx(0, 0)],
        slot(2),
    );
    let lr = count - 1;
    mesh.push_quad(
        [top_idx(lr, 0), bot_idx(lr, 0), bot_idx(lr, 1), top_idx(lr, cols_top - 1)],
        slot(2),
    );
    Some(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sjson::decode;

    fn straight_road(extra: &str) -> MeshRoad {
        let rec = decode(&format!(
            r#"{{name = mr,
                nodes = [[0, 0, 0, 8, 2, 0, 0, 1], [20, 0, 0, 8, 2, 0, 0, 1]],
                topMaterial = top, bottomMaterial = bottom, sideMaterial = side{extra}}}"#
        ))
        .unwrap();
        MeshRoad::from_record(&rec).unwrap()
    }

    #[test]
    fn straight_segment_decimates_to_endpoints() {
        let road = straight_road("");
        let rows = decimate(&road);
        // Collinear interior samples are dropped; only the seeded first
        // node, the first sample, and the segment end remain.
        assert!(rows.pos.len() <= 3);
        assert_eq!(rows.pos[0], Vec3::ZERO);
        assert!((rows.pos.last().unwrap().x - 20.0).abs() < 1e-4);
    }

    #[test]
    fn bend_sharper_than_break_angle_keeps_samples() {
        let rec = decode(
            r#"{nodes = [[0, 0, 0, 8, 2, 0, 0, 1], [20, 0, 0, 8, 2, 0, 0, 1],
                         [20, 20, 0, 8, 2, 0, 0, 1]], breakAngle = 3}"#,
        )
        .unwrap();
        let bend = MeshRoad::from_record(&rec).unwrap();
        let bend_rows = decimate(&bend).pos.len();
        let straight_rows = decimate(&straight_road("")).pos.len();
        assert!(bend_rows > straight_rows);
    }

    #[test]
    fn body_has_all_five_surfaces() {
        let road = straight_road("");
        let mesh = build_mesh_road(&road).unwrap();
        let rows = decimate(&road).pos.len();
        let cols_top = road.width_subdivisions as usize + 2;
        let expected =
            (rows - 1) * (cols_top - 1) + (rows - 1) * 3 + 2;
        assert_eq!(mesh.faces.len(), expected);
        assert_eq!(mesh.materials, vec!["top", "bottom", "side"]);
        assert_eq!(mesh.material_indices.len(), mesh.faces.len());
        // Caps and walls land in slot 2.
        assert_eq!(*mesh.material_indices.last().unwrap(), 2);
    }

    #[test]
    fn depth_extrudes_downward() {
        let road = straight_road("");
        let mesh = build_mesh_road(&road).unwrap();
        let min_z = mesh.positions.iter().map(|p| p.z).fold(f32::INFINITY, f32::min);
        let max_z = mesh.positions.iter().map(|p| p.z).fold(f32::NEG_INFINITY, f32::max);
        assert!((max_z - 0.0).abs() < 1e-4);
        assert!((min_z + 2.0).abs() < 1e-4);
    }

    #[test]
    fn width_subdivisions_add_top_columns() {
        let plain = build_mesh_road(&straight_road("")).unwrap();
        let subdivided = build_mesh_road(&straight_road(", widthSubdivisions = 3")).unwrap();
        assert!(subdivided.positions.len() > plain.positions.len());
    }

    #[test]
    fn missing_slots_fall_back_to_first_material() {
        let rec = decode(
            r#"{nodes = [[0, 0, 0, 8, 2, 0, 0, 1], [20, 0, 0, 8, 2, 0, 0, 1]],
                topMaterial = only_top}"#,
        )
        .unwrap();
        let road = MeshRoad::from_record(&rec).unwrap();
        let mesh = build_mesh_road(&road).unwrap();
        assert_eq!(mesh.materials, vec!["only_top", "only_top", "only_top"]);
    }
}
