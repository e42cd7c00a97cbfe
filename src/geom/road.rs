//! Decal road ribbons.
//!
//! A decal road is a flat quad strip draped over the scene: the node
//! spline is sampled at a detail-controlled density, each sample row is
//! swept sideways to the road width, and every column is dropped onto
//! the ground by a downward raycast.  Render priority turns into a tiny
//! vertical offset so overlapping roads stack deterministically.

use glam::{Vec2, Vec3};

use super::bvh::SceneRaycaster;
use super::spline;
use crate::mesh::MeshBuffer;
use crate::records::DecalRoad;

#[derive(Debug, Clone, Copy)]
pub struct RibbonOptions {
    pub priority_step: f32,
    pub priority_base: f32,
    pub width_segments: u32,
    pub up_clearance: f32,
    pub max_down: f32,
    pub surface_bias: f32,
}

impl Default for RibbonOptions {
    fn default() -> Self {
        Self {
            priority_step: 0.002,
            priority_base: 0.0,
            width_segments: 8,
            up_clearance: 50.0,
            max_down: 20_000.0,
            surface_bias: 0.03,
        }
    }
}

/// Samples the road spline into center positions and widths.
fn sample_spline(road: &DecalRoad) -> (Vec<Vec3>, Vec<f32>) {
    let positions: Vec<Vec3> = road.nodes.iter().map(|n| n.pos).collect();
    let widths: Vec<f32> = road.nodes.iter().map(|n| n.width).collect();
    let ncnt = positions.len();
    let steps_per = ((1.0 / road.detail.max(0.01)) as usize + 1).max(1);

    let mut out_pos = Vec::new();
    let mut out_w = Vec::new();
    if road.improved_spline {
        let i_end = if road.looped { ncnt - 1 } else { ncnt - 2 };
        for i in 0..=i_end {
            let (n1, n2, n3, n4) = spline::segment_ids(i as i64, ncnt, road.looped);
            let extra = usize::from(i == i_end);
            for s in 0..steps_per + extra {
                if i > 0 && s == 0 {
                    continue;
                }
                let t = s as f32 / steps_per as f32;
                out_pos.push(spline::smooth_cubic(
                    positions[n1],
                    positions[n2],
                    positions[n3],
                    positions[n4],
                    road.smoothness,
                    t,
                ));
                out_w.push(spline::smooth_cubic_f32(
                    widths[n1],
                    widths[n2],
                    widths[n3],
                    widths[n4],
                    road.smoothness,
                    t,
                ));
            }
        }
    } else {
        for i in 0..ncnt - 1 {
            let extra = usize::from(i == ncnt - 2);
            for s in 0..steps_per + extra {
                if i > 0 && s == 0 {
                    continue;
                }
                let t = s as f32 / steps_per as f32;
                out_pos.push(positions[i].lerp(positions[i + 1], t));
                out_w.push((1.0 - t) * widths[i] + t * widths[i + 1]);
            }
        }
    }
    (out_pos, out_w)
}

/// Nearest-neighbor hole fill along a sample row: forward pass, then
/// backward pass for leading holes.
fn fill_row_holes(row: &mut [Option<f32>]) {
    let mut last = None;
    for z in row.iter_mut() {
        match z {
            Some(v) => last = Some(*v),
            None => *z = last,
        }
    }
    let mut last = None;
    for z in row.iter_mut().rev() {
        match z {
            Some(v) => last = Some(*v),
            None => *z = last,
        }
    }
}

/// Builds the draped ribbon mesh for a decal road.  Returns `None` when
/// sampling degenerates to fewer than two rows.
pub fn build_decal_road(
    road: &DecalRoad,
    scene: &SceneRaycaster,
    options: &RibbonOptions,
) -> Option<MeshBuffer> {
    let (samples, widths) = sample_spline(road);
    let rows = samples.len();
    if rows < 2 {
        return None;
    }

    // Arc-length V coordinate in texture lengths.
    let mut v_acc = vec![0.0f32];
    for j in 1..rows {
        let d = (samples[j] - samples[j - 1]).length() / road.texture_length.max(1e-6);
        v_acc.push(v_acc[j - 1] + d);
    }

    let cols = options.width_segments.max(2) as usize;
    let layer_offset = options.priority_base + road.render_priority * options.priority_step;
    let lift = road.decal_bias + layer_offset + options.surface_bias;

    let mut mesh = MeshBuffer::default();
    if let Some(material) = &road.material {
        mesh.materials.push(material.clone());
    }

    for j in 0..rows {
        let center = samples[j];
        let rvec = spline::row_right(spline::row_forward(&samples, j));

        let mut row_xy = Vec::with_capacity(cols + 1);
        let mut z_row: Vec<Option<f32>> = Vec::with_capacity(cols + 1);
        for c in 0..=cols {
            let u_norm = c as f32 / cols as f32;
            let lateral = (u_norm - 0.5) * widths[j];
            let p = center + rvec * lateral;
            row_xy.push((u_norm, p.x, p.y));
            let origin = Vec3::new(p.x, p.y, p.z + options.up_clearance);
            z_row.push(scene.ground_height(
                origin,
                options.max_down + options.up_clearance,
                road.over_objects,
            ));
        }
        fill_row_holes(&mut z_row);

        for (&(u_norm, px, py), z) in row_xy.iter().zip(&z_row) {
            let z = z.unwrap_or(center.z) + lift;
            mesh.push_vertex(Vec3::new(px, py, z), Vec2::new(u_norm, v_acc[j]));
        }
    }

    let vidx = |r: usize, c: usize| (r * (cols + 1) + c) as u32;
    for r in 0..rows - 1 {
        for c in 0..cols {
            mesh.push_quad(
                [vidx(r, c), vidx(r, c + 1), vidx(r + 1, c + 1), vidx(r + 1, c)],
                0,
            );
        }
    }
    if road.looped && rows > 2 {
        let r = rows - 1;
        for c in 0..cols {
            mesh.push_quad([vidx(r, c), vidx(r, c + 1), vidx(0, c + 1), vidx(0, c)], 0);
        }
    }
    Some(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::Face;
    use crate::sjson::decode;

    fn flat_scene(z: f32) -> SceneRaycaster {
        let mut ground = MeshBuffer::default();
        for p in [
            Vec3::new(-100.0, -100.0, z),
            Vec3::new(100.0, -100.0, z),
            Vec3::new(100.0, 100.0, z),
            Vec3::new(-100.0, 100.0, z),
        ] {
            ground.push_vertex(p, Vec2::ZERO);
        }
        ground.faces.push(Face::Quad([0, 1, 2, 3]));
        ground.material_indices.push(0);
        let mut scene = SceneRaycaster::new();
        scene.add_terrain(&ground);
        scene
    }

    fn straight_road(extra: &str) -> DecalRoad {
        let rec = decode(&format!(
            r#"{{name = road, material = asphalt,
                nodes = ["0 0 5 4", "10 0 5 4", "20 0 5 4"]{extra}}}"#
        ))
        .unwrap();
        DecalRoad::from_record(&rec).unwrap()
    }

    #[test]
    fn every_row_has_width_segments_plus_one_vertices() {
        let road = straight_road("");
        let mesh = build_decal_road(&road, &flat_scene(0.0), &RibbonOptions::default()).unwrap();
        assert_eq!(mesh.positions.len() % 9, 0);
        let rows = mesh.positions.len() / 9;
        assert!(rows >= 2);
        assert_eq!(mesh.faces.len(), (rows - 1) * 8);
    }

    #[test]
    fn v_coordinate_grows_monotonically() {
        let road = straight_road("");
        let mesh = build_decal_road(&road, &flat_scene(0.0), &RibbonOptions::default()).unwrap();
        let rows = mesh.positions.len() / 9;
        let mut last = f32::NEG_INFINITY;
        for r in 0..rows {
            let v = mesh.uvs[r * 9].y;
            assert!(v >= last);
            last = v;
        }
        assert!(mesh.uvs.last().unwrap().y > 0.0);
    }

    #[test]
    fn vertices_drop_to_ground_with_bias() {
        let road = straight_road("");
        let options = RibbonOptions::default();
        let mesh = build_decal_road(&road, &flat_scene(1.0), &options).unwrap();
        let expected = 1.0 + road.decal_bias + road.render_priority * options.priority_step
            + options.surface_bias;
        for p in &mesh.positions {
            assert!((p.z - expected).abs() < 1e-4, "z = {}", p.z);
        }
    }

    #[test]
    fn missed_rays_fall_back_to_spline_height() {
        let road = straight_road("");
        let mesh =
            build_decal_road(&road, &SceneRaycaster::new(), &RibbonOptions::default()).unwrap();
        assert!(mesh.positions.iter().all(|p| p.z > 5.0));
    }

    #[test]
    fn looped_road_adds_closure_row() {
        let rec = decode(
            r#"{nodes = ["0 0 0 4", "10 0 0 4", "10 10 0 4", "0 10 0 4"], looped = true}"#,
        )
        .unwrap();
        let road = DecalRoad::from_record(&rec).unwrap();
        let open = DecalRoad {
            looped: false,
            ..road.clone()
        };
        let scene = flat_scene(0.0);
        let options = RibbonOptions::default();
        let looped_mesh = build_decal_road(&road, &scene, &options).unwrap();
        let open_mesh = build_decal_road(&open, &scene, &options).unwrap();
        // The looped version spans one more segment and closes back to row 0.
        assert!(looped_mesh.faces.len() > open_mesh.faces.len());
    }

    #[test]
    fn detail_controls_sample_density() {
        let coarse = DecalRoad {
            detail: 1.0,
            ..straight_road("")
        };
        let fine = DecalRoad {
            detail: 0.05,
            ..straight_road("")
        };
        let scene = flat_scene(0.0);
        let options = RibbonOptions::default();
        let coarse_mesh = build_decal_road(&coarse, &scene, &options).unwrap();
        let fine_mesh = build_decal_road(&fine, &scene, &options).unwrap();
        assert!(fine_mesh.positions.len() > coarse_mesh.positions.len());
        assert!(coarse_mesh.positions.len() / 9 >= 2);
    }
}
