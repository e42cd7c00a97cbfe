//! Heightfield triangulation.
//!
//! The terrain grid becomes one quad per cell, skipping cells whose
//! corners touch the hole layer.  Per-face materials sample the layer
//! map at the cell center, falling back to the first valid corner the
//! way the engine paints terrain.

use glam::{Vec2, Vec3};

use crate::formats::terrain::{TerrainData, HOLE_LAYER};
use crate::mesh::MeshBuffer;
use crate::records::TerrainBlock;

#[derive(Debug, Clone, Copy)]
pub struct TerrainMeshOptions {
    /// Grid decimation: take every `step`-th sample.
    pub step: usize,
    pub skip_holes: bool,
}

impl Default for TerrainMeshOptions {
    fn default() -> Self {
        Self {
            step: 1,
            skip_holes: true,
        }
    }
}

/// Per-face layer id with the engine's fallback: center sample, else the
/// first valid corner, else layer 0.
fn face_layer(ter: &TerrainData, x0: usize, y0: usize, step: usize, mat_count: usize) -> u32 {
    let size = ter.size;
    let clamp = |v: usize| v.min(size - 1);
    let valid = |id: u8| id != HOLE_LAYER && (id as usize) < mat_count;

    let center = ter.layer(clamp(x0 + step / 2), clamp(y0 + step / 2));
    if valid(center) {
        return center as u32;
    }
    let corners = [
        ter.layer(clamp(x0), clamp(y0)),
        ter.layer(clamp(x0 + step), clamp(y0)),
        ter.layer(clamp(x0 + step), clamp(y0 + step)),
        ter.layer(clamp(x0), clamp(y0 + step)),
    ];
    corners
        .into_iter()
        .find(|id| valid(*id))
        .map(u32::from)
        .unwrap_or(0)
}

/// Triangulates a decoded heightfield into a world-scaled grid mesh.
pub fn build_terrain_mesh(
    ter: &TerrainData,
    block: &TerrainBlock,
    options: &TerrainMeshOptions,
) -> MeshBuffer {
    let mut mesh = MeshBuffer::default();
    let size = ter.size;
    if size < 2 {
        return mesh;
    }
    let step = options.step.max(1);
    let height_scale = TerrainData::height_scale(block.max_height);
    let square = block.square_size;

    // Sampled grid dimensions.
    let sx = (size - 1) / step + 1;
    let sy = (size - 1) / step + 1;
    let world_width = ((size - 1) as f32 * square).max(f32::MIN_POSITIVE);

    for gy in 0..sy {
        for gx in 0..sx {
            let x0 = gx * step;
            let y0 = gy * step;
            let pos = Vec3::new(
                x0 as f32 * square,
                y0 as f32 * square,
                ter.height(x0, y0) as f32 * height_scale,
            );
            let uv = Vec2::new(pos.x / world_width, pos.y / world_width);
            mesh.push_vertex(pos, uv);
        }
    }

    let mat_count = ter.material_names.len();
    mesh.materials = ter.material_names.clone();

    for gy in 0..sy - 1 {
        for gx in 0..sx - 1 {
            let x0 = gx * step;
            let y0 = gy * step;
            if options.skip_holes {
                let corners = [
                    ter.layer(x0, y0),
                    ter.layer((x0 + step).min(size - 1), y0),
                    ter.layer((x0 + step).min(size - 1), (y0 + step).min(size - 1)),
                    ter.layer(x0, (y0 + step).min(size - 1)),
                ];
                if corners.contains(&HOLE_LAYER) {
                    continue;
                }
            }
            let i = (gy * sx + gx) as u32;
            let material = if mat_count > 0 {
                face_layer(ter, x0, y0, step, mat_count)
            } else {
                0
            };
            mesh.push_quad([i, i + 1, i + 1 + sx as u32, i + sx as u32], material);
        }
    }
    mesh
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_terrain(size: usize, height: u16) -> TerrainData {
        TerrainData {
            version: 8,
            size,
            heights: vec![height; size * size],
            layers: vec![0; size * size],
            material_names: vec!["grass".to_string(), "rock".to_string()],
        }
    }

    fn block(square_size: f32, max_height: f32) -> TerrainBlock {
        TerrainBlock {
            name: "terrain".to_string(),
            terrain_file: None,
            square_size,
            max_height,
            position: Vec3::ZERO,
        }
    }

    #[test]
    fn full_grid_has_expected_quads() {
        let ter = flat_terrain(8, 0);
        let mesh = build_terrain_mesh(&ter, &block(2.0, 100.0), &TerrainMeshOptions::default());
        assert_eq!(mesh.positions.len(), 64);
        assert_eq!(mesh.faces.len(), 49);
    }

    #[test]
    fn holes_remove_adjacent_quads() {
        let mut ter = flat_terrain(4, 0);
        // One hole corner invalidates every quad touching it.
        ter.layers[1 * 4 + 1] = HOLE_LAYER;
        let mesh = build_terrain_mesh(&ter, &block(1.0, 100.0), &TerrainMeshOptions::default());
        assert_eq!(mesh.faces.len(), 9 - 4);
    }

    #[test]
    fn height_scaling_matches_engine() {
        // Raw sample 4 with maxHeight 1000 over a 4m grid.
        let mut ter = flat_terrain(4, 0);
        ter.heights[0] = 4;
        let mesh = build_terrain_mesh(&ter, &block(4.0, 1000.0), &TerrainMeshOptions::default());
        assert!((mesh.positions[0].z - 4.0 * (1000.0 / 65536.0)).abs() < 1e-6);
        assert_eq!(mesh.positions[1].x, 4.0);
    }

    #[test]
    fn full_height_range_maps_one_to_one() {
        // maxHeight equal to the u16 range makes the scale exactly 1.
        let mut ter = flat_terrain(4, 0);
        ter.heights[1 * 4 + 2] = 1000;
        let mesh = build_terrain_mesh(&ter, &block(2.0, 65536.0), &TerrainMeshOptions::default());
        assert_eq!(mesh.positions[1 * 4 + 2], Vec3::new(4.0, 2.0, 1000.0));
    }

    #[test]
    fn uvs_normalize_over_world_extent() {
        let ter = flat_terrain(4, 0);
        let mesh = build_terrain_mesh(&ter, &block(2.0, 100.0), &TerrainMeshOptions::default());
        let last = mesh.uvs.last().unwrap();
        assert!((last.x - 1.0).abs() < 1e-6);
        assert!((last.y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn face_materials_sample_cell_layers() {
        let mut ter = flat_terrain(3, 0);
        // With step 1 the center sample is the cell's own corner.
        ter.layers[0] = 1;
        let mesh = build_terrain_mesh(&ter, &block(1.0, 100.0), &TerrainMeshOptions::default());
        assert_eq!(mesh.material_indices[0], 1);
        // An out-of-range center falls back to the first valid corner.
        ter.layers[0] = 7;
        let mesh = build_terrain_mesh(&ter, &block(1.0, 100.0), &TerrainMeshOptions::default());
        assert_eq!(mesh.material_indices[0], 0);
    }

    #[test]
    fn step_decimates_the_grid() {
        let ter = flat_terrain(9, 0);
        let options = TerrainMeshOptions {
            step: 2,
            ..TerrainMeshOptions::default()
        };
        let mesh = build_terrain_mesh(&ter, &block(1.0, 100.0), &options);
        assert_eq!(mesh.positions.len(), 25);
        assert_eq!(mesh.faces.len(), 16);
    }
}
