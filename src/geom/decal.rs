//! Static decal patches.
//!
//! Each decal instance carries a position, surface normal, tangent and
//! size.  The patch is a small grid in the decal plane whose samples are
//! projected onto nearby scene geometry with paired rays along both
//! normal directions; samples whose hit surface faces away more than the
//! clipping angle are dropped.  When nothing is hit the decal falls back
//! to a flat half-size quad nudged off the surface.

use glam::{Vec2, Vec3};

use super::bvh::SceneRaycaster;
use crate::formats::decal::DecalInstance;
use crate::mesh::MeshBuffer;
use crate::sjson::Value;

const FALLBACK_NUDGE: f32 = 0.002;

/// A `DecalData` definition from the level's managed decal records.
#[derive(Debug, Clone, PartialEq)]
pub struct DecalDef {
    pub name: String,
    pub material: Option<String>,
    pub size: f32,
    pub tex_rows: u32,
    pub tex_cols: u32,
    pub texture_coords: Vec<[f32; 4]>,
    pub clipping_angle: f32,
}

impl Default for DecalDef {
    fn default() -> Self {
        Self {
            name: String::new(),
            material: None,
            size: 1.0,
            tex_rows: 1,
            tex_cols: 1,
            texture_coords: Vec::new(),
            clipping_angle: 89.0,
        }
    }
}

impl DecalDef {
    pub fn from_record(name: &str, rec: &Value) -> Self {
        let int_field = |key: &str| {
            rec.get(key)
                .and_then(Value::as_f64)
                .map(|v| v.max(0.0) as u32)
                .filter(|v| *v > 0)
        };
        let coords = rec
            .get("textureCoords")
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| {
                        let f = row.to_float_list();
                        if f.len() >= 4 {
                            Some([f[0] as f32, f[1] as f32, f[2] as f32, f[3] as f32])
                        } else {
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self {
            name: name.to_string(),
            material: rec
                .get("material")
                .and_then(Value::as_str)
                .map(str::to_string),
            size: rec
                .get("size")
                .and_then(Value::as_f32)
                .filter(|s| *s > 0.0)
                .unwrap_or(1.0),
            tex_rows: int_field("texRows").unwrap_or(1),
            tex_cols: int_field("texCols").unwrap_or(1),
            texture_coords: coords,
            clipping_angle: rec
                .get("clippingAngle")
                .and_then(Value::as_f32)
                .unwrap_or(89.0),
        }
    }

    /// UV sub-rects `(u0, v0, du, dv)`: explicit coordinates win,
    /// otherwise a rows x cols atlas grid where rows divide V and cols
    /// divide U, enumerated row-major.
    pub fn uv_rects(&self) -> Vec<[f32; 4]> {
        if !self.texture_coords.is_empty() {
            return self.texture_coords.clone();
        }
        if self.tex_rows <= 1 && self.tex_cols <= 1 {
            return vec![[0.0, 0.0, 1.0, 1.0]];
        }
        let du = 1.0 / self.tex_cols.max(1) as f32;
        let dv = 1.0 / self.tex_rows.max(1) as f32;
        let mut rects = Vec::with_capacity((self.tex_rows * self.tex_cols) as usize);
        for row in 0..self.tex_rows {
            for col in 0..self.tex_cols {
                rects.push([du * col as f32, dv * row as f32, du, dv]);
            }
        }
        rects
    }
}

/// Sample grid resolution by decal size: small decals get finer grids.
fn adaptive_grid_res(size: f32) -> usize {
    if size <= 2.0 {
        10
    } else if size <= 6.0 {
        8
    } else if size <= 15.0 {
        6
    } else if size <= 30.0 {
        5
    } else {
        4
    }
}

/// In-plane basis for a decal: tangent, bitangent (normal x tangent),
/// normal.
fn decal_basis(instance: &DecalInstance) -> (Vec3, Vec3, Vec3) {
    let n = instance.normal.normalize_or_zero();
    let n = if n == Vec3::ZERO { Vec3::Z } else { n };
    let t = instance.tangent.normalize_or_zero();
    let t = if t == Vec3::ZERO {
        super::spline::any_orthogonal(n)
    } else {
        t
    };
    let f = n.cross(t).normalize_or_zero();
    (t, f, n)
}

fn rect_for(rects: &[[f32; 4]], rect_index: i32) -> [f32; 4] {
    let max = rects.len().saturating_sub(1);
    rects[(rect_index.max(0) as usize).min(max)]
}

/// Builds one decal patch; never returns an empty mesh.
pub fn build_decal_patch(
    def: &DecalDef,
    instance: &DecalInstance,
    scene: &SceneRaycaster,
) -> MeshBuffer {
    let rects = def.uv_rects();
    let rect = rect_for(&rects, instance.rect_index);
    let size = if instance.size > 0.0 {
        instance.size
    } else {
        def.size
    };
    if let Some(mesh) = clipped_patch(def, instance, rect, size, scene) {
        mesh
    } else {
        fallback_quad(def, instance, rect, size)
    }
}

fn clipped_patch(
    def: &DecalDef,
    instance: &DecalInstance,
    rect: [f32; 4],
    size: f32,
    scene: &SceneRaycaster,
) -> Option<MeshBuffer> {
    if scene.is_empty() {
        return None;
    }
    let (t, f, n) = decal_basis(instance);
    let [u0, v0, du, dv] = rect;
    let grid = adaptive_grid_res(size);
    let cos_threshold = def.clipping_angle.to_radians().cos();
    let reach = size * 0.6 + 0.01;

    // Sample hit position and UV per grid point; misses stay None.
    let mut samples: Vec<Option<(Vec3, Vec2)>> = Vec::with_capacity((grid + 1) * (grid + 1));
    for j in 0..=grid {
        let v_fac = j as f32 / grid as f32;
        let y = v_fac - 0.5;
        for i in 0..=grid {
            let u_fac = i as f32 / grid as f32;
            let x = u_fac - 0.5;
            let world = instance.position + (t * x + f * y) * size;

            let above = scene.raycast(world + n * reach, -n, reach);
            let below = scene.raycast(world - n * reach, n, reach);
            let hit = match (above, below) {
                (Some(a), Some(b)) => Some(if a.distance <= b.distance { a } else { b }),
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (None, None) => None,
            };
            let sample = hit.and_then(|hit| {
                if n.dot(hit.normal) < cos_threshold {
                    return None;
                }
                let uv = Vec2::new(u0 + du * u_fac, 1.0 - (v0 + dv * v_fac));
                Some((hit.position, uv))
            });
            samples.push(sample);
        }
    }

    let mut mesh = MeshBuffer::default();
    if let Some(material) = def.material.as_deref().or(Some(&def.name)) {
        mesh.materials.push(material.to_string());
    }
    let at = |i: usize, j: usize| samples[j * (grid + 1) + i];
    for j in 0..grid {
        for i in 0..grid {
            let (s00, s10, s01, s11) = (at(i, j), at(i + 1, j), at(i, j + 1), at(i + 1, j + 1));
            if let (Some(a), Some(b), Some(c)) = (s00, s10, s11) {
                let base = mesh.push_vertex(a.0, a.1);
                mesh.push_vertex(b.0, b.1);
                mesh.push_vertex(c.0, c.1);
                mesh.push_tri([base, base + 1, base + 2], 0);
            }
            if let (Some(a), Some(b), Some(c)) = (s00, s11, s01) {
                let base = mesh.push_vertex(a.0, a.1);
                mesh.push_vertex(b.0, b.1);
                mesh.push_vertex(c.0, c.1);
                mesh.push_tri([base, base + 1, base + 2], 0);
            }
        }
    }
    if mesh.is_empty() {
        None
    } else {
        Some(mesh)
    }
}

/// Flat quad at half the decal scale, lifted slightly off the surface.
fn fallback_quad(def: &DecalDef, instance: &DecalInstance, rect: [f32; 4], size: f32) -> MeshBuffer {
    let (t, f, n) = decal_basis(instance);
    let [u0, v0, du, dv] = rect;
    let v0 = 1.0 - (v0 + dv);
    let center = instance.position + n * FALLBACK_NUDGE;
    let half = size * 0.5;

    let mut mesh = MeshBuffer::default();
    if let Some(material) = def.material.as_deref().or(Some(&def.name)) {
        mesh.materials.push(material.to_string());
    }
    let corners = [
        (-1.0f32, -1.0f32, u0, v0),
        (1.0, -1.0, u0 + du, v0),
        (1.0, 1.0, u0 + du, v0 + dv),
        (-1.0, 1.0, u0, v0 + dv),
    ];
    for (x, y, u, v) in corners {
        mesh.push_vertex(center + (t * x + f * y) * half, Vec2::new(u, v));
    }
    mesh.push_quad([0, 1, 2, 3], 0);
    mesh
}
