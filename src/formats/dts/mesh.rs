//! Mesh records inside a packed shape.

use anyhow::{anyhow, Result};
use glam::{Vec2, Vec3};

use super::alloc::TsAlloc;

const TYPE_STRIP: u32 = 1 << 30;
const TYPE_FAN: u32 = 2 << 30;
const TYPE_MASK: u32 = 3 << 30;
const FLAG_INDEXED: u32 = 1 << 29;
const FLAG_NO_MATERIAL: u32 = 1 << 28;
const MATERIAL_MASK: u32 = !(TYPE_MASK | FLAG_INDEXED | FLAG_NO_MATERIAL);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    Triangles,
    Strip,
    Fan,
}

/// One draw batch: a range of `indices` plus material and layout flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawPrimitive {
    pub start: usize,
    pub num_elements: usize,
    pub material_index: u32,
    pub kind: PrimitiveKind,
    pub indexed: bool,
    pub no_material: bool,
}

impl DrawPrimitive {
    fn from_raw(start: i32, num_elements: i32, material_and_flags: i32) -> Self {
        let raw = material_and_flags as u32;
        let kind = match raw & TYPE_MASK {
            TYPE_STRIP => PrimitiveKind::Strip,
            TYPE_FAN => PrimitiveKind::Fan,
            _ => PrimitiveKind::Triangles,
        };
        Self {
            start: start.max(0) as usize,
            num_elements: num_elements.max(0) as usize,
            material_index: raw & MATERIAL_MASK,
            kind,
            indexed: raw & FLAG_INDEXED != 0,
            no_material: raw & FLAG_NO_MATERIAL != 0,
        }
    }
}

/// Skinning arrays carried by skinned meshes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SkinData {
    pub max_bones: i32,
    pub initial_transforms: Vec<[f32; 16]>,
    pub vertex_index: Vec<i32>,
    pub bone_index: Vec<i32>,
    pub weight: Vec<f32>,
    pub node_index: Vec<i32>,
}

/// A geometry-bearing mesh.  Meshes with `parent_mesh >= 0` share their
/// parent's vertex channels, filled in by the shape post-pass.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TsMesh {
    pub num_frames: i32,
    pub num_mat_frames: i32,
    pub parent_mesh: i32,
    pub vertices: Vec<Vec3>,
    pub tverts: Vec<Vec2>,
    pub t2verts: Vec<Vec2>,
    pub colors: Vec<[f32; 4]>,
    pub normals: Vec<Vec3>,
    pub primitives: Vec<DrawPrimitive>,
    pub indices: Vec<u32>,
    pub verts_per_frame: i32,
    pub flags: u32,
    pub skin: Option<SkinData>,
}

/// Mesh slot in the shape's mesh table.
#[derive(Debug, Clone, PartialEq)]
pub enum MeshSlot {
    Null,
    Mesh(TsMesh),
}

impl MeshSlot {
    pub fn as_mesh(&self) -> Option<&TsMesh> {
        match self {
            MeshSlot::Mesh(mesh) => Some(mesh),
            MeshSlot::Null => None,
        }
    }
}

impl TsMesh {
    pub(super) fn assemble(alloc: &mut TsAlloc<'_>, version: u8) -> Result<Self> {
        let mut mesh = TsMesh::default();
        alloc.check_guard()?;
        mesh.num_frames = alloc.read_i32()?;
        mesh.num_mat_frames = alloc.read_i32()?;
        mesh.parent_mesh = alloc.read_i32()?;

        // bounds, center, radius
        alloc.skip32(6 + 3 + 1)?;

        if version >= 27 {
            // vertex-buffer offsets, runtime only
            alloc.skip32(3)?;
        }

        let num_verts = alloc.read_i32()?.max(0) as usize;
        let own_data = mesh.parent_mesh < 0;
        if own_data {
            let buf = alloc.read_f32_list(num_verts * 3)?;
            mesh.vertices = buf
                .chunks_exact(3)
                .map(|c| Vec3::new(c[0], c[1], c[2]))
                .collect();
        }

        let num_tverts = alloc.read_i32()?.max(0) as usize;
        if own_data {
            let buf = alloc.read_f32_list(num_tverts * 2)?;
            mesh.tverts = buf.chunks_exact(2).map(|c| Vec2::new(c[0], c[1])).collect();
        }

        if version > 25 {
            let num_t2verts = alloc.read_i32()?.max(0) as usize;
            if own_data {
                let buf = alloc.read_f32_list(num_t2verts * 2)?;
                mesh.t2verts = buf.chunks_exact(2).map(|c| Vec2::new(c[0], c[1])).collect();
            }
            let num_colors = alloc.read_i32()?.max(0) as usize;
            if own_data {
                // packed ABGR, red in the low byte
                for packed in alloc.read_i32_list(num_colors)? {
                    let p = packed as u32;
                    mesh.colors.push([
                        (p & 0xFF) as f32 / 255.0,
                        ((p >> 8) & 0xFF) as f32 / 255.0,
                        ((p >> 16) & 0xFF) as f32 / 255.0,
                        ((p >> 24) & 0xFF) as f32 / 255.0,
                    ]);
                }
            }
        }

        if own_data {
            let buf = alloc.read_f32_list(num_verts * 3)?;
            mesh.normals = buf
                .chunks_exact(3)
                .map(|c| Vec3::new(c[0], c[1], c[2]))
                .collect();
            if version > 21 {
                // encoded normals
                alloc.skip8(num_verts)?;
            }
        }

        let mut starts = Vec::new();
        let mut elements = Vec::new();
        let mut materials = Vec::new();
        if version > 25 {
            let num_prims = alloc.read_i32()?.max(0) as usize;
            for _ in 0..num_prims {
                starts.push(alloc.read_i32()?);
                elements.push(alloc.read_i32()?);
                materials.push(alloc.read_i32()?);
            }
            let num_indices = alloc.read_i32()?.max(0) as usize;
            mesh.indices = alloc
                .read_i32_list(num_indices)?
                .into_iter()
                .map(|i| i as u32)
                .collect();
        } else {
            let num_prims = alloc.read_i32()?.max(0) as usize;
            for _ in 0..num_prims {
                starts.push(alloc.read_i16()? as i32);
                elements.push(alloc.read_i16()? as i32);
            }
            for _ in 0..num_prims {
                materials.push(alloc.read_i32()?);
            }
            let num_indices = alloc.read_i32()?.max(0) as usize;
            mesh.indices = alloc
                .read_i16_list(num_indices)?
                .into_iter()
                .map(|i| i as u16 as u32)
                .collect();
        }
        for i in 0..starts.len() {
            mesh.primitives
                .push(DrawPrimitive::from_raw(starts[i], elements[i], materials[i]));
        }

        // merge indices, deprecated
        let num_merge = alloc.read_i32()?.max(0) as usize;
        alloc.skip16(num_merge)?;

        mesh.verts_per_frame = alloc.read_i32()?;
        mesh.flags = alloc.read_i32()? as u32;
        alloc.check_guard()?;
        Ok(mesh)
    }

    pub(super) fn assemble_skinned(alloc: &mut TsAlloc<'_>, version: u8) -> Result<Self> {
        let mut mesh = Self::assemble(alloc, version)?;
        let mut skin = SkinData {
            max_bones: if version < 27 { -1 } else { alloc.read_i32()? },
            ..SkinData::default()
        };

        let num_initial = alloc.read_i32()?.max(0) as usize;
        if mesh.parent_mesh < 0 {
            alloc.skip32(num_initial * 3)?;
            if version > 21 {
                alloc.skip32(num_initial * 3)?;
                alloc.skip8(num_initial)?;
            } else {
                alloc.skip32(num_initial * 3)?;
            }
        }

        let num_transforms = alloc.read_i32()?.max(0) as usize;
        if num_transforms > 0 {
            let raw = alloc.read_f32_list(num_transforms * 16)?;
            skin.initial_transforms = raw
                .chunks_exact(16)
                .map(|c| {
                    let mut m = [0.0f32; 16];
                    m.copy_from_slice(c);
                    m
                })
                .collect();
        }

        let num_influences = alloc.read_i32()?.max(0) as usize;
        skin.vertex_index = alloc.read_i32_list(num_influences)?;
        skin.bone_index = alloc.read_i32_list(num_influences)?;
        skin.weight = alloc.read_f32_list(num_influences)?;

        let num_node_index = alloc.read_i32()?.max(0) as usize;
        skin.node_index = alloc.read_i32_list(num_node_index)?;

        alloc.check_guard()?;
        mesh.skin = Some(skin);
        Ok(mesh)
    }

    pub(super) fn copy_vertex_data_from(&mut self, other: &TsMesh) {
        self.vertices = other.vertices.clone();
        self.tverts = other.tverts.clone();
        self.t2verts = other.t2verts.clone();
        self.colors = other.colors.clone();
        self.normals = other.normals.clone();
    }

    /// Expands all primitives into a triangle list with consistent
    /// winding, the way the legacy renderer drew them (reversed order,
    /// strips alternating).
    pub fn triangles(&self) -> Result<Vec<[u32; 3]>> {
        let mut out = Vec::new();
        for prim in &self.primitives {
            let end = prim
                .start
                .checked_add(prim.num_elements)
                .filter(|end| *end <= self.indices.len())
                .ok_or_else(|| {
                    anyhow!(
                        "primitive range {}..{} exceeds {} indices",
                        prim.start,
                        prim.start + prim.num_elements,
                        self.indices.len()
                    )
                })?;
            let range = &self.indices[prim.start..end];
            match prim.kind {
                PrimitiveKind::Triangles => {
                    for tri in range.chunks_exact(3) {
                        out.push([tri[2], tri[1], tri[0]]);
                    }
                }
                PrimitiveKind::Strip => {
                    let mut clockwise = false;
                    for v in 0..range.len().saturating_sub(2) {
                        let tri = if clockwise {
                            [range[v + 1], range[v], range[v + 2]]
                        } else {
                            [range[v], range[v + 1], range[v + 2]]
                        };
                        out.push([tri[2], tri[1], tri[0]]);
                        clockwise = !clockwise;
                    }
                }
                PrimitiveKind::Fan => {
                    for v in 1..range.len().saturating_sub(1) {
                        out.push([range[v + 1], range[v], range[0]]);
                    }
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_flags_decode() {
        let raw = (TYPE_STRIP | FLAG_INDEXED | 5) as i32;
        let prim = DrawPrimitive::from_raw(0, 6, raw);
        assert_eq!(prim.kind, PrimitiveKind::Strip);
        assert!(prim.indexed);
        assert!(!prim.no_material);
        assert_eq!(prim.material_index, 5);
    }

    #[test]
    fn strip_expansion_alternates_winding() {
        let mesh = TsMesh {
            indices: vec![0, 1, 2, 3],
            primitives: vec![DrawPrimitive {
                start: 0,
                num_elements: 4,
                material_index: 0,
                kind: PrimitiveKind::Strip,
                indexed: true,
                no_material: false,
            }],
            ..TsMesh::default()
        };
        let tris = mesh.triangles().unwrap();
        assert_eq!(tris, vec![[2, 1, 0], [3, 1, 2]]);
    }

    #[test]
    fn out_of_range_primitive_is_an_error() {
        let mesh = TsMesh {
            indices: vec![0, 1, 2],
            primitives: vec![DrawPrimitive {
                start: 1,
                num_elements: 3,
                material_index: 0,
                kind: PrimitiveKind::Triangles,
                indexed: true,
                no_material: false,
            }],
            ..TsMesh::default()
        };
        assert!(mesh.triangles().is_err());
    }
}
