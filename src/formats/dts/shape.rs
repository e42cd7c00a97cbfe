//! Packed shape assembly.
//!
//! A shape file is a version word, an optional name pre-header, a
//! three-tier memory buffer (assembled via [`TsAlloc`]), then sequences
//! and a material list read from the plain stream.

use anyhow::{anyhow, Context, Result};
use glam::{Quat, Vec3};

use super::alloc::TsAlloc;
use super::mesh::{MeshSlot, TsMesh};
use crate::formats::ByteReader;

pub const MIN_VERSION: u8 = 19;

const MESH_TYPE_MASK: i32 = 7;
const MESH_STANDARD: i32 = 0;
const MESH_SKIN: i32 = 1;
const MESH_NULL: i32 = 4;

/// Compressed quaternion with components scaled to +/-0x7fff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quat16 {
    pub x: i16,
    pub y: i16,
    pub z: i16,
    pub w: i16,
}

impl Quat16 {
    pub const IDENTITY: Self = Self {
        x: 0,
        y: 0,
        z: 0,
        w: 0x7fff,
    };

    pub fn to_quat(self) -> Quat {
        let s = 1.0 / 0x7fff as f32;
        Quat::from_xyzw(
            self.x as f32 * s,
            self.y as f32 * s,
            self.z as f32 * s,
            self.w as f32 * s,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeNode {
    pub name_index: i32,
    pub parent_index: i32,
    pub rotation: Quat16,
    pub translation: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeObject {
    pub name_index: i32,
    pub num_meshes: i32,
    pub start_mesh_index: i32,
    pub node_index: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ShapeDetail {
    pub name_index: i32,
    pub sub_shape_num: i32,
    pub object_detail_num: i32,
    pub size: f32,
    pub average_error: f32,
    pub max_error: f32,
    pub poly_count: i32,
    pub billboard_dimension: i32,
    pub billboard_detail_level: i32,
    pub billboard_equator_steps: i32,
    pub billboard_polar_steps: i32,
    pub billboard_polar_angle: f32,
    pub billboard_include_poles: i32,
}

/// Bit set over node indices, used by sequences to mark animated nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegerSet {
    words: Vec<u32>,
}

impl Default for IntegerSet {
    fn default() -> Self {
        Self { words: vec![0; 64] }
    }
}

impl IntegerSet {
    const MAX_WORDS: usize = 64;

    fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        let _num_ints = reader.u32()?;
        let sz = reader.u32()? as usize;
        let mut words = vec![0u32; Self::MAX_WORDS];
        for slot in words.iter_mut().take(sz.min(Self::MAX_WORDS)) {
            *slot = reader.u32()?;
        }
        if sz > Self::MAX_WORDS {
            reader.skip(4 * (sz - Self::MAX_WORDS))?;
        }
        Ok(Self { words })
    }

    pub fn contains(&self, index: usize) -> bool {
        self.words
            .get(index / 32)
            .is_some_and(|w| w & (1 << (index % 32)) != 0)
    }

    /// Number of set bits below `index`; maps a node index to its slot in
    /// a sequence's packed keyframe arrays.
    pub fn rank(&self, index: usize) -> usize {
        let word = index / 32;
        let bit = index % 32;
        let mut count: usize = self
            .words
            .iter()
            .take(word.min(Self::MAX_WORDS))
            .map(|w| w.count_ones() as usize)
            .sum();
        if word < Self::MAX_WORDS && bit > 0 {
            let mask = (1u32 << bit) - 1;
            count += (self.words[word] & mask).count_ones() as usize;
        }
        count
    }

    pub fn indices(&self) -> Vec<usize> {
        let mut out = Vec::new();
        for (wi, w) in self.words.iter().enumerate() {
            let mut bits = *w;
            while bits != 0 {
                let bit = bits.trailing_zeros() as usize;
                out.push(wi * 32 + bit);
                bits &= bits - 1;
            }
        }
        out
    }
}

pub mod sequence_flags {
    pub const UNIFORM_SCALE: u32 = 1 << 0;
    pub const ALIGNED_SCALE: u32 = 1 << 1;
    pub const ARBITRARY_SCALE: u32 = 1 << 2;
    pub const BLEND: u32 = 1 << 3;
    pub const CYCLIC: u32 = 1 << 4;
    pub const MAKE_PATH: u32 = 1 << 5;
    pub const ANY_SCALE: u32 = UNIFORM_SCALE | ALIGNED_SCALE | ARBITRARY_SCALE;
}

/// One animation clip.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ShapeSequence {
    pub name_index: i32,
    pub flags: u32,
    pub num_keyframes: u32,
    pub duration: f32,
    pub priority: i32,
    pub first_ground_frame: i32,
    pub num_ground_frames: u32,
    pub base_rotation: i32,
    pub base_translation: i32,
    pub base_scale: i32,
    pub base_object_state: i32,
    pub base_decal_state: i32,
    pub first_trigger: i32,
    pub num_triggers: u32,
    pub tool_begin: f32,
    pub rotation_matters: IntegerSet,
    pub translation_matters: IntegerSet,
    pub scale_matters: IntegerSet,
    pub vis_matters: IntegerSet,
    pub frame_matters: IntegerSet,
    pub mat_frame_matters: IntegerSet,
}

impl ShapeSequence {
    fn read(reader: &mut ByteReader<'_>, version: u8) -> Result<Self> {
        let mut seq = ShapeSequence {
            name_index: reader.i32()?,
            ..ShapeSequence::default()
        };
        if version > 21 {
            seq.flags = reader.u32()?;
        }
        seq.num_keyframes = reader.u32()?;
        seq.duration = reader.f32()?;
        if version < 22 {
            if reader.u8()? != 0 {
                seq.flags |= sequence_flags::BLEND;
            }
            if reader.u8()? != 0 {
                seq.flags |= sequence_flags::CYCLIC;
            }
            if reader.u8()? != 0 {
                seq.flags |= sequence_flags::MAKE_PATH;
            }
        }
        seq.priority = reader.i32()?;
        seq.first_ground_frame = reader.i32()?;
        seq.num_ground_frames = reader.u32()?;
        if version > 21 {
            seq.base_rotation = reader.i32()?;
            seq.base_translation = reader.i32()?;
            seq.base_scale = reader.i32()?;
            seq.base_object_state = reader.i32()?;
            seq.base_decal_state = reader.i32()?;
        } else {
            seq.base_rotation = reader.i32()?;
            seq.base_translation = seq.base_rotation;
            seq.base_object_state = reader.i32()?;
            let _ = reader.i32()?;
        }
        seq.first_trigger = reader.i32()?;
        seq.num_triggers = reader.u32()?;
        seq.tool_begin = reader.f32()?;

        seq.rotation_matters = IntegerSet::read(reader)?;
        if version < 22 {
            seq.translation_matters = seq.rotation_matters.clone();
        } else {
            seq.translation_matters = IntegerSet::read(reader)?;
            seq.scale_matters = IntegerSet::read(reader)?;
        }
        // deprecated decal and material-animation sets
        let _ = IntegerSet::read(reader)?;
        let _ = IntegerSet::read(reader)?;
        seq.vis_matters = IntegerSet::read(reader)?;
        seq.frame_matters = IntegerSet::read(reader)?;
        seq.mat_frame_matters = IntegerSet::read(reader)?;
        Ok(seq)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShapeMaterial {
    pub name: String,
    pub flags: u32,
}

fn read_material_list(reader: &mut ByteReader<'_>, version: u8) -> Result<Vec<ShapeMaterial>> {
    let list_version = reader.u8().context("material list version")?;
    if list_version != 1 {
        return Err(anyhow!("unsupported material list version {list_version}"));
    }
    let count = reader.i32()?.max(0) as usize;
    let mut materials = Vec::with_capacity(count);
    for _ in 0..count {
        let len = reader.u8()? as usize;
        let bytes = reader.bytes(len)?;
        materials.push(ShapeMaterial {
            name: String::from_utf8_lossy(bytes).into_owned(),
            flags: 0,
        });
    }
    for material in &mut materials {
        material.flags = reader.u32()?;
    }
    // reflection, bump and detail map indices
    reader.skip(count * 4 * 3)?;
    if version == 25 {
        reader.skip(count * 4)?;
    }
    // detail scales and reflection amounts
    reader.skip(count * 4 * 2)?;
    Ok(materials)
}

/// A fully assembled shape.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TsShape {
    pub version: u8,
    pub nodes: Vec<ShapeNode>,
    pub objects: Vec<ShapeObject>,
    pub details: Vec<ShapeDetail>,
    pub sequences: Vec<ShapeSequence>,
    pub meshes: Vec<MeshSlot>,
    pub names: Vec<String>,
    pub materials: Vec<ShapeMaterial>,
    pub sub_shape_first_node: Vec<i32>,
    pub sub_shape_num_nodes: Vec<i32>,
    pub sub_shape_first_object: Vec<i32>,
    pub sub_shape_num_objects: Vec<i32>,
    pub anim_node_rotations: Vec<Quat16>,
    pub anim_node_translations: Vec<Vec3>,
    pub anim_uniform_scales: Vec<f32>,
    pub anim_aligned_scales: Vec<Vec3>,
    pub anim_arbitrary_scale_factors: Vec<Vec3>,
    pub anim_arbitrary_scale_rotations: Vec<Quat16>,
}

impl TsShape {
    pub fn name(&self, index: i32) -> Option<&str> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.names.get(i))
            .map(String::as_str)
    }

    pub fn sub_shape_for_node(&self, node_index: i32) -> Option<usize> {
        self.sub_shape_first_node
            .iter()
            .zip(&self.sub_shape_num_nodes)
            .position(|(first, num)| node_index >= *first && node_index < *first + *num)
    }

    pub fn sub_shape_for_object(&self, object_index: i32) -> Option<usize> {
        self.sub_shape_first_object
            .iter()
            .zip(&self.sub_shape_num_objects)
            .position(|(first, num)| object_index >= *first && object_index < *first + *num)
    }

    /// Details belonging to a sub-shape (negative sub-shape numbers apply
    /// everywhere, e.g. imposters).
    pub fn sub_shape_details(&self, sub_shape: usize) -> Vec<&ShapeDetail> {
        self.details
            .iter()
            .filter(|d| d.sub_shape_num == sub_shape as i32 || d.sub_shape_num < 0)
            .collect()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(data);
        let version_full = reader.i32().context("shape version word")?;
        let version = (version_full & 0xFF) as u8;
        if version < MIN_VERSION {
            return Err(anyhow!(
                "shape version {version} is too old (minimum {MIN_VERSION})"
            ));
        }
        // v29/v30 files carry a quick object-name header before the buffer.
        if (29..31).contains(&version) {
            let count = reader.i32()?.max(0) as usize;
            for _ in 0..count {
                let len = reader.u32()? as usize;
                reader.skip(len)?;
            }
        }

        let size_mem_buffer = reader.i32().context("shape buffer size")?;
        let start_u16 = reader.i32().context("16-bit tier start")?;
        let start_u8 = reader.i32().context("8-bit tier start")?;
        if size_mem_buffer < 0 || start_u16 < 0 || start_u8 < 0 {
            return Err(anyhow!("negative shape buffer layout"));
        }
        let buf = reader
            .bytes(size_mem_buffer as usize * 4)
            .context("shape memory buffer")?;

        let mut shape = TsShape {
            version,
            ..TsShape::default()
        };
        let mut alloc = TsAlloc::new(buf, start_u16 as usize, start_u8 as usize);
        shape
            .assemble(&mut alloc)
            .context("assembling shape buffer")?;

        let num_sequences = reader.i32().context("sequence count")?.max(0) as usize;
        for i in 0..num_sequences {
            shape.sequences.push(
                ShapeSequence::read(&mut reader, version)
                    .with_context(|| format!("sequence {i}"))?,
            );
        }
        shape.materials = read_material_list(&mut reader, version).context("material list")?;

        // Child meshes share their parent's vertex channels.
        for i in 0..shape.meshes.len() {
            let parent = match &shape.meshes[i] {
                MeshSlot::Mesh(m) if m.parent_mesh >= 0 && m.vertices.is_empty() => {
                    m.parent_mesh as usize
                }
                _ => continue,
            };
            if parent < shape.meshes.len() && parent != i {
                if let MeshSlot::Mesh(parent_mesh) = shape.meshes[parent].clone() {
                    if let MeshSlot::Mesh(child) = &mut shape.meshes[i] {
                        child.copy_vertex_data_from(&parent_mesh);
                    }
                }
            }
        }
        Ok(shape)
    }

    fn assemble(&mut self, alloc: &mut TsAlloc<'_>) -> Result<()> {
        let version = self.version;
        let num_nodes = alloc.read_i32()?.max(0) as usize;
        let num_objects = alloc.read_i32()?.max(0) as usize;
        let num_decals = alloc.read_i32()?.max(0) as usize;
        let num_sub_shapes = alloc.read_i32()?.max(0) as usize;
        let _num_ifl_materials = alloc.read_i32()?;

        let (num_rots, num_trans, num_uniform, num_aligned, num_arbitrary);
        if version < 22 {
            let n = alloc.read_i32()?.max(0) as usize;
            num_rots = n.saturating_sub(num_nodes);
            num_trans = num_rots;
            num_uniform = 0;
            num_aligned = 0;
            num_arbitrary = 0;
        } else {
            num_rots = alloc.read_i32()?.max(0) as usize;
            num_trans = alloc.read_i32()?.max(0) as usize;
            num_uniform = alloc.read_i32()?.max(0) as usize;
            num_aligned = alloc.read_i32()?.max(0) as usize;
            num_arbitrary = alloc.read_i32()?.max(0) as usize;
        }

        let num_ground_frames = if version > 23 {
            alloc.read_i32()?.max(0) as usize
        } else {
            0
        };
        let num_object_states = alloc.read_i32()?.max(0) as usize;
        let num_decal_states = alloc.read_i32()?.max(0) as usize;
        let num_triggers = alloc.read_i32()?.max(0) as usize;
        let num_details = alloc.read_i32()?.max(0) as usize;
        let num_meshes = alloc.read_i32()?.max(0) as usize;
        let num_skins = if version < 23 {
            alloc.read_i32()?.max(0) as usize
        } else {
            0
        };
        let num_names = alloc.read_i32()?.max(0) as usize;

        let _smallest_visible_size = alloc.read_f32()?;
        let _smallest_visible_dl = alloc.read_i32()?;
        alloc.check_guard()?;

        // radius, tube radius, center, bounds min/max
        let _radius = alloc.read_f32()?;
        let _tube_radius = alloc.read_f32()?;
        alloc.skip32(9)?;
        alloc.check_guard()?;

        for _ in 0..num_nodes {
            let name_index = alloc.read_i32()?;
            let parent_index = alloc.read_i32()?;
            // runtime-computed links
            alloc.skip32(3)?;
            self.nodes.push(ShapeNode {
                name_index,
                parent_index,
                rotation: Quat16::IDENTITY,
                translation: Vec3::ZERO,
            });
        }
        alloc.check_guard()?;

        for _ in 0..num_objects {
            let name_index = alloc.read_i32()?;
            let num_meshes = alloc.read_i32()?;
            let start_mesh_index = alloc.read_i32()?;
            let node_index = alloc.read_i32()?;
            alloc.skip32(2)?;
            self.objects.push(ShapeObject {
                name_index,
                num_meshes,
                start_mesh_index,
                node_index,
            });
        }
        if num_skins > 0 {
            alloc.skip32(num_skins * 6)?;
        }
        alloc.check_guard()?;

        // decal tables, deprecated
        alloc.skip32(num_decals * 5)?;
        alloc.check_guard()?;
        alloc.skip32(num_decals * 5)?;
        alloc.check_guard()?;

        for _ in 0..num_sub_shapes {
            self.sub_shape_first_node.push(alloc.read_i32()?);
        }
        for _ in 0..num_sub_shapes {
            self.sub_shape_first_object.push(alloc.read_i32()?);
        }
        alloc.skip32(num_sub_shapes)?;
        alloc.check_guard()?;

        for _ in 0..num_sub_shapes {
            self.sub_shape_num_nodes.push(alloc.read_i32()?);
        }
        for _ in 0..num_sub_shapes {
            self.sub_shape_num_objects.push(alloc.read_i32()?);
        }
        alloc.skip32(num_sub_shapes)?;
        alloc.check_guard()?;

        // default node transforms
        for i in 0..num_nodes {
            self.nodes[i].rotation = Quat16 {
                x: alloc.read_i16()?,
                y: alloc.read_i16()?,
                z: alloc.read_i16()?,
                w: alloc.read_i16()?,
            };
        }
        for i in 0..num_nodes {
            self.nodes[i].translation =
                Vec3::new(alloc.read_f32()?, alloc.read_f32()?, alloc.read_f32()?);
        }

        for _ in 0..num_trans {
            self.anim_node_translations.push(Vec3::new(
                alloc.read_f32()?,
                alloc.read_f32()?,
                alloc.read_f32()?,
            ));
        }
        for _ in 0..num_rots {
            self.anim_node_rotations.push(Quat16 {
                x: alloc.read_i16()?,
                y: alloc.read_i16()?,
                z: alloc.read_i16()?,
                w: alloc.read_i16()?,
            });
        }
        alloc.check_guard()?;

        if version > 21 {
            for _ in 0..num_uniform {
                self.anim_uniform_scales.push(alloc.read_f32()?);
            }
            for _ in 0..num_aligned {
                self.anim_aligned_scales.push(Vec3::new(
                    alloc.read_f32()?,
                    alloc.read_f32()?,
                    alloc.read_f32()?,
                ));
            }
            for _ in 0..num_arbitrary {
                self.anim_arbitrary_scale_factors.push(Vec3::new(
                    alloc.read_f32()?,
                    alloc.read_f32()?,
                    alloc.read_f32()?,
                ));
            }
            for _ in 0..num_arbitrary {
                self.anim_arbitrary_scale_rotations.push(Quat16 {
                    x: alloc.read_i16()?,
                    y: alloc.read_i16()?,
                    z: alloc.read_i16()?,
                    w: alloc.read_i16()?,
                });
            }
            alloc.check_guard()?;
        }

        if version > 23 {
            alloc.skip32(num_ground_frames * 3)?;
            alloc.skip16(num_ground_frames * 4)?;
            alloc.check_guard()?;
        }

        alloc.skip32(num_object_states * 3)?;
        alloc.check_guard()?;
        alloc.skip32(num_decal_states)?;
        alloc.check_guard()?;
        alloc.skip32(num_triggers * 2)?;
        alloc.check_guard()?;

        for _ in 0..num_details {
            let mut detail = ShapeDetail {
                name_index: alloc.read_i32()?,
                sub_shape_num: alloc.read_i32()?,
                object_detail_num: alloc.read_i32()?,
                size: alloc.read_f32()?,
                average_error: alloc.read_f32()?,
                max_error: alloc.read_f32()?,
                poly_count: alloc.read_i32()?,
                ..ShapeDetail::default()
            };
            if version >= 26 {
                detail.billboard_dimension = alloc.read_i32()?;
                detail.billboard_detail_level = alloc.read_i32()?;
                detail.billboard_equator_steps = alloc.read_i32()?;
                detail.billboard_polar_steps = alloc.read_i32()?;
                detail.billboard_polar_angle = alloc.read_f32()?;
                detail.billboard_include_poles = alloc.read_i32()?;
            }
            self.details.push(detail);
        }
        alloc.check_guard()?;

        for i in 0..num_meshes {
            let mesh_type = alloc.read_i32()? & MESH_TYPE_MASK;
            let slot = match mesh_type {
                MESH_STANDARD => MeshSlot::Mesh(
                    TsMesh::assemble(alloc, version).with_context(|| format!("mesh {i}"))?,
                ),
                MESH_SKIN => MeshSlot::Mesh(
                    TsMesh::assemble_skinned(alloc, version)
                        .with_context(|| format!("skinned mesh {i}"))?,
                ),
                MESH_NULL => MeshSlot::Null,
                other => return Err(anyhow!("unsupported mesh type {other} in mesh {i}")),
            };
            self.meshes.push(slot);
        }
        alloc.check_guard()?;

        for _ in 0..num_names {
            let mut chars = Vec::new();
            loop {
                let b = alloc.read_u8()?;
                if b == 0 {
                    break;
                }
                chars.push(b);
            }
            self.names.push(String::from_utf8_lossy(&chars).into_owned());
        }
        alloc.check_guard()?;

        if version < 23 {
            // detail skin tables, then trailing skinned meshes
            alloc.skip32(num_skins * 2)?;
            alloc.check_guard()?;
            for i in 0..num_skins {
                let mesh = TsMesh::assemble_skinned(alloc, version)
                    .with_context(|| format!("legacy skin {i}"))?;
                self.meshes.push(MeshSlot::Mesh(mesh));
            }
            alloc.check_guard()?;
        }
        Ok(())
    }
}
