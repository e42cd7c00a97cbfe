//! Typed views over raw level records.
//!
//! Level files carry records with loosely typed fields: vectors arrive as
//! strings ("10 20 0.5"), nested arrays or objects, scale may be a single
//! scalar, rotations come as row-major 3x3 matrices.  The constructors here
//! coerce all of that into fixed shapes, substituting documented defaults
//! for missing or malformed fields instead of failing.

use glam::{EulerRot, Mat3, Quat, Vec3};

use crate::sjson::Value;

/// Reads a scalar float field; a value of zero (the engine's "unset")
/// falls back to the default, matching how the game treats these fields.
fn f32_or(rec: &Value, key: &str, default: f32) -> f32 {
    let Some(value) = field_f32(rec, key) else {
        return default;
    };
    if value == 0.0 {
        default
    } else {
        value
    }
}

fn field_f32(rec: &Value, key: &str) -> Option<f32> {
    match rec.get(key)? {
        Value::Number(n) => Some(*n as f32),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse::<f32>().ok(),
        _ => None,
    }
}

fn field_bool(rec: &Value, key: &str, default: bool) -> bool {
    match rec.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => *n != 0.0,
        Some(Value::String(s)) => {
            let s = s.trim();
            !(s.is_empty() || s.eq_ignore_ascii_case("false") || s == "0")
        }
        _ => default,
    }
}

fn field_str(rec: &Value, key: &str) -> Option<String> {
    rec.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Record name, preferring `name` over `internalName`.
pub fn record_name(rec: &Value) -> Option<String> {
    field_str(rec, "name").or_else(|| field_str(rec, "internalName"))
}

pub fn record_class(rec: &Value) -> Option<&str> {
    rec.get("class").and_then(Value::as_str)
}

fn field_vec3(rec: &Value, key: &str, default: Vec3) -> Vec3 {
    let Some(value) = rec.get(key) else {
        return default;
    };
    let floats = value.to_float_list();
    match floats.len() {
        0 => default,
        1 | 2 => {
            let mut out = default;
            for (i, f) in floats.iter().enumerate() {
                out[i] = *f as f32;
            }
            out
        }
        _ => Vec3::new(floats[0] as f32, floats[1] as f32, floats[2] as f32),
    }
}

/// `scale` accepts a lone scalar, which splats to all three axes.
fn field_scale(rec: &Value) -> Vec3 {
    if let Some(Value::Number(n)) = rec.get("scale") {
        let s = *n as f32;
        return Vec3::splat(s);
    }
    field_vec3(rec, "scale", Vec3::ONE)
}

/// Converts a row-major 3x3 rotation matrix to Euler angles (radians,
/// rotation applied X, then Y, then Z).
pub fn euler_from_rot9(rot: &[f64]) -> Vec3 {
    if rot.len() < 9 {
        return Vec3::ZERO;
    }
    let r = |i: usize| rot[i] as f32;
    // Feeding the rows in as columns transposes the matrix, which is the
    // orientation convention these records use.
    let mat = Mat3::from_cols(
        Vec3::new(r(0), r(1), r(2)),
        Vec3::new(r(3), r(4), r(5)),
        Vec3::new(r(6), r(7), r(8)),
    );
    let (z, y, x) = Quat::from_mat3(&mat).to_euler(EulerRot::ZYX);
    Vec3::new(x, y, z)
}

/// World placement shared by all positioned records.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub position: Vec3,
    /// Euler radians, applied X then Y then Z.
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

impl Placement {
    pub fn from_record(rec: &Value) -> Self {
        let rotation = rec
            .get("rotationMatrix")
            .map(|v| euler_from_rot9(&v.to_float_list()))
            .unwrap_or(Vec3::ZERO);
        Self {
            position: field_vec3(rec, "position", Vec3::ZERO),
            rotation,
            scale: field_scale(rec),
        }
    }
}

/// Flattens one spline node into its numeric components.  Nodes appear as
/// strings, arrays, or objects with a point plus named extras.
fn node_floats(node: &Value) -> Vec<f64> {
    match node {
        Value::Object(_) => {
            let mut out = Vec::new();
            for key in ["point", "position", "pos"] {
                if let Some(v) = node.get(key) {
                    out.extend(v.to_float_list());
                    break;
                }
            }
            for key in ["width", "depth", "normal"] {
                if let Some(v) = node.get(key) {
                    out.extend(v.to_float_list());
                }
            }
            out
        }
        other => other.to_float_list(),
    }
}

/// Spline node for decal roads and rivers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoadNode {
    pub pos: Vec3,
    pub width: f32,
}

fn road_nodes(rec: &Value) -> Vec<RoadNode> {
    let Some(nodes) = rec.get("nodes").and_then(Value::as_array) else {
        return Vec::new();
    };
    nodes
        .iter()
        .filter_map(|node| {
            let f = node_floats(node);
            if f.len() < 3 {
                return None;
            }
            Some(RoadNode {
                pos: Vec3::new(f[0] as f32, f[1] as f32, f[2] as f32),
                width: f.get(3).copied().unwrap_or(1.0) as f32,
            })
        })
        .collect()
}

/// A spline-following surface decal projected onto the ground.
#[derive(Debug, Clone, PartialEq)]
pub struct DecalRoad {
    pub name: String,
    pub material: Option<String>,
    pub nodes: Vec<RoadNode>,
    pub improved_spline: bool,
    pub looped: bool,
    pub smoothness: f32,
    pub detail: f32,
    pub texture_length: f32,
    pub over_objects: bool,
    pub decal_bias: f32,
    pub render_priority: f32,
}

impl DecalRoad {
    /// Returns `None` when the record has fewer than two usable nodes.
    pub fn from_record(rec: &Value) -> Option<Self> {
        let nodes = road_nodes(rec);
        if nodes.len() < 2 {
            return None;
        }
        Some(Self {
            name: record_name(rec).unwrap_or_else(|| "DecalRoad".to_string()),
            material: field_str(rec, "material"),
            nodes,
            improved_spline: field_bool(rec, "improvedSpline", true),
            looped: field_bool(rec, "looped", false),
            smoothness: f32_or(rec, "smoothness", 0.5),
            detail: f32_or(rec, "detail", 0.1),
            texture_length: f32_or(rec, "textureLength", 5.0),
            over_objects: field_bool(rec, "overObjects", false),
            decal_bias: f32_or(rec, "decalBias", 0.01),
            render_priority: f32_or(rec, "renderPriority", 10.0),
        })
    }
}

/// Spline node for mesh roads: position, width, depth and an up normal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshRoadNode {
    pub pos: Vec3,
    pub width: f32,
    pub depth: f32,
    pub normal: Vec3,
}

/// A solid extruded road following a spline.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshRoad {
    pub name: String,
    pub nodes: Vec<MeshRoadNode>,
    pub texture_length: f32,
    pub break_angle: f32,
    pub width_subdivisions: u32,
    pub top_material: Option<String>,
    pub bottom_material: Option<String>,
    pub side_material: Option<String>,
}

impl MeshRoad {
    pub fn from_record(rec: &Value) -> Option<Self> {
        let raw = rec.get("nodes").and_then(Value::as_array)?;
        let nodes: Vec<MeshRoadNode> = raw
            .iter()
            .filter_map(|node| {
                let f = node_floats(node);
                if f.len() < 5 {
                    return None;
                }
                let normal = if f.len() >= 8 {
                    let n = Vec3::new(f[5] as f32, f[6] as f32, f[7] as f32);
                    if n.length_squared() == 0.0 {
                        Vec3::Z
                    } else {
                        n.normalize()
                    }
                } else {
                    Vec3::Z
                };
                Some(MeshRoadNode {
                    pos: Vec3::new(f[0] as f32, f[1] as f32, f[2] as f32),
                    width: f[3] as f32,
                    depth: f[4] as f32,
                    normal,
                })
            })
            .collect();
        if nodes.len() < 2 {
            return None;
        }
        Some(Self {
            name: record_name(rec).unwrap_or_else(|| "MeshRoad".to_string()),
            nodes,
            texture_length: f32_or(rec, "textureLength", 5.0),
            break_angle: f32_or(rec, "breakAngle", 3.0),
            width_subdivisions: field_f32(rec, "widthSubdivisions")
                .map(|v| v.max(0.0) as u32)
                .unwrap_or(0),
            top_material: field_str(rec, "topMaterial"),
            bottom_material: field_str(rec, "bottomMaterial"),
            side_material: field_str(rec, "sideMaterial"),
        })
    }
}

/// A water ribbon following a spline, draped onto the scene.
#[derive(Debug, Clone, PartialEq)]
pub struct River {
    pub name: String,
    pub nodes: Vec<RoadNode>,
    pub subdivide_length: f32,
}

impl River {
    pub fn from_record(rec: &Value) -> Option<Self> {
        let nodes = road_nodes(rec);
        if nodes.len() < 2 {
            return None;
        }
        let subdivide = field_f32(rec, "SubdivideLength")
            .or_else(|| field_f32(rec, "subdivideLength"))
            .unwrap_or(1.0);
        Some(Self {
            name: record_name(rec).unwrap_or_else(|| "River".to_string()),
            nodes,
            subdivide_length: subdivide.max(1e-3),
        })
    }
}

/// Reference to a heightfield terrain plus its world scaling.
#[derive(Debug, Clone, PartialEq)]
pub struct TerrainBlock {
    pub name: String,
    pub terrain_file: Option<String>,
    pub square_size: f32,
    pub max_height: f32,
    pub position: Vec3,
}

impl TerrainBlock {
    pub fn from_record(rec: &Value) -> Self {
        Self {
            name: record_name(rec).unwrap_or_else(|| "TerrainBlock".to_string()),
            terrain_file: field_str(rec, "terrainFile"),
            square_size: f32_or(rec, "squareSize", 1.0),
            max_height: f32_or(rec, "maxHeight", 2048.0),
            position: field_vec3(rec, "position", Vec3::ZERO),
        }
    }
}

/// A placed static shape instance.
#[derive(Debug, Clone, PartialEq)]
pub struct TsStatic {
    pub shape_name: String,
    pub placement: Placement,
}

impl TsStatic {
    pub fn from_record(rec: &Value) -> Option<Self> {
        let shape_name = field_str(rec, "shapeName")?;
        Some(Self {
            shape_name,
            placement: Placement::from_record(rec),
        })
    }

    /// Instance key: the shape file name without its directory.
    pub fn instance_name(&self) -> &str {
        self.shape_name
            .rsplit('/')
            .next()
            .unwrap_or(self.shape_name.as_str())
    }
}
