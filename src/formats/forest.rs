//! Forest instance decoding.
//!
//! Forest placements ship in four layouts: the packed `.forest` binary
//! (FKDF), two versioned whole-file JSON formats, and the current
//! newline-delimited record stream (`.forest4.json`).  All decode to the
//! same flat item list.

use anyhow::{Context, Result};
use glam::{Mat3, Quat, Vec3};

use super::ByteReader;
use crate::sjson::{self, Value};

/// One placed forest mesh (a tree, rock, bush...).
#[derive(Debug, Clone, PartialEq)]
pub struct ForestItem {
    pub type_name: String,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: f32,
}

impl ForestItem {
    fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: 1.0,
        }
    }
}

/// Row-major 3x3 list to quaternion, transposing like the record decoder.
fn quat_from_rot9(rot: &[f64]) -> Quat {
    if rot.len() < 9 {
        return Quat::IDENTITY;
    }
    let r = |i: usize| rot[i] as f32;
    let mat = Mat3::from_cols(
        Vec3::new(r(0), r(1), r(2)),
        Vec3::new(r(3), r(4), r(5)),
        Vec3::new(r(6), r(7), r(8)),
    );
    Quat::from_mat3(&mat)
}

const FKDF_MAGIC: &[u8; 4] = b"FKDF";

/// Decodes the packed forest container.  Like the decal container, a
/// wrong magic is a probe miss and yields an empty list.
pub fn decode_fkdf(data: &[u8]) -> Result<Vec<ForestItem>> {
    let mut reader = ByteReader::new(data);
    let Ok(magic) = reader.bytes(4) else {
        return Ok(Vec::new());
    };
    if magic != FKDF_MAGIC {
        return Ok(Vec::new());
    }
    let _version = reader.u8().context("forest container version")?;
    let names = reader.name_table().context("forest name table")?;

    let count = reader.u32().context("forest item count")? as usize;
    let mut out = Vec::with_capacity(count.min(1 << 20));
    for i in 0..count {
        let ctx = || format!("forest item {i} of {count}");
        let idx = reader.u8().with_context(ctx)? as usize;
        let position = reader.vec3().with_context(ctx)?;
        let x = reader.f32().with_context(ctx)?;
        let y = reader.f32().with_context(ctx)?;
        let z = reader.f32().with_context(ctx)?;
        let w = reader.f32().with_context(ctx)?;
        let scale = reader.f32().with_context(ctx)?;
        let type_name = names.get(idx).map(String::as_str).unwrap_or("ForestItem");
        out.push(ForestItem {
            type_name: type_name.to_string(),
            position,
            rotation: Quat::from_xyzw(x, y, z, w),
            scale,
        });
    }
    Ok(out)
}

/// Decodes a whole-file forest JSON document (v2 or v3 headers).
/// An unrecognized format yields an empty list so the caller can fall
/// back to older sources.
pub fn decode_forest_json(doc: &Value) -> Vec<ForestItem> {
    let format = doc
        .get("header")
        .and_then(|h| h.get("format"))
        .or_else(|| doc.get("format"))
        .and_then(Value::as_str)
        .unwrap_or("");
    match format {
        "JSON Forest Data v2" => decode_v2(doc),
        "JSON Forest Data v3" => decode_v3(doc),
        _ => Vec::new(),
    }
}

/// v2: `{"instances": {type: [[px,py,pz, qx,qy,qz,qw, scale]]}}`.
fn decode_v2(doc: &Value) -> Vec<ForestItem> {
    let mut out = Vec::new();
    let Some(instances) = doc.get("instances").and_then(Value::as_object) else {
        return out;
    };
    for (type_name, rows) in instances {
        let Some(rows) = rows.as_array() else {
            continue;
        };
        for row in rows {
            let f = row.to_float_list();
            if f.len() != 8 {
                continue;
            }
            out.push(ForestItem {
                type_name: type_name.clone(),
                position: Vec3::new(f[0] as f32, f[1] as f32, f[2] as f32),
                rotation: Quat::from_xyzw(f[3] as f32, f[4] as f32, f[5] as f32, f[6] as f32),
                scale: f[7] as f32,
            });
        }
    }
    out
}

/// v3: `{"data": [[type, px,py,pz, 9 rotation floats, scale]]}`.
fn decode_v3(doc: &Value) -> Vec<ForestItem> {
    let mut out = Vec::new();
    let Some(data) = doc.get("data").and_then(Value::as_array) else {
        return out;
    };
    for row in data {
        let Some(cells) = row.as_array() else {
            continue;
        };
        if cells.len() != 14 {
            continue;
        }
        let Some(type_name) = cells[0].as_str() else {
            continue;
        };
        let f: Vec<f64> = cells[1..].iter().filter_map(Value::as_f64).collect();
        if f.len() != 13 {
            continue;
        }
        out.push(ForestItem {
            type_name: type_name.to_string(),
            position: Vec3::new(f[0] as f32, f[1] as f32, f[2] as f32),
            rotation: quat_from_rot9(&f[3..12]),
            scale: f[12] as f32,
        });
    }
    out
}

/// Decodes the newline-delimited `.forest4.json` stream.  Rows without a
/// `type` field and unparsable lines are dropped.
pub fn decode_forest4(text: &str) -> Vec<ForestItem> {
    let mut out = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(rec) = sjson::decode(line) else {
            continue;
        };
        let Some(type_name) = rec.get("type").and_then(Value::as_str) else {
            continue;
        };
        let mut item = ForestItem::new(type_name);
        if let Some(pos) = rec.get("pos") {
            let f = pos.to_float_list();
            if f.len() >= 3 {
                item.position = Vec3::new(f[0] as f32, f[1] as f32, f[2] as f32);
            }
        }
        if let Some(rot) = rec.get("rotationMatrix") {
            item.rotation = quat_from_rot9(&rot.to_float_list());
        } else if let Some(quat) = rec.get("quat") {
            let f = quat.to_float_list();
            if f.len() >= 4 {
                item.rotation =
                    Quat::from_xyzw(f[0] as f32, f[1] as f32, f[2] as f32, f[3] as f32);
            }
        }
        if let Some(scale) = rec.get("scale").and_then(Value::as_f32) {
            item.scale = scale;
        }
        out.push(item);
    }
    out
}
