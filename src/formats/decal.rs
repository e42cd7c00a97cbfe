//! Decal instance decoding: the packed `.tddf` container and the JSON
//! `*.decals.json` layout both produce the same instance map.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use glam::Vec3;
use log::warn;

use super::ByteReader;
use crate::sjson::Value;

/// One placed decal, prior to geometry generation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecalInstance {
    pub position: Vec3,
    pub normal: Vec3,
    pub tangent: Vec3,
    pub rect_index: i32,
    pub size: f32,
    pub render_priority: u8,
}

/// Decal instances grouped by the decal definition they reference.
pub type DecalInstanceMap = BTreeMap<String, Vec<DecalInstance>>;

const TDDF_MAGIC: &[u8; 4] = b"TDDF";

/// Decodes a packed decal container.
///
/// A wrong magic means the file is some other format the caller probed
/// speculatively, so it yields an empty map rather than an error; a
/// truncated body after a valid magic is a real failure.
pub fn decode_tddf(data: &[u8]) -> Result<DecalInstanceMap> {
    let mut reader = ByteReader::new(data);
    let Ok(magic) = reader.bytes(4) else {
        return Ok(DecalInstanceMap::new());
    };
    if magic != TDDF_MAGIC {
        return Ok(DecalInstanceMap::new());
    }
    let _version = reader.u8().context("decal container version")?;
    let names = reader.name_table().context("decal name table")?;

    let count = reader.u32().context("decal instance count")? as usize;
    let mut out = DecalInstanceMap::new();
    for i in 0..count {
        let ctx = || format!("decal instance {i} of {count}");
        let data_index = reader.u8().with_context(ctx)? as usize;
        let position = reader.vec3().with_context(ctx)?;
        let normal = reader.vec3().with_context(ctx)?;
        let tangent = reader.vec3().with_context(ctx)?;
        let rect_index = reader.i32().with_context(ctx)?;
        let size = reader.f32().with_context(ctx)?;
        let render_priority = reader.u8().with_context(ctx)?;
        let name = names
            .get(data_index)
            .map(String::as_str)
            .unwrap_or("Decal")
            .to_string();
        out.entry(name).or_default().push(DecalInstance {
            position,
            normal,
            tangent,
            rect_index,
            size,
            render_priority,
        });
    }
    Ok(out)
}

/// Decodes the JSON decal layout: `{"instances": {name: [[...12 floats]]}}`.
///
/// Each row is `[rectIdx, size, priority, pos.xyz, normal.xyz, tangent.xyz]`;
/// malformed rows are skipped with a warning.
pub fn decode_decals_json(doc: &Value) -> DecalInstanceMap {
    let mut out = DecalInstanceMap::new();
    let Some(instances) = doc.get("instances").and_then(Value::as_object) else {
        return out;
    };
    for (name, rows) in instances {
        let Some(rows) = rows.as_array() else {
            continue;
        };
        let list = out.entry(name.clone()).or_default();
        for row in rows {
            let f = row.to_float_list();
            if f.len() < 12 {
                warn!("decal row for {name} has {} fields, expected 12", f.len());
                continue;
            }
            list.push(DecalInstance {
                rect_index: f[0] as i32,
                size: f[1] as f32,
                render_priority: f[2] as u8,
                position: Vec3::new(f[3] as f32, f[4] as f32, f[5] as f32),
                normal: Vec3::new(f[6] as f32, f[7] as f32, f[8] as f32),
                tangent: Vec3::new(f[9] as f32, f[10] as f32, f[11] as f32),
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sjson::decode;

    fn sample_tddf() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"TDDF");
        data.push(1); // version
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&5u32.to_le_bytes());
        data.extend_from_slice(b"crack");
        data.extend_from_slice(&1u32.to_le_bytes());
        data.push(0); // data index
        for f in [10.0f32, 20.0, 0.5] {
            data.extend_from_slice(&f.to_le_bytes());
        }
        for f in [0.0f32, 0.0, 1.0] {
            data.extend_from_slice(&f.to_le_bytes());
        }
        for f in [1.0f32, 0.0, 0.0] {
            data.extend_from_slice(&f.to_le_bytes());
        }
        data.extend_from_slice(&2i32.to_le_bytes());
        data.extend_from_slice(&1.5f32.to_le_bytes());
        data.push(7);
        data
    }

    #[test]
    fn decodes_packed_container() {
        let map = decode_tddf(&sample_tddf()).unwrap();
        let instances = &map["crack"];
        assert_eq!(instances.len(), 1);
        let inst = instances[0];
        assert_eq!(inst.position, Vec3::new(10.0, 20.0, 0.5));
        assert_eq!(inst.normal, Vec3::Z);
        assert_eq!(inst.rect_index, 2);
        assert_eq!(inst.size, 1.5);
        assert_eq!(inst.render_priority, 7);
    }

    #[test]
    fn wrong_magic_yields_empty_map() {
        assert!(decode_tddf(b"NOPE00000000").unwrap().is_empty());
        assert!(decode_tddf(b"TD").unwrap().is_empty());
    }

    #[test]
    fn truncated_body_is_an_error() {
        let mut data = sample_tddf();
        data.truncate(data.len() - 6);
        assert!(decode_tddf(&data).is_err());
    }

    #[test]
    fn json_layout_matches_packed_fields() {
        let doc = decode(
            r#"{"instances": {"crack": [[2, 1.5, 7, 10, 20, 0.5, 0, 0, 1, 1, 0, 0]]}}"#,
        )
        .unwrap();
        let map = decode_decals_json(&doc);
        assert_eq!(map["crack"][0], decode_tddf(&sample_tddf()).unwrap()["crack"][0]);
    }

    #[test]
    fn short_json_rows_are_dropped() {
        let doc = decode(r#"{"instances": {"crack": [[1, 2, 3]]}}"#).unwrap();
        assert!(decode_decals_json(&doc)["crack"].is_empty());
    }
}
