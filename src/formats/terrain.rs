//! `.ter` heightfield decoding.
//!
//! Version 7+ carries its grid size and a trailing material name table;
//! the legacy generation (versions 1..6) is a fixed 256x256 grid whose
//! layer byte packs flags in the high bits, leaving 3 bits (8 materials)
//! for the layer id.

use anyhow::{anyhow, Context, Result};

use super::ByteReader;

/// The hole marker in the layer map.
pub const HOLE_LAYER: u8 = 255;

const LEGACY_SIZE: usize = 256;
const LEGACY_MATERIAL_GROUPS: usize = 8;
const MAX_NAME_LEN: usize = 20_000_000;

/// Decoded heightfield: square grids of raw u16 heights and per-cell
/// layer ids, row-major with `y * size + x` indexing.
#[derive(Debug, Clone, PartialEq)]
pub struct TerrainData {
    pub version: u8,
    pub size: usize,
    pub heights: Vec<u16>,
    pub layers: Vec<u8>,
    pub material_names: Vec<String>,
}

impl TerrainData {
    pub fn height(&self, x: usize, y: usize) -> u16 {
        self.heights[y * self.size + x]
    }

    pub fn layer(&self, x: usize, y: usize) -> u8 {
        self.layers[y * self.size + x]
    }

    /// World height multiplier for a block's `maxHeight` in meters.
    pub fn height_scale(max_height: f32) -> f32 {
        max_height / 65536.0
    }
}

pub fn decode_ter(data: &[u8]) -> Result<TerrainData> {
    let mut reader = ByteReader::new(data);
    let version = reader.u8().context("terrain version byte")?;
    if version >= 7 {
        decode_modern(&mut reader, version)
    } else {
        decode_legacy(&mut reader, version)
    }
}

fn read_heights(reader: &mut ByteReader<'_>, n: usize) -> Result<Vec<u16>> {
    let raw = reader.bytes(n * 2).context("terrain height samples")?;
    Ok(raw
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect())
}

/// Reads one `u32 length + bytes` string, with a sanity cap: a length in
/// the tens of megabytes means the stream is desynchronized, and
/// continuing would allocate garbage.  `Ok(None)` signals plain
/// truncation, which callers treat as "no more names".
fn read_name(reader: &mut ByteReader<'_>) -> Result<Option<String>> {
    let Ok(len) = reader.u32() else {
        return Ok(None);
    };
    let len = len as usize;
    if len > MAX_NAME_LEN {
        return Err(anyhow!("unreasonable string length {len} in terrain file"));
    }
    match reader.bytes(len) {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(bytes).into_owned())),
        Err(_) => Ok(None),
    }
}

fn decode_modern(reader: &mut ByteReader<'_>, version: u8) -> Result<TerrainData> {
    let size = reader.u32().context("terrain grid size")? as usize;
    let n = size
        .checked_mul(size)
        .ok_or_else(|| anyhow!("terrain grid size {size} overflows"))?;
    let heights = read_heights(reader, n)?;
    let layers = reader.bytes(n).context("terrain layer map")?.to_vec();
    // Per-cell texture map, unused here.
    reader.skip(n * 4).context("terrain texture map")?;

    // The name table is absent in some exports; a truncated one reads as
    // empty rather than failing the whole terrain.  The length cap stays a
    // hard error because it signals a corrupt stream, not a short one.
    let mut material_names = Vec::new();
    if let Ok(count) = reader.u32() {
        for _ in 0..count {
            match read_name(reader)? {
                Some(name) => material_names.push(name),
                None => {
                    material_names.clear();
                    break;
                }
            }
        }
    }

    Ok(TerrainData {
        version,
        size,
        heights,
        layers,
        material_names,
    })
}

fn decode_legacy(reader: &mut ByteReader<'_>, version: u8) -> Result<TerrainData> {
    let size = LEGACY_SIZE;
    let n = size * size;
    let heights = read_heights(reader, n)?;
    let layers: Vec<u8> = reader
        .bytes(n)
        .context("legacy terrain material groups")?
        .iter()
        .map(|b| b & 0x07)
        .collect();

    let mut material_names = Vec::new();
    let mut failed = false;
    for _ in 0..LEGACY_MATERIAL_GROUPS {
        match read_name(reader)? {
            Some(name) => {
                if !name.is_empty() {
                    material_names.push(name);
                }
            }
            None => {
                failed = true;
                break;
            }
        }
    }
    if failed {
        material_names = (0..LEGACY_MATERIAL_GROUPS)
            .map(|i| format!("LegacyMat{i}"))
            .collect();
    }

    Ok(TerrainData {
        version,
        size,
        heights,
        layers,
        material_names,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_name(data: &mut Vec<u8>, name: &str) {
        data.extend_from_slice(&(name.len() as u32).to_le_bytes());
        data.extend_from_slice(name.as_bytes());
    }

    fn sample_v8(size: usize, names: &[&str]) -> Vec<u8> {
        let n = size * size;
        let mut data = vec![8u8];
        data.extend_from_slice(&(size as u32).to_le_bytes());
        for i in 0..n {
            data.extend_from_slice(&(i as u16).to_le_bytes());
        }
        data.extend(std::iter::repeat(0u8).take(n));
        data.extend(std::iter::repeat(0u8).take(n * 4));
        data.extend_from_slice(&(names.len() as u32).to_le_bytes());
        for name in names {
            push_name(&mut data, name);
        }
        data
    }

    #[test]
    fn decodes_modern_terrain() {
        let ter = decode_ter(&sample_v8(4, &["grass", "rock"])).unwrap();
        assert_eq!(ter.version, 8);
        assert_eq!(ter.size, 4);
        assert_eq!(ter.height(1, 0), 1);
        assert_eq!(ter.height(0, 1), 4);
        assert_eq!(ter.material_names, vec!["grass", "rock"]);
    }

    #[test]
    fn truncated_name_table_reads_empty() {
        let mut data = sample_v8(2, &["grass"]);
        data.truncate(data.len() - 3);
        let ter = decode_ter(&data).unwrap();
        assert!(ter.material_names.is_empty());
    }

    #[test]
    fn absurd_name_length_is_fatal() {
        let mut data = sample_v8(2, &[]);
        data.truncate(data.len() - 4);
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&(MAX_NAME_LEN as u32 + 1).to_le_bytes());
        assert!(decode_ter(&data).is_err());
    }

    #[test]
    fn legacy_terrain_masks_layer_bits() {
        let n = LEGACY_SIZE * LEGACY_SIZE;
        let mut data = vec![3u8];
        data.extend(std::iter::repeat(0u8).take(n * 2));
        // High bits are flags and must be stripped.
        data.extend(std::iter::repeat(0xF5u8).take(n));
        for i in 0..LEGACY_MATERIAL_GROUPS {
            push_name(&mut data, &format!("mat{i}"));
        }
        let ter = decode_ter(&data).unwrap();
        assert_eq!(ter.size, LEGACY_SIZE);
        assert_eq!(ter.layer(0, 0), 0x05);
        assert_eq!(ter.material_names.len(), LEGACY_MATERIAL_GROUPS);
    }

    #[test]
    fn legacy_missing_names_get_placeholders() {
        let n = LEGACY_SIZE * LEGACY_SIZE;
        let mut data = vec![3u8];
        data.extend(std::iter::repeat(0u8).take(n * 3));
        let ter = decode_ter(&data).unwrap();
        assert_eq!(ter.material_names[0], "LegacyMat0");
        assert_eq!(ter.material_names.len(), LEGACY_MATERIAL_GROUPS);
    }

    #[test]
    fn height_scale_example() {
        // maxHeight 1000 over the full u16 range.
        assert!((TerrainData::height_scale(1000.0) - 0.0152587890625).abs() < 1e-9);
    }
}
