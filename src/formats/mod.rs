//! Binary decoders for the game's asset container formats.

pub mod decal;
pub mod dts;
pub mod forest;
pub mod terrain;

use anyhow::{anyhow, Result};

/// Little-endian cursor over an in-memory buffer.
///
/// All the binary formats handled here are little-endian; every read
/// checks bounds and reports the failing offset.
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(anyhow!(
                "unexpected end of data at offset {} (wanted {len} bytes, {} left)",
                self.pos,
                self.remaining()
            ));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.bytes(len).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i32(&mut self) -> Result<i32> {
        let b = self.bytes(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn f32(&mut self) -> Result<f32> {
        let b = self.bytes(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn vec3(&mut self) -> Result<glam::Vec3> {
        Ok(glam::Vec3::new(self.f32()?, self.f32()?, self.f32()?))
    }

    /// Reads a u32-length-prefixed UTF-8 string; invalid sequences are
    /// replaced rather than rejected.
    pub fn prefixed_string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let bytes = self.bytes(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Reads the `count (len bytes)*` name table shared by several formats.
    pub fn name_table(&mut self) -> Result<Vec<String>> {
        let count = self.u32()? as usize;
        let mut names = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            names.push(self.prefixed_string()?);
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_primitives_and_reports_exhaustion() {
        let data = [0x01, 0x02, 0x00, 0x00, 0x00];
        let mut reader = ByteReader::new(&data);
        assert_eq!(reader.u8().unwrap(), 1);
        assert_eq!(reader.u32().unwrap(), 2);
        assert_eq!(reader.remaining(), 0);
        assert!(reader.u8().is_err());
    }

    #[test]
    fn name_table_round_trip() {
        let mut data = Vec::new();
        data.extend_from_slice(&2u32.to_le_bytes());
        for name in ["oak", "pine_tall"] {
            data.extend_from_slice(&(name.len() as u32).to_le_bytes());
            data.extend_from_slice(name.as_bytes());
        }
        let mut reader = ByteReader::new(&data);
        assert_eq!(reader.name_table().unwrap(), vec!["oak", "pine_tall"]);
    }
}
