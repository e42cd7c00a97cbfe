//! Three-tier memory-buffer reader for packed shapes.
//!
//! A shape's assembly buffer interleaves 32-bit, 16-bit and 8-bit data in
//! three regions of one allocation, each with its own cursor.  Guard
//! values are written into all three streams at known points; a guard
//! mismatch means the reader has drifted and everything after it would be
//! garbage, so it is a hard error.

use anyhow::{anyhow, Result};

pub struct TsAlloc<'a> {
    data: &'a [u8],
    ptr32: usize,
    ptr16: usize,
    ptr8: usize,
    guard32: i32,
    guard16: u16,
    guard8: u8,
}

impl<'a> TsAlloc<'a> {
    /// `start_u16` and `start_u8` are in 32-bit words from the buffer
    /// start, as stored in the file header.
    pub fn new(data: &'a [u8], start_u16: usize, start_u8: usize) -> Self {
        Self {
            data,
            ptr32: 0,
            ptr16: start_u16 * 4,
            ptr8: start_u8 * 4,
            guard32: 0,
            guard16: 0,
            guard8: 0,
        }
    }

    fn take(&mut self, tier: &'static str, ptr: &mut usize, len: usize) -> Result<&'a [u8]> {
        let end = ptr
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                anyhow!("shape buffer exhausted in {tier} tier at offset {ptr} (wanted {len} bytes)")
            })?;
        let slice = &self.data[*ptr..end];
        *ptr = end;
        Ok(slice)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let mut ptr = self.ptr32;
        let b = self.take("32-bit", &mut ptr, 4)?;
        self.ptr32 = ptr;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_i32()? as u32))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        let mut ptr = self.ptr16;
        let b = self.take("16-bit", &mut ptr, 2)?;
        self.ptr16 = ptr;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut ptr = self.ptr8;
        let b = self.take("8-bit", &mut ptr, 1)?;
        self.ptr8 = ptr;
        Ok(b[0])
    }

    pub fn read_f32_list(&mut self, count: usize) -> Result<Vec<f32>> {
        let mut ptr = self.ptr32;
        let b = self.take("32-bit", &mut ptr, count * 4)?;
        self.ptr32 = ptr;
        Ok(b.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    pub fn read_i32_list(&mut self, count: usize) -> Result<Vec<i32>> {
        let mut ptr = self.ptr32;
        let b = self.take("32-bit", &mut ptr, count * 4)?;
        self.ptr32 = ptr;
        Ok(b.chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    pub fn read_i16_list(&mut self, count: usize) -> Result<Vec<i16>> {
        let mut ptr = self.ptr16;
        let b = self.take("16-bit", &mut ptr, count * 2)?;
        self.ptr16 = ptr;
        Ok(b.chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect())
    }

    pub fn skip32(&mut self, count: usize) -> Result<()> {
        let mut ptr = self.ptr32;
        self.take("32-bit", &mut ptr, count * 4)?;
        self.ptr32 = ptr;
        Ok(())
    }

    pub fn skip16(&mut self, count: usize) -> Result<()> {
        let mut ptr = self.ptr16;
        self.take("16-bit", &mut ptr, count * 2)?;
        self.ptr16 = ptr;
        Ok(())
    }

    pub fn skip8(&mut self, count: usize) -> Result<()> {
        let mut ptr = self.ptr8;
        self.take("8-bit", &mut ptr, count)?;
        self.ptr8 = ptr;
        Ok(())
    }

    /// Consumes and verifies one guard triple, then advances the expected
    /// values (the narrow tiers wrap at their width).
    pub fn check_guard(&mut self) -> Result<()> {
        let got32 = self.read_i32()?;
        if got32 != self.guard32 {
            return Err(anyhow!(
                "bad 32-bit shape guard: wanted {}, got {got32}",
                self.guard32
            ));
        }
        let got16 = self.read_i16()? as u16;
        if got16 != self.guard16 {
            return Err(anyhow!(
                "bad 16-bit shape guard: wanted {}, got {got16}",
                self.guard16
            ));
        }
        let got8 = self.read_u8()?;
        if got8 != self.guard8 {
            return Err(anyhow!(
                "bad 8-bit shape guard: wanted {}, got {got8}",
                self.guard8
            ));
        }
        self.guard32 += 1;
        self.guard16 = self.guard16.wrapping_add(1);
        self.guard8 = self.guard8.wrapping_add(1);
        Ok(())
    }
}
