use std::ffi::CStr;

use crate::error::{Error, Result};

/// Bounds-checked little-endian cursor over one section.
///
/// Offsets reported by [`Reader::offset`] are absolute within the section, so a
/// reader restricted to one compilation unit still produces section offsets.
#[derive(Debug, Clone, Copy)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            end: data.len(),
        }
    }

    /// A reader over `data[offset..]`.
    pub fn at(data: &'a [u8], offset: u64) -> Result<Self> {
        let pos = usize::try_from(offset)
            .ok()
            .filter(|&pos| pos <= data.len())
            .ok_or(Error::TruncatedInput { offset })?;
        Ok(Self {
            data,
            pos,
            end: data.len(),
        })
    }

    /// Restrict the reader so nothing at or past `end` can be read.
    pub fn bounded(self, end: u64) -> Result<Self> {
        let end = usize::try_from(end)
            .ok()
            .filter(|&end| end >= self.pos && end <= self.end)
            .ok_or(Error::TruncatedInput {
                offset: self.end as u64,
            })?;
        Ok(Self { end, ..self })
    }

    pub fn offset(&self) -> u64 {
        self.pos as u64
    }

    pub fn end(&self) -> u64 {
        self.end as u64
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.end
    }

    pub fn remaining(&self) -> usize {
        self.end - self.pos
    }

    fn truncated(&self) -> Error {
        Error::TruncatedInput {
            offset: self.offset(),
        }
    }

    pub fn consume_chunk<const N: usize>(&mut self) -> Result<&'a [u8; N]> {
        let Some((chunk, _)) = self.data[self.pos..self.end].split_first_chunk::<N>() else {
            return Err(self.truncated());
        };
        self.pos += N;
        Ok(chunk)
    }

    pub fn consume_n(&mut self, n: u64) -> Result<&'a [u8]> {
        let n = usize::try_from(n)
            .ok()
            .filter(|&n| n <= self.remaining())
            .ok_or_else(|| self.truncated())?;
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    pub fn consume_first(&mut self) -> Result<u8> {
        Ok(self.consume_chunk::<1>()?[0])
    }

    pub fn consume_u16_le(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(*self.consume_chunk::<2>()?))
    }

    pub fn consume_u24_le(&mut self) -> Result<u32> {
        let [a, b, c] = *self.consume_chunk::<3>()?;
        Ok(u32::from_le_bytes([a, b, c, 0]))
    }

    pub fn consume_u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(*self.consume_chunk::<4>()?))
    }

    pub fn consume_u64_le(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(*self.consume_chunk::<8>()?))
    }

    /// A section offset: 8 bytes in DWARF64, 4 bytes otherwise.
    pub fn consume_offset(&mut self, dwarf64: bool) -> Result<u64> {
        match dwarf64 {
            true => self.consume_u64_le(),
            false => self.consume_u32_le().map(u64::from),
        }
    }

    /// An unsigned little-endian integer of 1, 2, 3, 4 or 8 bytes.
    pub fn consume_uint_le(&mut self, width: u8) -> Result<u64> {
        match width {
            1 => self.consume_first().map(u64::from),
            2 => self.consume_u16_le().map(u64::from),
            3 => self.consume_u24_le().map(u64::from),
            4 => self.consume_u32_le().map(u64::from),
            8 => self.consume_u64_le(),
            _ => Err(Error::UnsupportedAddressSize(width)),
        }
    }

    /// Bytes up to and including the next nul, returned without it.
    pub fn consume_cstr(&mut self) -> Result<&'a CStr> {
        let rest = &self.data[self.pos..self.end];
        let Some(nul) = memchr::memchr(0, rest) else {
            return Err(Error::TruncatedInput {
                offset: self.end as u64,
            });
        };
        let cstr = CStr::from_bytes_with_nul(&rest[..=nul]).map_err(|_| self.truncated())?;
        self.pos += nul + 1;
        Ok(cstr)
    }
}
