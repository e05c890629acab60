use thiserror::Error;

use crate::error::CodestreamError;

/// Returned when a read would run past the end of the buffered data.
///
/// For the incremental parser this is not a failure: it means "wait for
/// more bytes". Inside a fully buffered segment payload it means the
/// declared length was too small, and converts into a [`CodestreamError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("needed {needed} bytes at offset {offset}, only {available} available")]
pub struct InsufficientData {
    pub offset: usize,
    pub needed: usize,
    pub available: usize,
}

impl From<InsufficientData> for CodestreamError {
    fn from(err: InsufficientData) -> Self {
        CodestreamError::InsufficientData {
            needed: err.needed,
            available: err.available,
        }
    }
}

/// Big-endian reader over a byte slice.
///
/// All reads are bounds checked. A failed read leaves the position where it
/// was, so a caller can retry the same read after more data arrives.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Create a cursor starting at `pos` (clamped to the data length).
    pub fn at(data: &'a [u8], pos: usize) -> Self {
        Self {
            data,
            pos: pos.min(data.len()),
        }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Move to an absolute position. Positions past the end clamp to the end.
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos.min(self.data.len());
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    #[inline]
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], InsufficientData> {
        if self.remaining() < n {
            return Err(InsufficientData {
                offset: self.pos,
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn peek_u8(&self) -> Result<u8, InsufficientData> {
        self.data.get(self.pos).copied().ok_or(InsufficientData {
            offset: self.pos,
            needed: 1,
            available: 0,
        })
    }

    pub fn read_u8(&mut self) -> Result<u8, InsufficientData> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, InsufficientData> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, InsufficientData> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i8(&mut self) -> Result<i8, InsufficientData> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_i16(&mut self) -> Result<i16, InsufficientData> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_i32(&mut self) -> Result<i32, InsufficientData> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], InsufficientData> {
        self.take(n)
    }

    /// Read `n` bytes as Latin-1 text (one char per byte).
    pub fn read_ascii_string(&mut self, n: usize) -> Result<String, InsufficientData> {
        Ok(self.take(n)?.iter().map(|&b| b as char).collect())
    }

    /// Skip `n` bytes, failing without moving if they are not all present.
    pub fn skip(&mut self, n: usize) -> Result<(), InsufficientData> {
        self.take(n).map(|_| ())
    }
}
