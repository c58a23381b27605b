//! Bounds-checked little-endian reads over a file image.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{ContainerError, Result};

pub(crate) fn truncated(what: &str) -> ContainerError {
    ContainerError::BadImage(format!("truncated {what}"))
}

/// Read position within a byte slice.
#[derive(Debug, Clone)]
pub(crate) struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// A cursor at file address `addr`.
    pub fn at(data: &'a [u8], addr: u64, what: &str) -> Result<Self> {
        let pos = usize::try_from(addr).map_err(|_| truncated(what))?;
        if pos > data.len() {
            return Err(truncated(what));
        }
        Ok(Self { data, pos })
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(truncated("structure"));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    /// An unsigned integer stored in `width` bytes (1 to 8).
    pub fn uint(&mut self, width: usize) -> Result<u64> {
        if width == 0 || width > 8 {
            return Err(ContainerError::BadImage(format!("bad field width {width}")));
        }
        Ok(LittleEndian::read_uint(self.take(width)?, width))
    }

    /// A NUL-terminated string. The terminator is consumed.
    pub fn cstr(&mut self) -> Result<String> {
        let rest = &self.data[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| truncated("name"))?;
        let s = String::from_utf8(rest[..end].to_vec())
            .map_err(|_| ContainerError::BadImage("name is not UTF-8".into()))?;
        self.pos += end + 1;
        Ok(s)
    }

    /// A NUL-terminated string padded to a multiple of `align` bytes.
    pub fn cstr_padded(&mut self, align: usize) -> Result<String> {
        let start = self.pos;
        let s = self.cstr()?;
        let used = self.pos - start;
        let padded = used.div_ceil(align) * align;
        self.skip(padded - used)?;
        Ok(s)
    }
}

/// Bytes needed to store offsets within an object of `size` bytes.
pub(crate) fn offset_width(size: u64) -> usize {
    match size {
        0..=0xff => 1,
        0x100..=0xffff => 2,
        0x1_0000..=0xff_ffff => 3,
        _ => 4,
    }
}

/// Append `value` as a `width`-byte little-endian integer.
pub(crate) fn put_uint(out: &mut Vec<u8>, value: u64, width: usize) {
    out.extend_from_slice(&value.to_le_bytes()[..width]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_fields_in_order() {
        let bytes = [1u8, 0x34, 0x12, b'a', b'b', 0, 0, 0, 9];
        let mut c = Cursor::new(&bytes);
        assert_eq!(c.u8().unwrap(), 1);
        assert_eq!(c.u16().unwrap(), 0x1234);
        assert_eq!(c.cstr_padded(4).unwrap(), "ab");
        assert_eq!(c.pos(), 7);
        assert_eq!(c.uint(2).unwrap(), 0x0900);
        assert!(matches!(c.u8(), Err(ContainerError::BadImage(_))));
    }

    #[test]
    fn offset_widths() {
        assert_eq!(offset_width(12), 1);
        assert_eq!(offset_width(256), 2);
        assert_eq!(offset_width(70_000), 3);
    }
}
