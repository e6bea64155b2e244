//! Bounds-checked byte cursor shared by the binary parsers.
//!
//! DEX and binary XML are little-endian, class files are big-endian; the
//! reader exposes both flavours instead of carrying an endianness flag.

use crate::error::{FormatError, FormatResult};

#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn at(data: &'a [u8], pos: usize) -> FormatResult<Self> {
        let mut reader = Self::new(data);
        reader.seek(pos)?;
        Ok(reader)
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn seek(&mut self, pos: usize) -> FormatResult<()> {
        if pos > self.data.len() {
            return Err(FormatError::UnexpectedEof {
                offset: pos,
                needed: 0,
            });
        }
        self.pos = pos;
        Ok(())
    }

    pub fn skip(&mut self, n: usize) -> FormatResult<()> {
        self.bytes(n).map(|_| ())
    }

    pub fn bytes(&mut self, n: usize) -> FormatResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or(FormatError::UnexpectedEof {
                offset: self.pos,
                needed: n,
            })?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> FormatResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> FormatResult<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn u16_le(&mut self) -> FormatResult<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn u32_le(&mut self) -> FormatResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn u16_be(&mut self) -> FormatResult<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub fn u32_be(&mut self) -> FormatResult<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub fn i32_be(&mut self) -> FormatResult<i32> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    pub fn u64_be(&mut self) -> FormatResult<u64> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    pub fn uleb128(&mut self) -> FormatResult<u32> {
        let start = self.pos;
        let mut result = 0u32;
        for i in 0..5 {
            let byte = self.u8()?;
            result |= u32::from(byte & 0x7f) << (i * 7);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(FormatError::Malformed(format!("uleb128 at {start:#x}")))
    }

    pub fn sleb128(&mut self) -> FormatResult<i32> {
        let start = self.pos;
        let mut result = 0i32;
        let mut shift = 0u32;
        for _ in 0..5 {
            let byte = self.u8()?;
            result |= i32::from(byte & 0x7f) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 32 && byte & 0x40 != 0 {
                    result |= -1i32 << shift;
                }
                return Ok(result);
            }
        }
        Err(FormatError::Malformed(format!("sleb128 at {start:#x}")))
    }

    /// Reads a NUL-terminated modified UTF-8 string.
    pub fn mutf8_cstr(&mut self) -> FormatResult<String> {
        let rest = &self.data[self.pos..];
        let len = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or(FormatError::UnexpectedEof {
                offset: self.pos,
                needed: rest.len() + 1,
            })?;
        let raw = self.bytes(len)?;
        self.pos += 1;
        Ok(decode_mutf8(raw))
    }
}

/// Decodes modified UTF-8 (DEX string data, class-file `Utf8` constants).
///
/// Supplementary characters arrive as two encoded surrogates, so decoding goes
/// through UTF-16 code units. Invalid sequences become U+FFFD.
pub fn decode_mutf8(raw: &[u8]) -> String {
    let mut units: Vec<u16> = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let b0 = raw[i];
        if b0 & 0x80 == 0 {
            units.push(u16::from(b0));
            i += 1;
        } else if b0 & 0xe0 == 0xc0 && i + 1 < raw.len() && raw[i + 1] & 0xc0 == 0x80 {
            units.push((u16::from(b0 & 0x1f) << 6) | u16::from(raw[i + 1] & 0x3f));
            i += 2;
        } else if b0 & 0xf0 == 0xe0
            && i + 2 < raw.len()
            && raw[i + 1] & 0xc0 == 0x80
            && raw[i + 2] & 0xc0 == 0x80
        {
            units.push(
                (u16::from(b0 & 0x0f) << 12)
                    | (u16::from(raw[i + 1] & 0x3f) << 6)
                    | u16::from(raw[i + 2] & 0x3f),
            );
            i += 3;
        } else {
            units.push(0xfffd);
            i += 1;
        }
    }
    String::from_utf16_lossy(&units)
}
