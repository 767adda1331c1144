use byteorder::{ReadBytesExt, BE};
use std::io::Cursor;

use crate::errors::{FormatCause, FormatError};

/// Big-endian cursor over a slice of the class file. Attribute payloads are
/// kept as (offset, length) spans in the parsed model and re-read through a
/// `Reader` when somebody actually needs them.
pub struct Reader<'a> {
    cursor: Cursor<&'a [u8]>,
    end: u64,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Reader<'a> {
        Reader {
            cursor: Cursor::new(bytes),
            end: bytes.len() as u64,
        }
    }

    /// Reader over an attribute payload: positioned at `start`, bounded by
    /// `start + length`.
    pub fn over(bytes: &'a [u8], start: u32, length: u32) -> Reader<'a> {
        let mut cursor = Cursor::new(bytes);
        cursor.set_position(start as u64);
        Reader {
            cursor,
            end: start as u64 + length as u64,
        }
    }

    pub fn position(&self) -> u32 {
        self.cursor.position() as u32
    }

    pub fn remaining(&self) -> u64 {
        self.end.saturating_sub(self.cursor.position())
    }

    fn truncated() -> FormatError {
        FormatError::new(FormatCause::Truncated, "class file ends mid-structure")
    }

    pub fn read_u1(&mut self) -> Result<u8, FormatError> {
        if self.remaining() < 1 {
            return Err(Self::truncated());
        }
        self.cursor.read_u8().map_err(|_| Self::truncated())
    }

    pub fn read_u2(&mut self) -> Result<u16, FormatError> {
        if self.remaining() < 2 {
            return Err(Self::truncated());
        }
        self.cursor.read_u16::<BE>().map_err(|_| Self::truncated())
    }

    pub fn read_u4(&mut self) -> Result<u32, FormatError> {
        if self.remaining() < 4 {
            return Err(Self::truncated());
        }
        self.cursor.read_u32::<BE>().map_err(|_| Self::truncated())
    }

    pub fn read_i4(&mut self) -> Result<i32, FormatError> {
        if self.remaining() < 4 {
            return Err(Self::truncated());
        }
        self.cursor.read_i32::<BE>().map_err(|_| Self::truncated())
    }

    pub fn read_i8(&mut self) -> Result<i64, FormatError> {
        if self.remaining() < 8 {
            return Err(Self::truncated());
        }
        self.cursor.read_i64::<BE>().map_err(|_| Self::truncated())
    }

    pub fn read_f4(&mut self) -> Result<f32, FormatError> {
        Ok(f32::from_bits(self.read_u4()?))
    }

    pub fn read_f8(&mut self) -> Result<f64, FormatError> {
        Ok(f64::from_bits(self.read_i8()? as u64))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, FormatError> {
        if self.remaining() < len as u64 {
            return Err(Self::truncated());
        }
        let pos = self.cursor.position() as usize;
        let out = self.cursor.get_ref()[pos..pos + len].to_vec();
        self.cursor.set_position((pos + len) as u64);
        Ok(out)
    }

    pub fn skip(&mut self, len: u64) -> Result<(), FormatError> {
        if self.remaining() < len {
            return Err(Self::truncated());
        }
        self.cursor.set_position(self.cursor.position() + len);
        Ok(())
    }
}
