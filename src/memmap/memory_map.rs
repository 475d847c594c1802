// Read-only memory map over the buffer a template is parsed against

use crate::bitwise::{self, ElementError, Primitive};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemoryMapError {
    #[error("Read of {length} bytes at offset {offset:#x} exceeds buffer of {size} bytes")]
    OutOfBounds {
        offset: usize,
        length: usize,
        size: usize,
    },

    #[error("Element decode failed: {0}")]
    Element(#[from] ElementError),
}

pub type Result<T> = std::result::Result<T, MemoryMapError>;

/// A raw value read for a primitive, before any formatting
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawValue {
    Int(i64),
    Float(f32),
}

/// Bounds-checked view over a byte buffer
/// Borrowed, so concurrent parses can share one buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryMap<'a> {
    data: &'a [u8],
}

impl<'a> MemoryMap<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get a chunk of memory from @start for @length bytes
    /// If length is None, returns all data from @start to end
    pub fn get(&self, start: usize, length: Option<usize>) -> Result<&'a [u8]> {
        let size = self.data.len();
        let end = match length {
            Some(len) => start.checked_add(len),
            None => Some(size),
        };
        match end {
            Some(end) if start <= end && end <= size => Ok(&self.data[start..end]),
            _ => Err(MemoryMapError::OutOfBounds {
                offset: start,
                length: length.unwrap_or(0),
                size,
            }),
        }
    }

    /// Read one fixed-width primitive at @offset
    pub fn read_primitive(&self, primitive: Primitive, offset: usize) -> Result<RawValue> {
        let bytes = self.get(offset, Some(primitive.width()))?;
        let value = match primitive {
            Primitive::Byte | Primitive::Char => RawValue::Int(bitwise::read_u8(bytes)? as i64),
            Primitive::Int8 => RawValue::Int(bitwise::read_i8(bytes)? as i64),
            Primitive::Word | Primitive::WcharT => {
                RawValue::Int(bitwise::read_u16_le(bytes)? as i64)
            }
            Primitive::Int16 => RawValue::Int(bitwise::read_i16_le(bytes)? as i64),
            Primitive::Dword => RawValue::Int(bitwise::read_u32_le(bytes)? as i64),
            Primitive::Int32 => RawValue::Int(bitwise::read_i32_le(bytes)? as i64),
            Primitive::Float => RawValue::Float(bitwise::read_f32_le(bytes)?),
        };
        Ok(value)
    }

    /// Read a null-terminated run of at most @count units of a string primitive.
    /// The whole declared span must lie inside the buffer.
    pub fn read_string(&self, primitive: Primitive, offset: usize, count: usize) -> Result<String> {
        let span = self.get(offset, Some(count.saturating_mul(primitive.width())))?;
        let text = match primitive {
            Primitive::WcharT => {
                let units: Vec<u16> = span
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .take_while(|&unit| unit != 0)
                    .collect();
                String::from_utf16_lossy(&units)
            }
            _ => span
                .iter()
                .take_while(|&&b| b != 0)
                .map(|&b| b as char)
                .collect(),
        };
        Ok(text)
    }
}
