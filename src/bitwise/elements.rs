// Little-endian element reads and writes for template primitives

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ElementError {
    #[error("Insufficient data: expected {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, ElementError>;

fn take<const N: usize>(data: &[u8]) -> Result<[u8; N]> {
    data.get(..N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(ElementError::InsufficientData {
            expected: N,
            actual: data.len(),
        })
}

/// Read a u8
pub fn read_u8(data: &[u8]) -> Result<u8> {
    take::<1>(data).map(|b| b[0])
}

/// Read an i8
pub fn read_i8(data: &[u8]) -> Result<i8> {
    take::<1>(data).map(|b| b[0] as i8)
}

/// Read a u16 in little-endian format
pub fn read_u16_le(data: &[u8]) -> Result<u16> {
    take(data).map(u16::from_le_bytes)
}

/// Read an i16 in little-endian format
pub fn read_i16_le(data: &[u8]) -> Result<i16> {
    take(data).map(i16::from_le_bytes)
}

/// Read a u32 in little-endian format
pub fn read_u32_le(data: &[u8]) -> Result<u32> {
    take(data).map(u32::from_le_bytes)
}

/// Read an i32 in little-endian format
pub fn read_i32_le(data: &[u8]) -> Result<i32> {
    take(data).map(i32::from_le_bytes)
}

/// Read an IEEE-754 single in little-endian format
pub fn read_f32_le(data: &[u8]) -> Result<f32> {
    take(data).map(f32::from_le_bytes)
}

/// Write a u16 in little-endian format
pub fn write_u16_le(value: u16) -> [u8; 2] {
    value.to_le_bytes()
}

/// Write an i16 in little-endian format
pub fn write_i16_le(value: i16) -> [u8; 2] {
    value.to_le_bytes()
}

/// Write a u32 in little-endian format
pub fn write_u32_le(value: u32) -> [u8; 4] {
    value.to_le_bytes()
}

/// Write an i32 in little-endian format
pub fn write_i32_le(value: i32) -> [u8; 4] {
    value.to_le_bytes()
}

/// Write an IEEE-754 single in little-endian format
pub fn write_f32_le(value: f32) -> [u8; 4] {
    value.to_le_bytes()
}
