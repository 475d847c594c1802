// Primitive codec for template fields: element catalogue, little-endian
// element access, bit slicing and alignment arithmetic

pub mod elements;
pub mod types;

pub use elements::{
    read_f32_le, read_i16_le, read_i32_le, read_i8, read_u16_le, read_u32_le, read_u8,
    write_f32_le, write_i16_le, write_i32_le, write_u16_le, write_u32_le, ElementError,
};
pub use types::{align_up, float_text, parse_float_text, slice_bits, Primitive};
