// Primitive catalogue for template declarations

use std::fmt;

/// Built-in base types a declaration may name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Byte,
    Char,
    Int8,
    Int16,
    Word,
    Int32,
    Dword,
    Float,
    WcharT,
}

impl Primitive {
    pub const ALL: [Primitive; 9] = [
        Primitive::Byte,
        Primitive::Char,
        Primitive::Int8,
        Primitive::Int16,
        Primitive::Word,
        Primitive::Int32,
        Primitive::Dword,
        Primitive::Float,
        Primitive::WcharT,
    ];

    /// Look up a primitive by its declaration name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.name().eq_ignore_ascii_case(name))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Primitive::Byte => "byte",
            Primitive::Char => "char",
            Primitive::Int8 => "int8",
            Primitive::Int16 => "int16",
            Primitive::Word => "word",
            Primitive::Int32 => "int32",
            Primitive::Dword => "dword",
            Primitive::Float => "float",
            Primitive::WcharT => "wchar_t",
        }
    }

    /// Width in bytes of one element
    pub fn width(&self) -> usize {
        match self {
            Primitive::Byte | Primitive::Char | Primitive::Int8 => 1,
            Primitive::Int16 | Primitive::Word | Primitive::WcharT => 2,
            Primitive::Int32 | Primitive::Dword | Primitive::Float => 4,
        }
    }

    /// String primitives read as bounded null-terminated runs
    pub fn is_string(&self) -> bool {
        matches!(self, Primitive::Char | Primitive::WcharT)
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Primitive::Byte
                | Primitive::Int8
                | Primitive::Int16
                | Primitive::Word
                | Primitive::Int32
                | Primitive::Dword
        )
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Keep the low `bits` bits of `value`; no sign extension is applied first
pub fn slice_bits(value: i64, bits: u32) -> i64 {
    if bits >= 64 {
        return value;
    }
    ((1i64 << bits) - 1) & value
}

/// Round `cursor` up to the next multiple of `align` (0 and 1 leave it unchanged)
pub fn align_up(cursor: usize, align: usize) -> usize {
    if align <= 1 {
        return cursor;
    }
    match cursor % align {
        0 => cursor,
        rem => cursor + (align - rem),
    }
}

/// Text for a `float` field that parses back to the same bits.
/// NaNs carry their raw bits, e.g. `NaN(0xFF800001)`.
pub fn float_text(value: f32) -> String {
    if value.is_nan() {
        format!("NaN(0x{:08X})", value.to_bits())
    } else {
        value.to_string()
    }
}

/// Inverse of [`float_text`]; also accepts any plain `f32` literal
pub fn parse_float_text(text: &str) -> Option<f32> {
    let text = text.trim();
    if let Some(bits) = text
        .strip_prefix("NaN(0x")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        return u32::from_str_radix(bits, 16).ok().map(f32::from_bits);
    }
    text.parse().ok()
}
