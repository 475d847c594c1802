// Type declaration grammar:
//   <base>[<count>]        array (or bounded string) of <count> elements
//   <base>:<bits>          bitfield over the full base primitive
//   ...; align:N read:fn write:fn

use super::expr::Expression;
use super::scope::Scope;
use super::{Result, TemplateError};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref ARRAY_DECL: Regex = Regex::new(r"^(.+?)\[(.+)\]$").unwrap();
    static ref BITFIELD_DECL: Regex = Regex::new(r"^(\w+):(.+)$").unwrap();
}

/// Widest bitfield that can be sliced from a primitive
pub const MAX_BITS: u32 = 32;

/// Per-field modifiers from the trailing `;` segment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flags {
    /// Pad the cursor to a multiple of this many bytes after the field
    pub align: usize,
    /// Transform applied to parsed values
    pub read: Option<String>,
    /// Transform applied to values before they are dumped
    pub write: Option<String>,
}

impl Flags {
    /// Parse flag segments: whitespace or `;` separated `key:value` tokens
    pub fn parse(segments: &str) -> Result<Self> {
        let mut flags = Flags::default();
        let tokens = segments
            .split(|c: char| c == ';' || c.is_whitespace())
            .filter(|token| !token.is_empty());

        for token in tokens {
            let (key, value) = token
                .split_once(':')
                .filter(|(_, value)| !value.is_empty())
                .ok_or_else(|| TemplateError::Schema(format!("malformed flag `{}`", token)))?;
            match key {
                "align" => {
                    flags.align = value.parse().map_err(|_| {
                        TemplateError::Schema(format!("align expects a byte count, got `{}`", value))
                    })?;
                }
                "read" => flags.read = Some(value.to_string()),
                "write" => flags.write = Some(value.to_string()),
                other => {
                    return Err(TemplateError::Schema(format!("unknown flag `{}`", other)));
                }
            }
        }
        Ok(flags)
    }
}

/// A declaration resolved against the current scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSpec {
    /// Primitive or custom structure name
    pub base: String,
    pub count: usize,
    pub bits: Option<u32>,
    pub flags: Flags,
}

impl TypeSpec {
    /// Declaration for one element of an array of this type.
    /// Transforms carry over to the elements, alignment stays with the array.
    pub fn element_declaration(&self) -> String {
        let mut declaration = self.base.clone();
        let transforms: Vec<String> = [("read", &self.flags.read), ("write", &self.flags.write)]
            .into_iter()
            .filter_map(|(key, name)| name.as_ref().map(|name| format!("{}:{}", key, name)))
            .collect();
        if !transforms.is_empty() {
            declaration.push_str("; ");
            declaration.push_str(&transforms.join(" "));
        }
        declaration
    }
}

/// Parse a declaration string, evaluating count and bit-width expressions
/// against `scope`
pub fn parse_type(declared: &str, scope: &Scope) -> Result<TypeSpec> {
    let (body, flags) = match declared.split_once(';') {
        Some((body, segments)) => (body.trim(), Flags::parse(segments)?),
        None => (declared.trim(), Flags::default()),
    };

    if let Some(caps) = ARRAY_DECL.captures(body) {
        return Ok(TypeSpec {
            base: caps[1].trim().to_string(),
            count: eval_integer(&caps[2], scope, "array count")?,
            bits: None,
            flags,
        });
    }

    if let Some(caps) = BITFIELD_DECL.captures(body) {
        let bits = eval_integer(&caps[2], scope, "bit width")?;
        let bits = u32::try_from(bits)
            .ok()
            .filter(|bits| (1..=MAX_BITS).contains(bits))
            .ok_or_else(|| {
                TemplateError::Type(format!(
                    "bit width {} in `{}` must be between 1 and {}",
                    bits, declared, MAX_BITS
                ))
            })?;
        return Ok(TypeSpec {
            base: caps[1].to_string(),
            count: 1,
            bits: Some(bits),
            flags,
        });
    }

    Ok(TypeSpec {
        base: body.to_string(),
        count: 1,
        bits: None,
        flags,
    })
}

/// Integer literal, or an expression over the scope that yields one
fn eval_integer(text: &str, scope: &Scope, what: &str) -> Result<usize> {
    let text = text.trim();
    if let Ok(value) = text.parse::<usize>() {
        return Ok(value);
    }

    let expression = Expression::parse(text).map_err(|_| {
        TemplateError::Type(format!("{} `{}` is not an integer expression", what, text))
    })?;
    expression.evaluate(scope)?.as_count().map_err(|e| {
        TemplateError::Type(format!("{} `{}` did not resolve to an integer: {}", what, text, e))
    })
}
