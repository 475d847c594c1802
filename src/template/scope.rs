// Per-structure scope: values produced so far, addressable from expressions

use super::{Result, TemplateError};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;

lazy_static! {
    static ref ELEMENT_TITLE: Regex = Regex::new(r"^(.+)\[(\d+)\]$").unwrap();
}

/// A scalar produced by a field or an expression
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Interpret a leaf's textual value: integer, then float, else text
    pub fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        if let Ok(value) = trimmed.parse::<i64>() {
            return Value::Int(value);
        }
        if !trimmed.is_empty() {
            if let Ok(value) = trimmed.parse::<f64>() {
                return Value::Float(value);
            }
        }
        Value::Text(text.to_string())
    }

    pub fn is_number(&self) -> bool {
        !matches!(self, Value::Text(_))
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Int(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            Value::Text(s) => !s.is_empty(),
        }
    }

    /// Integer view; floats are truncated toward zero
    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Value::Int(v) => Ok(*v),
            Value::Float(v) if v.is_finite() => Ok(v.trunc() as i64),
            other => Err(TemplateError::Type(format!("`{}` is not an integer", other))),
        }
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Value::Int(v) => Ok(*v as f64),
            Value::Float(v) => Ok(*v),
            Value::Text(s) => Err(TemplateError::Type(format!("`{}` is not a number", s))),
        }
    }

    /// Non-negative integral value usable as an element count
    pub fn as_count(&self) -> Result<usize> {
        let count = match self {
            Value::Int(v) => usize::try_from(*v).ok(),
            Value::Float(v) if v.fract() == 0.0 && *v >= 0.0 => Some(*v as usize),
            _ => None,
        };
        count.ok_or_else(|| {
            TemplateError::Type(format!("`{}` is not a non-negative integer", self))
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => {
                // Values read from `float` fields print at single precision
                let narrow = *v as f32;
                if narrow as f64 == *v {
                    write!(f, "{}", narrow)
                } else {
                    write!(f, "{}", v)
                }
            }
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

/// What a scope name is bound to
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Scalar(Value),
    Sequence(Vec<Value>),
}

/// Name bindings for one structure instance
#[derive(Debug, Clone, Default)]
pub struct Scope {
    bindings: HashMap<String, Binding>,
    file_size: Option<usize>,
}

impl Scope {
    pub fn new(file_size: Option<usize>) -> Self {
        Self {
            bindings: HashMap::new(),
            file_size,
        }
    }

    /// Total length of the buffer being processed, if known
    pub fn file_size(&self) -> Option<usize> {
        self.file_size
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    pub fn bind(&mut self, name: impl Into<String>, binding: Binding) {
        self.bindings.insert(name.into(), binding);
    }

    pub fn remove(&mut self, name: &str) -> Option<Binding> {
        self.bindings.remove(name)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Record a field value. Titles of the form `name[i]` land in the
    /// sequence `name` at position `i`; skipped positions hold 0.
    pub fn record(&mut self, title: &str, value: Value) {
        let Some((name, index)) = Self::element_of(title) else {
            self.bindings.insert(title.to_string(), Binding::Scalar(value));
            return;
        };

        let binding = self
            .bindings
            .entry(name.to_string())
            .or_insert_with(|| Binding::Sequence(Vec::new()));
        if let Binding::Scalar(_) = binding {
            *binding = Binding::Sequence(Vec::new());
        }
        if let Binding::Sequence(values) = binding {
            if index >= values.len() {
                values.resize(index + 1, Value::Int(0));
            }
            values[index] = value;
        }
    }

    /// Split an array element title `name[i]` into its parts
    pub fn element_of(title: &str) -> Option<(&str, usize)> {
        let caps = ELEMENT_TITLE.captures(title)?;
        let name = caps.get(1)?.as_str();
        let index = caps.get(2)?.as_str().parse().ok()?;
        Some((name, index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_from_text() {
        assert_eq!(Value::from_text("42"), Value::Int(42));
        assert_eq!(Value::from_text("-7"), Value::Int(-7));
        assert_eq!(Value::from_text("1.5"), Value::Float(1.5));
        assert_eq!(Value::from_text("hello"), Value::Text("hello".to_string()));
        assert_eq!(Value::from_text(""), Value::Text(String::new()));
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Int(-3).to_string(), "-3");
        assert_eq!(Value::Float(0.1f32 as f64).to_string(), "0.1");
        assert_eq!(Value::Float(2.0).to_string(), "2");
        assert_eq!(Value::Float(0.1).to_string(), "0.1");
        assert_eq!(Value::Text("abc".into()).to_string(), "abc");
    }

    #[test]
    fn test_as_count() {
        assert_eq!(Value::Int(3).as_count().unwrap(), 3);
        assert_eq!(Value::Float(4.0).as_count().unwrap(), 4);
        assert!(matches!(
            Value::Float(2.5).as_count(),
            Err(TemplateError::Type(_))
        ));
        assert!(matches!(Value::Int(-1).as_count(), Err(TemplateError::Type(_))));
        assert!(matches!(
            Value::Text("x".into()).as_count(),
            Err(TemplateError::Type(_))
        ));
    }

    #[test]
    fn test_record_scalar_and_elements() {
        let mut scope = Scope::new(Some(16));
        scope.record("len", Value::Int(2));
        scope.record("items[0]", Value::Int(10));
        scope.record("items[2]", Value::Int(30));

        assert_eq!(scope.get("len"), Some(&Binding::Scalar(Value::Int(2))));
        assert_eq!(
            scope.get("items"),
            Some(&Binding::Sequence(vec![
                Value::Int(10),
                Value::Int(0),
                Value::Int(30)
            ]))
        );
        assert_eq!(scope.file_size(), Some(16));
    }

    #[test]
    fn test_element_of() {
        assert_eq!(Scope::element_of("items[12]"), Some(("items", 12)));
        assert_eq!(Scope::element_of("items"), None);
        assert_eq!(Scope::element_of("items[n]"), None);
    }
}
