// Schema model: ordered field declarations, custom types and the entry point

use super::decl::{parse_type, Flags};
use super::expr::{Argument, Expression};
use super::scope::{Scope, Value};
use super::tree::Element;
use super::{Result, TemplateConfig, TemplateError};
use crate::bitwise::Primitive;
use serde_yaml::Value as Yaml;
use std::borrow::Cow;

/// Top-level field selecting the root structure
pub const ENTRY: &str = "entry";

/// Ordered mapping from field title to declaration.
/// Field order is byte order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    fields: Vec<(String, SchemaValue)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaValue {
    /// Nested anonymous structure
    Struct(Schema),
    /// Type declaration string (or, at top level, a transform expression)
    Declaration(String),
}

impl From<Schema> for SchemaValue {
    fn from(schema: Schema) -> Self {
        SchemaValue::Struct(schema)
    }
}

impl From<&str> for SchemaValue {
    fn from(declaration: &str) -> Self {
        SchemaValue::Declaration(declaration.to_string())
    }
}

impl From<String> for SchemaValue {
    fn from(declaration: String) -> Self {
        SchemaValue::Declaration(declaration)
    }
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert; a repeated title replaces the earlier value in place
    pub fn field(mut self, title: impl Into<String>, value: impl Into<SchemaValue>) -> Self {
        self.insert(title, value);
        self
    }

    pub fn insert(&mut self, title: impl Into<String>, value: impl Into<SchemaValue>) {
        let title = title.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(existing, _)| *existing == title) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((title, value)),
        }
    }

    pub fn get(&self, title: &str) -> Option<&SchemaValue> {
        self.fields
            .iter()
            .find(|(existing, _)| existing == title)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SchemaValue)> {
        self.fields.iter().map(|(title, value)| (title.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Load a schema from YAML text (JSON documents are accepted too)
    pub fn from_yaml(text: &str) -> Result<Self> {
        let document: Yaml = serde_yaml::from_str(text)?;
        match document {
            Yaml::Mapping(mapping) => Self::from_mapping(&mapping),
            Yaml::Null => Err(TemplateError::Schema("schema document is empty".to_string())),
            _ => Err(TemplateError::Schema(
                "schema document must be a mapping of fields".to_string(),
            )),
        }
    }

    fn from_mapping(mapping: &serde_yaml::Mapping) -> Result<Self> {
        let mut schema = Schema::new();
        for (key, value) in mapping {
            let title = match key {
                Yaml::String(s) => s.clone(),
                Yaml::Number(n) => n.to_string(),
                Yaml::Bool(b) => b.to_string(),
                other => {
                    return Err(TemplateError::Schema(format!(
                        "field names must be scalars, got {:?}",
                        other
                    )))
                }
            };
            let value = match value {
                Yaml::Mapping(nested) => SchemaValue::Struct(Self::from_mapping(nested)?),
                Yaml::String(s) => SchemaValue::Declaration(s.clone()),
                Yaml::Number(n) => SchemaValue::Declaration(n.to_string()),
                Yaml::Bool(b) => SchemaValue::Declaration(b.to_string()),
                _ => {
                    return Err(TemplateError::Schema(format!(
                        "field `{}` must be a type declaration or a nested structure",
                        title
                    )))
                }
            };
            schema.fields.push((title, value));
        }
        Ok(schema)
    }
}

/// The fields walked for one structure instance: a declared schema, or the
/// synthetic `title[0]..title[count-1]` schema standing in for an array
#[derive(Debug, Clone, Copy)]
pub(crate) enum Layout<'s> {
    Schema(&'s Schema),
    Array {
        title: &'s str,
        element: &'s SchemaValue,
        count: usize,
    },
}

impl<'s> Layout<'s> {
    pub(crate) fn len(&self) -> usize {
        match self {
            Layout::Schema(schema) => schema.len(),
            Layout::Array { count, .. } => *count,
        }
    }

    pub(crate) fn field(&self, index: usize) -> Option<(Cow<'s, str>, &'s SchemaValue)> {
        match *self {
            Layout::Schema(schema) => schema
                .fields
                .get(index)
                .map(|(title, value)| (Cow::Borrowed(title.as_str()), value)),
            Layout::Array {
                title,
                element,
                count,
            } => (index < count).then(|| (Cow::Owned(format!("{}[{}]", title, index)), element)),
        }
    }
}

/// How a field is laid out, decided once per field
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FieldKind<'s> {
    Struct(&'s Schema),
    Array {
        element: String,
        count: usize,
        align: usize,
    },
    Custom {
        schema: &'s Schema,
        flags: Flags,
    },
    Scalar {
        primitive: Primitive,
        bits: Option<u32>,
        flags: Flags,
    },
    Text {
        primitive: Primitive,
        count: usize,
        flags: Flags,
    },
}

enum Base<'s> {
    Primitive(Primitive),
    Custom(&'s Schema),
}

/// A loaded schema document ready to parse and dump
#[derive(Debug, Clone)]
pub struct Template {
    document: Schema,
    config: TemplateConfig,
}

impl Template {
    pub fn new(document: Schema) -> Result<Self> {
        let template = Self {
            document,
            config: TemplateConfig::default(),
        };
        if template.document.is_empty() {
            return Err(TemplateError::Schema("schema declares no fields".to_string()));
        }
        if template.root()?.is_empty() {
            return Err(TemplateError::Schema("entry structure declares no fields".to_string()));
        }
        for (name, value) in template.document.iter() {
            if let SchemaValue::Struct(schema) = value {
                if schema.is_empty() {
                    return Err(TemplateError::Schema(format!(
                        "structure `{}` declares no fields",
                        name
                    )));
                }
            }
        }
        Ok(template)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Self::new(Schema::from_yaml(text)?)
    }

    pub fn with_config(mut self, config: TemplateConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &TemplateConfig {
        &self.config
    }

    /// The structure parsing starts from: `entry` when declared (either inline
    /// or naming a custom type), otherwise the whole document
    pub fn root(&self) -> Result<&Schema> {
        match self.document.get(ENTRY) {
            None => Ok(&self.document),
            Some(SchemaValue::Struct(schema)) => Ok(schema),
            Some(SchemaValue::Declaration(name)) => self.custom_type(name).ok_or_else(|| {
                TemplateError::Schema(format!("entry names unknown structure `{}`", name))
            }),
        }
    }

    /// A top-level structure usable as a field type
    pub fn custom_type(&self, name: &str) -> Option<&Schema> {
        if name == ENTRY {
            return None;
        }
        match self.document.get(name)? {
            SchemaValue::Struct(schema) => Some(schema),
            SchemaValue::Declaration(_) => None,
        }
    }

    /// A top-level transform expression referenced by `read`/`write` flags
    pub fn transform(&self, name: &str) -> Result<Expression> {
        match self.document.get(name) {
            Some(SchemaValue::Declaration(source)) if name != ENTRY => Expression::parse(source),
            _ => Err(TemplateError::UnresolvedReference(format!(
                "transform `{}`",
                name
            ))),
        }
    }

    pub(crate) fn classify<'s>(
        &'s self,
        value: &'s SchemaValue,
        scope: &Scope,
    ) -> Result<FieldKind<'s>> {
        let declared = match value {
            SchemaValue::Struct(schema) => return Ok(FieldKind::Struct(schema)),
            SchemaValue::Declaration(declared) => declared,
        };

        let spec = parse_type(declared, scope)?;
        let base = match Primitive::from_name(&spec.base) {
            Some(primitive) => Base::Primitive(primitive),
            None => Base::Custom(self.custom_type(&spec.base).ok_or_else(|| {
                TemplateError::Type(format!("unknown type `{}`", spec.base))
            })?),
        };

        let is_string = matches!(base, Base::Primitive(p) if p.is_string());
        if spec.count != 1 && !is_string {
            return Ok(FieldKind::Array {
                element: spec.element_declaration(),
                count: spec.count,
                align: spec.flags.align,
            });
        }

        match base {
            Base::Primitive(primitive) if primitive.is_string() => {
                if spec.bits.is_some() {
                    return Err(TemplateError::Type(format!(
                        "string type `{}` cannot be a bitfield",
                        declared
                    )));
                }
                Ok(FieldKind::Text {
                    primitive,
                    count: spec.count,
                    flags: spec.flags,
                })
            }
            Base::Primitive(primitive) => {
                if spec.bits.is_some() && !primitive.is_integer() {
                    return Err(TemplateError::Type(format!(
                        "bitfield `{}` needs an integer base",
                        declared
                    )));
                }
                Ok(FieldKind::Scalar {
                    primitive,
                    bits: spec.bits,
                    flags: spec.flags,
                })
            }
            Base::Custom(schema) => {
                if spec.bits.is_some() {
                    return Err(TemplateError::Type(format!(
                        "structure `{}` cannot be a bitfield",
                        spec.base
                    )));
                }
                Ok(FieldKind::Custom {
                    schema,
                    flags: spec.flags,
                })
            }
        }
    }

    /// Run a transform over one field value. Array elements (`name[i]`)
    /// also receive their index and the sibling sequence collected so far.
    pub(crate) fn apply_transform(
        &self,
        name: &str,
        value: Value,
        title: &str,
        scope: &Scope,
    ) -> Result<Value> {
        let expression = self.transform(name)?;
        let mut args = vec![Argument::Value(value)];
        if let Some((array, index)) = Scope::element_of(title) {
            args.push(Argument::Value(Value::Int(index as i64)));
            args.push(Argument::Sequence(array.to_string()));
        }
        expression.apply(scope, args)
    }

    /// Run a transform over every leaf directly under a structure node
    pub(crate) fn transform_leaves(
        &self,
        name: &str,
        children: &mut [Element],
        scope: &Scope,
    ) -> Result<()> {
        let expression = self.transform(name)?;
        for (index, child) in children.iter_mut().enumerate() {
            if let Element::Leaf(leaf) = child {
                let args = vec![
                    Argument::Value(Value::from_text(&leaf.value)),
                    Argument::Value(Value::Int(index as i64)),
                ];
                leaf.value = expression.apply(scope, args)?.to_string();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"
entry:
  header: Header
  points: Point[2]
  scale: word; read:half
Header:
  magic: char[4]
  version: byte
Point:
  x: int16
  y: int16
half: value / 2
"#;

    #[test]
    fn test_from_yaml_preserves_order() {
        let schema = Schema::from_yaml("b: byte\na: word\nc:\n  z: byte\n  y: byte\n").unwrap();
        let titles: Vec<&str> = schema.iter().map(|(title, _)| title).collect();
        assert_eq!(titles, vec!["b", "a", "c"]);

        let Some(SchemaValue::Struct(nested)) = schema.get("c") else {
            panic!("expected nested structure");
        };
        let titles: Vec<&str> = nested.iter().map(|(title, _)| title).collect();
        assert_eq!(titles, vec!["z", "y"]);
    }

    #[test]
    fn test_from_yaml_errors() {
        assert!(matches!(Schema::from_yaml(""), Err(TemplateError::Schema(_))));
        assert!(matches!(
            Schema::from_yaml("- byte\n- word\n"),
            Err(TemplateError::Schema(_))
        ));
        assert!(matches!(
            Schema::from_yaml("a: [1, 2]\n"),
            Err(TemplateError::Schema(_))
        ));
        assert!(matches!(
            Schema::from_yaml("a: [unclosed"),
            Err(TemplateError::Yaml(_))
        ));
        assert!(matches!(Template::from_yaml("{}"), Err(TemplateError::Schema(_))));
        assert!(matches!(
            Template::from_yaml("entry: {}\nA:\n  x: byte\n"),
            Err(TemplateError::Schema(_))
        ));
        assert!(matches!(
            Template::from_yaml("entry:\n  x: Empty[2]\nEmpty: {}\n"),
            Err(TemplateError::Schema(_))
        ));
    }

    #[test]
    fn test_entry_and_custom_types() {
        let template = Template::from_yaml(DOCUMENT).unwrap();
        let root = template.root().unwrap();
        assert_eq!(root.len(), 3);
        assert!(template.custom_type("Header").is_some());
        assert!(template.custom_type("entry").is_none());
        assert!(template.custom_type("half").is_none());
        assert!(template.transform("half").is_ok());
        assert!(matches!(
            template.transform("Header"),
            Err(TemplateError::UnresolvedReference(_))
        ));
    }

    #[test]
    fn test_entry_by_name() {
        let template = Template::from_yaml("entry: Point\nPoint:\n  x: byte\n").unwrap();
        assert_eq!(template.root().unwrap().len(), 1);
        assert!(matches!(
            Template::from_yaml("entry: Missing\nPoint:\n  x: byte\n"),
            Err(TemplateError::Schema(_))
        ));
    }

    #[test]
    fn test_classify() {
        let template = Template::from_yaml(DOCUMENT).unwrap();
        let scope = Scope::new(None);
        let kind = |decl: &str| {
            let value = SchemaValue::Declaration(decl.to_string());
            template.classify(&value, &scope).map(|kind| format!("{:?}", kind))
        };

        assert!(kind("word[3]").unwrap().starts_with("Array"));
        assert!(kind("word[0]").unwrap().starts_with("Array"));
        assert!(kind("Point[2]").unwrap().starts_with("Array"));
        assert!(kind("char[8]").unwrap().starts_with("Text"));
        assert!(kind("char").unwrap().starts_with("Text"));
        assert!(kind("wchar_t[4]").unwrap().starts_with("Text"));
        assert!(kind("word[1]").unwrap().starts_with("Scalar"));
        assert!(kind("byte:3").unwrap().starts_with("Scalar"));
        assert!(kind("Header").unwrap().starts_with("Custom"));
        assert!(matches!(kind("Unknown"), Err(TemplateError::Type(_))));
        assert!(matches!(kind("Unknown[2]"), Err(TemplateError::Type(_))));
        assert!(matches!(kind("float:3"), Err(TemplateError::Type(_))));
        assert!(matches!(kind("char:3"), Err(TemplateError::Type(_))));
        assert!(matches!(kind("Header:3"), Err(TemplateError::Type(_))));
    }

    #[test]
    fn test_primitive_precedence() {
        let template = Template::from_yaml("entry:\n  a: word\nword:\n  hi: byte\n  lo: byte\n")
            .unwrap();
        let value = SchemaValue::Declaration("word".to_string());
        let kind = template.classify(&value, &Scope::new(None)).unwrap();
        assert!(matches!(
            kind,
            FieldKind::Scalar {
                primitive: Primitive::Word,
                ..
            }
        ));
    }

    #[test]
    fn test_array_layout() {
        let element = SchemaValue::Declaration("byte".to_string());
        let layout = Layout::Array {
            title: "data",
            element: &element,
            count: 2,
        };
        assert_eq!(layout.len(), 2);
        let (title, value) = layout.field(1).unwrap();
        assert_eq!(title, "data[1]");
        assert_eq!(value, &element);
        assert!(layout.field(2).is_none());
    }

    #[test]
    fn test_builder() {
        let schema = Schema::new()
            .field("a", "byte")
            .field("b", Schema::new().field("c", "word"))
            .field("a", "word");
        assert_eq!(schema.len(), 2);
        assert_eq!(
            schema.get("a"),
            Some(&SchemaValue::Declaration("word".to_string()))
        );
    }
}
