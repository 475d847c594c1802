// Template dumper: the parser's mirror image, turning a tree back into bytes

use super::schema::{FieldKind, Layout, SchemaValue, Template};
use super::scope::{Scope, Value};
use super::tree::{Element, Leaf, Node, Tree};
use super::{Result, TemplateError};
use crate::bitwise::{
    align_up, parse_float_text, slice_bits, write_f32_le, write_i16_le, write_i32_le, write_u16_le, write_u32_le,
    Primitive,
};

impl Template {
    /// Serialize `tree` into the byte layout this template describes.
    /// Children are matched to fields by position, not by title.
    pub fn dump(&self, tree: &Tree) -> Result<Vec<u8>> {
        let root = self.root()?;
        tracing::debug!(
            "Dumping tree `{}` with {} top-level elements",
            tree.root.title,
            tree.root.children.len()
        );

        let mut dumper = Dumper::new(self, tree.size);
        dumper.dump_layout(Layout::Schema(root), &tree.root.children, &tree.root.title)?;

        tracing::debug!("Dump produced {} bytes", dumper.out.len());
        Ok(dumper.out)
    }
}

struct Dumper<'t> {
    template: &'t Template,
    out: Vec<u8>,
    file_size: Option<usize>,
    depth: usize,
}

impl<'t> Dumper<'t> {
    fn new(template: &'t Template, file_size: Option<usize>) -> Self {
        Self {
            template,
            out: Vec::with_capacity(file_size.unwrap_or_default()),
            file_size,
            depth: 0,
        }
    }

    fn dump_layout(&mut self, layout: Layout<'_>, children: &[Element], parent: &str) -> Result<Scope> {
        self.depth += 1;
        let limit = self.template.config().max_depth;
        if self.depth > limit {
            return Err(TemplateError::RecursionLimit { limit });
        }

        tracing::debug!(
            "Entering `{}` with {} fields at {:#x} (depth {})",
            parent,
            layout.len(),
            self.out.len(),
            self.depth
        );
        let mut scope = Scope::new(self.file_size);
        for index in 0..layout.len() {
            let Some((title, value)) = layout.field(index) else {
                break;
            };
            let child = children.get(index).ok_or_else(|| {
                TemplateError::StructureMismatch(format!(
                    "`{}` has no element for field `{}`",
                    parent, title
                ))
            })?;
            self.dump_field(&title, value, child, &mut scope)?;
        }

        if children.len() > layout.len() {
            return Err(TemplateError::StructureMismatch(format!(
                "`{}` has {} elements but its structure declares {}",
                parent,
                children.len(),
                layout.len()
            )));
        }

        self.depth -= 1;
        Ok(scope)
    }

    fn dump_field(
        &mut self,
        title: &str,
        value: &SchemaValue,
        child: &Element,
        scope: &mut Scope,
    ) -> Result<()> {
        let template = self.template;
        let kind = template.classify(value, scope)?;
        tracing::debug!("{} @ {:#x}: {:?}", title, self.out.len(), kind);

        match kind {
            FieldKind::Struct(schema) => {
                let node = expect_node(title, child)?;
                self.dump_layout(Layout::Schema(schema), &node.children, title)?;
            }

            FieldKind::Array {
                element,
                count,
                align,
            } => {
                let node = expect_node(title, child)?;
                let element = SchemaValue::Declaration(element);
                let layout = Layout::Array {
                    title,
                    element: &element,
                    count,
                };
                let mut inner = self.dump_layout(layout, &node.children, title)?;
                if let Some(values) = inner.remove(title) {
                    scope.bind(title, values);
                }
                self.pad(align);
            }

            FieldKind::Custom { schema, flags } => {
                let node = expect_node(title, child)?;
                match &flags.write {
                    Some(write) => {
                        let mut children = node.children.clone();
                        template.transform_leaves(write, &mut children, scope)?;
                        self.dump_layout(Layout::Schema(schema), &children, title)?;
                    }
                    None => {
                        self.dump_layout(Layout::Schema(schema), &node.children, title)?;
                    }
                }
                self.pad(flags.align);
            }

            FieldKind::Scalar {
                primitive,
                bits,
                flags,
            } => {
                let leaf = expect_leaf(title, child)?;
                let exact = match primitive {
                    Primitive::Float => parse_float_text(&leaf.value),
                    _ => None,
                };
                let value = match exact {
                    Some(number) => Value::Float(number as f64),
                    None => Value::from_text(&leaf.value),
                };
                match (exact, &flags.write) {
                    // Untransformed floats go out bit for bit (-0, NaN payloads)
                    (Some(number), None) => {
                        tracing::trace!("{} = {}", title, leaf.value);
                        self.out.extend_from_slice(&write_f32_le(number));
                    }
                    (_, write) => {
                        let raw = match write {
                            Some(write) => {
                                template.apply_transform(write, value.clone(), title, scope)?
                            }
                            None => value.clone(),
                        };
                        tracing::trace!("{} = {}", title, raw);
                        self.write_scalar(title, primitive, bits, &raw)?;
                    }
                }
                scope.record(title, value);
                self.pad(flags.align);
            }

            FieldKind::Text {
                primitive,
                count,
                flags,
            } => {
                let leaf = expect_leaf(title, child)?;
                let value = Value::Text(leaf.value.clone());
                let raw = match &flags.write {
                    Some(write) => template.apply_transform(write, value.clone(), title, scope)?,
                    None => value.clone(),
                };
                self.write_text(title, primitive, count, &raw.to_string())?;
                scope.record(title, value);
                self.pad(flags.align);
            }
        }
        Ok(())
    }

    fn write_scalar(
        &mut self,
        title: &str,
        primitive: Primitive,
        bits: Option<u32>,
        value: &Value,
    ) -> Result<()> {
        let not_numeric = || {
            TemplateError::Type(format!(
                "`{}` value `{}` is not a valid {}",
                title, value, primitive
            ))
        };

        if primitive == Primitive::Float {
            let number = value.as_f64().map_err(|_| not_numeric())?;
            self.out.extend_from_slice(&write_f32_le(number as f32));
            return Ok(());
        }

        let mut raw = value.as_i64().map_err(|_| not_numeric())?;
        if let Some(bits) = bits {
            raw = slice_bits(raw, bits);
        }
        // Out-of-range integers keep their low bytes
        match primitive {
            Primitive::Byte | Primitive::Int8 => self.out.push(raw as u8),
            Primitive::Int16 => self.out.extend_from_slice(&write_i16_le(raw as i16)),
            Primitive::Word => self.out.extend_from_slice(&write_u16_le(raw as u16)),
            Primitive::Int32 => self.out.extend_from_slice(&write_i32_le(raw as i32)),
            Primitive::Dword => self.out.extend_from_slice(&write_u32_le(raw as u32)),
            Primitive::Char | Primitive::WcharT | Primitive::Float => {
                return Err(TemplateError::Type(format!(
                    "`{}` cannot be written as a scalar {}",
                    title, primitive
                )))
            }
        }
        Ok(())
    }

    /// Write exactly `count` units: the text, then zeros
    fn write_text(&mut self, title: &str, primitive: Primitive, count: usize, text: &str) -> Result<()> {
        let span = count.checked_mul(primitive.width()).ok_or_else(|| {
            TemplateError::Type(format!("`{}` declares {} characters", title, count))
        })?;
        if let Some(size) = self.file_size.filter(|size| span > *size) {
            return Err(TemplateError::Type(format!(
                "`{}` spans {} bytes, more than the {}-byte source",
                title, span, size
            )));
        }
        self.out.try_reserve(span).map_err(|e| {
            TemplateError::Type(format!("`{}` spans {} bytes: {}", title, span, e))
        })?;

        let start = self.out.len();
        let mut units = 0;

        match primitive {
            Primitive::WcharT => {
                for unit in text.encode_utf16() {
                    if units == count {
                        break;
                    }
                    self.out.extend_from_slice(&write_u16_le(unit));
                    units += 1;
                }
                if units == count && text.encode_utf16().count() > count {
                    tracing::warn!("Truncating `{}` to {} characters", title, count);
                }
            }
            _ => {
                for c in text.chars() {
                    if units == count {
                        tracing::warn!("Truncating `{}` to {} characters", title, count);
                        break;
                    }
                    let byte = u8::try_from(u32::from(c)).map_err(|_| {
                        TemplateError::Type(format!(
                            "`{}` contains `{}`, which does not fit in a char",
                            title, c
                        ))
                    })?;
                    self.out.push(byte);
                    units += 1;
                }
            }
        }

        self.out.resize(start + span, 0);
        Ok(())
    }

    fn pad(&mut self, align: usize) {
        let end = align_up(self.out.len(), align);
        self.out.resize(end, 0);
    }
}

fn expect_node<'e>(title: &str, child: &'e Element) -> Result<&'e Node> {
    child.as_node().ok_or_else(|| {
        TemplateError::StructureMismatch(format!(
            "`{}` is a structure but the tree has a value (`{}`)",
            title,
            child.title()
        ))
    })
}

fn expect_leaf<'e>(title: &str, child: &'e Element) -> Result<&'e Leaf> {
    child.as_leaf().ok_or_else(|| {
        TemplateError::StructureMismatch(format!(
            "`{}` is a value but the tree has a structure (`{}`)",
            title,
            child.title()
        ))
    })
}
