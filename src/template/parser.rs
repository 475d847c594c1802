// Template parser: walks the schema in declaration order against a buffer,
// advancing one cursor and building the tree

use super::schema::{FieldKind, Layout, SchemaValue, Template};
use super::scope::{Scope, Value};
use super::tree::{Element, Leaf, Node, Tree};
use super::{Result, TemplateError};
use crate::bitwise::{align_up, float_text, slice_bits};
use crate::memmap::{MemoryMap, RawValue};

impl Template {
    /// Parse `data` into a tree whose root carries `title`
    pub fn parse(&self, data: &[u8], title: &str) -> Result<Tree> {
        let root = self.root()?;
        tracing::debug!("Parsing {} bytes against {} root fields", data.len(), root.len());

        let mut parser = Parser::new(self, MemoryMap::new(data));
        let (children, _) = parser.parse_layout(Layout::Schema(root))?;

        tracing::debug!("Parse consumed {} of {} bytes", parser.cursor, data.len());
        Ok(Tree {
            size: Some(data.len()),
            root: Node::new(title, 0, children),
        })
    }
}

/// Per-call walk state; nothing here outlives one `parse`
struct Parser<'t, 'd> {
    template: &'t Template,
    source: MemoryMap<'d>,
    cursor: usize,
    depth: usize,
}

impl<'t, 'd> Parser<'t, 'd> {
    fn new(template: &'t Template, source: MemoryMap<'d>) -> Self {
        Self {
            template,
            source,
            cursor: 0,
            depth: 0,
        }
    }

    fn parse_layout(&mut self, layout: Layout<'_>) -> Result<(Vec<Element>, Scope)> {
        self.depth += 1;
        let limit = self.template.config().max_depth;
        if self.depth > limit {
            return Err(TemplateError::RecursionLimit { limit });
        }

        tracing::debug!(
            "Entering structure of {} fields at {:#x} (depth {})",
            layout.len(),
            self.cursor,
            self.depth
        );
        let mut scope = Scope::new(Some(self.source.len()));
        let mut elements = Vec::new();

        // Zero-width elements never move the cursor; cap their count at the buffer length
        let unbounded = match layout {
            Layout::Array { title, count, .. } if count > self.source.len() => Some((title, count)),
            _ => None,
        };

        for index in 0..layout.len() {
            let Some((title, value)) = layout.field(index) else {
                break;
            };
            let start = self.cursor;
            let element = self.parse_field(&title, value, &mut scope)?;
            elements.push(element);

            if let Some((array, count)) = unbounded.filter(|_| self.cursor == start) {
                return Err(TemplateError::Type(format!(
                    "`{}` declares {} elements that occupy no bytes in a {}-byte buffer",
                    array,
                    count,
                    self.source.len()
                )));
            }
        }

        self.depth -= 1;
        Ok((elements, scope))
    }

    fn parse_field(&mut self, title: &str, value: &SchemaValue, scope: &mut Scope) -> Result<Element> {
        let template = self.template;
        let offset = self.cursor;
        let kind = template.classify(value, scope)?;
        tracing::debug!("{} @ {:#x}: {:?}", title, offset, kind);

        let element = match kind {
            FieldKind::Struct(schema) => {
                let (children, _) = self.parse_layout(Layout::Schema(schema))?;
                Node::new(title, offset, children).into()
            }

            FieldKind::Array {
                element,
                count,
                align,
            } => {
                let element = SchemaValue::Declaration(element);
                let (children, mut inner) = self.parse_layout(Layout::Array {
                    title,
                    element: &element,
                    count,
                })?;
                if let Some(values) = inner.remove(title) {
                    scope.bind(title, values);
                }
                self.cursor = align_up(self.cursor, align);
                Node::new(title, offset, children).into()
            }

            FieldKind::Custom { schema, flags } => {
                let (mut children, _) = self.parse_layout(Layout::Schema(schema))?;
                if let Some(read) = &flags.read {
                    template.transform_leaves(read, &mut children, scope)?;
                }
                self.cursor = align_up(self.cursor, flags.align);
                Node::new(title, offset, children).into()
            }

            FieldKind::Scalar {
                primitive,
                bits,
                flags,
            } => {
                let raw = self.source.read_primitive(primitive, offset)?;
                let mut value = match raw {
                    RawValue::Int(raw) => Value::Int(bits.map_or(raw, |bits| slice_bits(raw, bits))),
                    RawValue::Float(raw) => Value::Float(raw as f64),
                };
                self.cursor += primitive.width();

                if let Some(read) = &flags.read {
                    value = template.apply_transform(read, value, title, scope)?;
                }
                tracing::trace!("{} = {}", title, value);
                let text = match (raw, &flags.read) {
                    (RawValue::Float(raw), None) => float_text(raw),
                    _ => value.to_string(),
                };
                let leaf = Leaf::new(title, offset, text);
                scope.record(title, value);
                self.cursor = align_up(self.cursor, flags.align);
                leaf.into()
            }

            FieldKind::Text {
                primitive,
                count,
                flags,
            } => {
                let text = self.source.read_string(primitive, offset, count)?;
                // The declared span is consumed even when the terminator comes early
                self.cursor += count * primitive.width();

                let mut value = Value::Text(text);
                if let Some(read) = &flags.read {
                    value = template.apply_transform(read, value, title, scope)?;
                }
                let leaf = Leaf::new(title, offset, value.to_string());
                scope.record(title, value);
                self.cursor = align_up(self.cursor, flags.align);
                leaf.into()
            }
        };
        Ok(element)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateConfig;

    fn parse(schema: &str, data: &[u8]) -> Result<Tree> {
        Template::from_yaml(schema)?.parse(data, "")
    }

    fn leaf_values(node: &Node) -> Vec<&str> {
        node.children.iter().filter_map(|c| c.value()).collect()
    }

    #[test]
    fn test_scalars() {
        let data = [
            0xFA, // byte
            0xFA, // int8
            0x34, 0x12, // word
            0xFE, 0xFF, // int16
            0x78, 0x56, 0x34, 0x12, // dword
            0xFE, 0xFF, 0xFF, 0xFF, // int32
            0x00, 0x00, 0xC0, 0x3F, // float
        ];
        let tree = parse(
            "a: byte\nb: int8\nc: word\nd: int16\ne: dword\nf: int32\ng: float\n",
            &data,
        )
        .unwrap();

        assert_eq!(
            leaf_values(&tree.root),
            vec!["250", "-6", "4660", "-2", "305419896", "-2", "1.5"]
        );
        let offsets: Vec<usize> = tree.root.children.iter().map(|c| c.offset()).collect();
        assert_eq!(offsets, vec![0, 1, 2, 4, 6, 10, 14]);
        assert_eq!(tree.size, Some(data.len()));
    }

    #[test]
    fn test_bitfield_masking() {
        let tree = parse("flags: byte:3\n", &[0b1111_1010]).unwrap();
        assert_eq!(tree.root.children[0].value(), Some("2"));

        // Signed base: no sign extension before masking
        let tree = parse("flags: int8:4\n", &[0xFA]).unwrap();
        assert_eq!(tree.root.children[0].value(), Some("10"));
    }

    #[test]
    fn test_float_text_is_exact() {
        let data = [0x00, 0x00, 0x00, 0x80, 0x01, 0x00, 0x80, 0xFF];
        let tree = parse("a: float\nb: float\n", &data).unwrap();
        assert_eq!(leaf_values(&tree.root), vec!["-0", "NaN(0xFF800001)"]);
    }

    #[test]
    fn test_alignment() {
        let tree = parse("a: byte; align:4\nb: byte\n", &[1, 0, 0, 0, 2, 0]).unwrap();
        let b = tree.root.child("b").unwrap();
        assert_eq!(b.offset(), 4);
        assert_eq!(b.value(), Some("2"));
    }

    #[test]
    fn test_bounded_string() {
        let tree = parse("name: char[8]\nnext: byte\n", b"hi\0\0\0\0\0\0\x07").unwrap();
        assert_eq!(tree.root.child("name").unwrap().value(), Some("hi"));
        let next = tree.root.child("next").unwrap();
        assert_eq!(next.offset(), 8);
        assert_eq!(next.value(), Some("7"));

        let tree = parse("c: char\nw: wchar_t[3]\n", &[b'Z', b'o', 0, b'k', 0, 0, 0]).unwrap();
        assert_eq!(leaf_values(&tree.root), vec!["Z", "ok"]);
    }

    #[test]
    fn test_array_expansion() {
        let tree = parse("values: word[3]\n", &[1, 0, 2, 0, 3, 0]).unwrap();
        let Some(Element::Node(values)) = tree.root.child("values") else {
            panic!("expected array node");
        };
        assert_eq!(values.children.len(), 3);
        assert_eq!(leaf_values(values), vec!["1", "2", "3"]);
        let titles: Vec<&str> = values.children.iter().map(|c| c.title()).collect();
        assert_eq!(titles, vec!["values[0]", "values[1]", "values[2]"]);
        let offsets: Vec<usize> = values.children.iter().map(|c| c.offset()).collect();
        assert_eq!(offsets, vec![0, 2, 4]);
    }

    #[test]
    fn test_length_prefixed_array() {
        let schema = "count: byte\nitems: byte[count]\nlast: byte[len(items) - 2]\n";
        let tree = parse(schema, &[3, 10, 20, 30, 40]).unwrap();
        let Some(Element::Node(items)) = tree.root.child("items") else {
            panic!("expected array node");
        };
        assert_eq!(leaf_values(items), vec!["10", "20", "30"]);
        // A count of one is a plain scalar
        assert_eq!(tree.root.child("last").unwrap().value(), Some("40"));
    }

    #[test]
    fn test_file_size_tail() {
        let tree = parse("tag: byte\nrest: byte[fileSize() - 1]\n", &[9, 1, 2, 3]).unwrap();
        let rest = tree.root.child("rest").unwrap().as_node().unwrap();
        assert_eq!(rest.children.len(), 3);

        let tree = parse("tag: byte\nrest: byte[fileSize() - 1]\n", &[9]).unwrap();
        let rest = tree.root.child("rest").unwrap().as_node().unwrap();
        assert!(rest.children.is_empty());
    }

    #[test]
    fn test_nested_and_custom_structs() {
        let schema = r#"
entry:
  header:
    magic: char[2]
    version: byte
  origin: Point
  path: Point[2]
Point:
  x: byte
  y: byte
"#;
        let data = [b'B', b'X', 1, 5, 6, 7, 8, 9, 10];
        let tree = parse(schema, &data).unwrap();

        let header = tree.root.child("header").unwrap().as_node().unwrap();
        assert_eq!(leaf_values(header), vec!["BX", "1"]);

        let origin = tree.root.child("origin").unwrap().as_node().unwrap();
        assert_eq!(origin.offset, 3);
        assert_eq!(leaf_values(origin), vec!["5", "6"]);

        let path = tree.root.child("path").unwrap().as_node().unwrap();
        assert_eq!(path.offset, 5);
        let second = path.children[1].as_node().unwrap();
        assert_eq!(second.title, "path[1]");
        assert_eq!(second.offset, 7);
        assert_eq!(leaf_values(second), vec!["9", "10"]);
    }

    #[test]
    fn test_scope_is_per_structure() {
        let schema = "n: byte\ninner:\n  data: byte[n]\n";
        let err = parse(schema, &[2, 1, 2]).unwrap_err();
        assert!(matches!(err, TemplateError::UnresolvedReference(name) if name == "n"));
    }

    #[test]
    fn test_read_transforms() {
        let schema = r#"
entry:
  celsius: byte; read:toCelsius
  mode: byte; read:modeName
  deltas: byte[3]; read:delta
  pos: Point; read:double
Point:
  x: byte
  y: byte
toCelsius: v => v - 40
modeName: "value == 1 ? 'on' : 'off'"
delta: "(v, i, a) => i == 0 ? v : v + a[i - 1]"
double: value * 2
"#;
        let tree = parse(schema, &[65, 1, 1, 2, 3, 4, 5]).unwrap();
        assert_eq!(tree.root.child("celsius").unwrap().value(), Some("25"));
        assert_eq!(tree.root.child("mode").unwrap().value(), Some("on"));

        let deltas = tree.root.child("deltas").unwrap().as_node().unwrap();
        assert_eq!(leaf_values(deltas), vec!["1", "3", "6"]);

        let pos = tree.root.child("pos").unwrap().as_node().unwrap();
        assert_eq!(leaf_values(pos), vec!["8", "10"]);
    }

    #[test]
    fn test_offsets_are_monotonic() {
        let schema = "a: byte; align:2\nb: word[2]\nc:\n  d: char[3]\n  e: dword\nf: byte\n";
        let data = [0u8; 16];
        let tree = parse(schema, &data).unwrap();

        let mut offsets = Vec::new();
        tree.traverse(|element, level| {
            if level == 1 {
                offsets.push(element.offset());
            }
        });
        assert_eq!(offsets, vec![0, 2, 6, 13]);
        assert!(offsets.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            parse("a: qword\n", &[0; 8]),
            Err(TemplateError::Type(_))
        ));
        assert!(matches!(
            parse("a: byte; endian:big\n", &[0]),
            Err(TemplateError::Schema(_))
        ));
        assert!(matches!(
            parse("a: dword\n", &[0, 0]),
            Err(TemplateError::OutOfBounds(_))
        ));
        assert!(matches!(
            parse("a: char[4]\n", b"ab"),
            Err(TemplateError::OutOfBounds(_))
        ));
        assert!(matches!(
            parse("n: float\nd: byte[n]\n", &[0, 0, 0xC0, 0x3F, 0]),
            Err(TemplateError::Type(_))
        ));
        assert!(matches!(
            parse("entry:\n  a: byte; read:missing\n", &[0]),
            Err(TemplateError::UnresolvedReference(_))
        ));
    }

    #[test]
    fn test_recursion_limit() {
        let schema = "entry:\n  head: Chain\nChain:\n  next: Chain\n";
        let err = parse(schema, &[]).unwrap_err();
        assert!(matches!(err, TemplateError::RecursionLimit { limit: 256 }));

        let template = Template::from_yaml(schema)
            .unwrap()
            .with_config(TemplateConfig::new(8));
        assert!(matches!(
            template.parse(&[], ""),
            Err(TemplateError::RecursionLimit { limit: 8 })
        ));
    }

    #[test]
    fn test_zero_width_elements_are_bounded() {
        let schema = "entry:\n  n: dword\n  x: Hollow[n]\nHollow:\n  e: byte[0]\n";
        let err = parse(schema, &[0xFF, 0xFF, 0xFF, 0x00]).unwrap_err();
        assert!(matches!(err, TemplateError::Type(_)));

        let tree = parse(schema, &[2, 0, 0, 0]).unwrap();
        let x = tree.root.child("x").unwrap().as_node().unwrap();
        assert_eq!(x.children.len(), 2);
        assert_eq!(x.children[1].offset(), 4);
    }

    #[test]
    fn test_shared_template_across_threads() {
        let template = Template::from_yaml("a: word\nb: byte[2]\n").unwrap();
        std::thread::scope(|s| {
            let handles: Vec<_> = (0u8..4)
                .map(|i| {
                    let template = &template;
                    s.spawn(move || template.parse(&[i, 0, i, i], "t").unwrap())
                })
                .collect();
            for (i, handle) in handles.into_iter().enumerate() {
                let tree = handle.join().unwrap();
                assert_eq!(tree.root.children[0].value(), Some(i.to_string().as_str()));
            }
        });
    }
}
