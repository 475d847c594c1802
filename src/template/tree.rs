// Parsed tree: structure nodes with ordered children, leaves with text values

use super::Result;
use serde::{Deserialize, Serialize};

/// Terminal field value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leaf {
    pub title: String,
    /// Absolute byte offset of the field
    pub offset: usize,
    pub value: String,
}

/// Structure (or array) with its members in declaration order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub title: String,
    pub offset: usize,
    #[serde(rename = "nodes")]
    pub children: Vec<Element>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Element {
    Node(Node),
    Leaf(Leaf),
}

/// Borrowed view of either element kind, handed out by traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementRef<'a> {
    Node(&'a Node),
    Leaf(&'a Leaf),
}

/// Result of parsing a buffer against a template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    /// Length of the parsed buffer; binds `fileSize` when dumping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    pub root: Node,
}

impl Leaf {
    pub fn new(title: impl Into<String>, offset: usize, value: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            offset,
            value: value.into(),
        }
    }
}

impl Node {
    pub fn new(title: impl Into<String>, offset: usize, children: Vec<Element>) -> Self {
        Self {
            title: title.into(),
            offset,
            children,
        }
    }

    /// Find a direct child by title
    pub fn child(&self, title: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.title() == title)
    }

    /// Mutable access to a direct child, for editing before a dump
    pub fn child_mut(&mut self, title: &str) -> Option<&mut Element> {
        self.children.iter_mut().find(|child| child.title() == title)
    }
}

impl Element {
    pub fn title(&self) -> &str {
        match self {
            Element::Node(node) => &node.title,
            Element::Leaf(leaf) => &leaf.title,
        }
    }

    pub fn offset(&self) -> usize {
        match self {
            Element::Node(node) => node.offset,
            Element::Leaf(leaf) => leaf.offset,
        }
    }

    pub fn is_node(&self) -> bool {
        matches!(self, Element::Node(_))
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Element::Node(node) => Some(node),
            Element::Leaf(_) => None,
        }
    }

    pub fn as_leaf(&self) -> Option<&Leaf> {
        match self {
            Element::Leaf(leaf) => Some(leaf),
            Element::Node(_) => None,
        }
    }

    /// Leaf value, `None` for structure nodes
    pub fn value(&self) -> Option<&str> {
        self.as_leaf().map(|leaf| leaf.value.as_str())
    }

    pub fn view(&self) -> ElementRef<'_> {
        match self {
            Element::Node(node) => ElementRef::Node(node),
            Element::Leaf(leaf) => ElementRef::Leaf(leaf),
        }
    }
}

impl From<Node> for Element {
    fn from(node: Node) -> Self {
        Element::Node(node)
    }
}

impl From<Leaf> for Element {
    fn from(leaf: Leaf) -> Self {
        Element::Leaf(leaf)
    }
}

impl ElementRef<'_> {
    pub fn title(&self) -> &str {
        match self {
            ElementRef::Node(node) => &node.title,
            ElementRef::Leaf(leaf) => &leaf.title,
        }
    }

    pub fn offset(&self) -> usize {
        match self {
            ElementRef::Node(node) => node.offset,
            ElementRef::Leaf(leaf) => leaf.offset,
        }
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            ElementRef::Node(_) => None,
            ElementRef::Leaf(leaf) => Some(&leaf.value),
        }
    }
}

impl Tree {
    pub fn new(root: Node) -> Self {
        Self { size: None, root }
    }

    /// Depth-first walk starting at the root (level 0)
    pub fn traverse<F>(&self, mut visit: F)
    where
        F: FnMut(ElementRef<'_>, usize),
    {
        fn walk<F: FnMut(ElementRef<'_>, usize)>(node: &Node, level: usize, visit: &mut F) {
            for child in &node.children {
                visit(child.view(), level);
                if let Element::Node(nested) = child {
                    walk(nested, level + 1, visit);
                }
            }
        }

        visit(ElementRef::Node(&self.root), 0);
        walk(&self.root, 1, &mut visit);
    }

    /// Number of elements below the root
    pub fn count(&self) -> usize {
        let mut count = 0;
        self.traverse(|_, _| count += 1);
        count - 1
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Tree {
        Tree {
            size: Some(3),
            root: Node::new(
                "file",
                0,
                vec![
                    Leaf::new("a", 0, "1").into(),
                    Node::new(
                        "b",
                        1,
                        vec![Leaf::new("b[0]", 1, "2").into(), Leaf::new("b[1]", 2, "3").into()],
                    )
                    .into(),
                ],
            ),
        }
    }

    #[test]
    fn test_traverse_levels() {
        let tree = sample();
        let mut visited = Vec::new();
        tree.traverse(|element, level| {
            visited.push((element.title().to_string(), level, element.value().map(str::to_string)))
        });

        assert_eq!(
            visited,
            vec![
                ("file".to_string(), 0, None),
                ("a".to_string(), 1, Some("1".to_string())),
                ("b".to_string(), 1, None),
                ("b[0]".to_string(), 2, Some("2".to_string())),
                ("b[1]".to_string(), 2, Some("3".to_string())),
            ]
        );
        assert_eq!(tree.count(), 4);
    }

    #[test]
    fn test_accessors() {
        let mut tree = sample();
        let b = tree.root.child("b").unwrap();
        assert!(b.is_node());
        assert_eq!(b.offset(), 1);
        assert_eq!(tree.root.child("a").unwrap().value(), Some("1"));

        if let Some(Element::Leaf(leaf)) = tree.root.child_mut("a") {
            leaf.value = "9".to_string();
        }
        assert_eq!(tree.root.child("a").unwrap().value(), Some("9"));
    }

    #[test]
    fn test_json_shape() {
        let tree = sample();
        let json = tree.to_json().unwrap();
        assert!(json.contains(r#""nodes":["#));
        assert!(json.contains(r#"{"title":"a","offset":0,"value":"1"}"#));

        let restored = Tree::from_json(&json).unwrap();
        assert_eq!(restored, tree);
    }

    #[test]
    fn test_json_errors() {
        assert!(matches!(
            Tree::from_json(r#"{"root": 5}"#),
            Err(crate::template::TemplateError::Json(_))
        ));
    }

    #[test]
    fn test_json_without_size() {
        let json = r#"{"root":{"title":"","offset":0,"nodes":[{"title":"x","offset":0,"value":"5"}]}}"#;
        let tree = Tree::from_json(json).unwrap();
        assert_eq!(tree.size, None);
        assert_eq!(tree.root.children[0].value(), Some("5"));
    }
}
