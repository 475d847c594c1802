// BRIX: declarative binary template engine
// Copyright 2024 - Licensed under GPLv3
// Parses byte buffers into annotated trees and dumps trees back into bytes

pub mod bitwise;
pub mod memmap;
pub mod template;

// Re-export commonly used types
pub use bitwise::Primitive;
pub use memmap::{MemoryMap, MemoryMapError};
pub use template::{
    Element, ElementRef, Leaf, Node, Schema, SchemaValue, Template, TemplateConfig,
    TemplateError, Tree, Value,
};

/// BRIX version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_public_surface() {
        let template = Template::from_yaml("entry: Pair\nPair:\n  a: byte\n  b: word\n").unwrap();
        let tree = template.parse(&[1, 2, 0], "pair").unwrap();
        assert_eq!(tree.root.title, "pair");
        assert_eq!(tree.count(), 2);
        assert_eq!(template.dump(&tree).unwrap(), vec![1, 2, 0]);
    }
}
