// Declarative binary templates: a schema describes a byte layout, the parser
// turns a buffer into a tree and the dumper turns the tree back into bytes

pub mod decl;
pub mod dumper;
pub mod expr;
pub mod parser;
pub mod schema;
pub mod scope;
pub mod tree;

pub use decl::{parse_type, Flags, TypeSpec};
pub use expr::{evaluate, Argument, Expression};
pub use schema::{Schema, SchemaValue, Template, ENTRY};
pub use scope::{Binding, Scope, Value};
pub use tree::{Element, ElementRef, Leaf, Node, Tree};

use crate::memmap::MemoryMapError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TemplateError {
    /// Missing or malformed schema document, unknown flag
    #[error("Schema error: {0}")]
    Schema(String),

    /// Unknown type name, non-integer count, misused bitfield
    #[error("Type error: {0}")]
    Type(String),

    /// Tree handed to the dumper does not have the schema's shape
    #[error("Structure mismatch: {0}")]
    StructureMismatch(String),

    #[error("Unresolved reference: {0}")]
    UnresolvedReference(String),

    #[error("Structures nested deeper than {limit} levels")]
    RecursionLimit { limit: usize },

    #[error("Out of bounds: {0}")]
    OutOfBounds(#[from] MemoryMapError),

    #[error("Failed to parse schema document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Tree JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TemplateError>;

/// Default cap on nested structure depth
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// Engine limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Deepest structure nesting accepted before a walk is abandoned.
    /// Each level costs a stack frame, so keep this modest.
    pub max_depth: usize,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl TemplateConfig {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }
}
