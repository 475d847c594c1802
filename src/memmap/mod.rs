// Byte source the template parser reads from

pub mod memory_map;

pub use memory_map::{MemoryMap, MemoryMapError, RawValue};
