//! Memory layout of host-shareable WGSL types (uniform and storage address spaces).

pub mod flatten;
pub mod parse;
pub mod resolver;
pub mod types;

pub use flatten::WordSlot;
pub use parse::{FieldDef, StructDef};
pub use resolver::{FieldLayout, RuntimeArrayTail, TypeLayout, TypeLayoutResolver};
pub use types::{AddressSpace, ScalarKind, WgslType};
