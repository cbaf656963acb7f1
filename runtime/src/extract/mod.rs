//! Instruction-driven extraction: path navigation and value formatting.

pub mod format;
pub mod path;
pub mod value;

pub use format::format_value;
pub use path::{extract, value_to_raw_text, DataPath, PathSegment};
pub use value::FieldValue;
