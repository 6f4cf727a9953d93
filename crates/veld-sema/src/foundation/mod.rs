//! Foundation types shared across the front end.

pub mod name;
pub mod span;

pub use name::Name;
pub use span::{SourceFile, SourceMap, Span};
