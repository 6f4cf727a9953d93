//! Identifier names.
//!
//! Declarations, labels, and references all carry a `Name`. Veld addresses
//! declarations by arena handle, so a name is a single identifier segment,
//! not a dotted path.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An identifier name.
///
/// Names compare and hash by their text. A name may be *special*
/// (compiler-generated, rendered in angle brackets) — special names have
/// no usable simple form for display labels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Name(String);

impl Name {
    /// Create a name from identifier text.
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Create a special (compiler-generated) name, e.g. `<anonymous>`.
    pub fn special(text: &str) -> Self {
        Self(format!("<{text}>"))
    }

    /// The name's text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is a special (compiler-generated) name.
    pub fn is_special(&self) -> bool {
        self.0.starts_with('<')
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Name {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}
