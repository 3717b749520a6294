#![forbid(unsafe_code)]

//! Addresses of children inside a tree value.
//!
//! A [`Key`] names one child of a container: an index into a list or a
//! field of a record. A [`Path`] is a sequence of keys from the root.
//!
//! Keys order indices before fields so traces iterate list children in
//! ascending position.

use std::borrow::Cow;
use std::fmt;

/// One step into a container.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    /// Position in a list.
    Index(usize),
    /// Field name in a record.
    Field(String),
}

/// A sequence of keys from a root value down to a descendant.
pub type Path = Vec<Key>;

impl Key {
    /// The list position this key addresses, if any.
    ///
    /// Field keys that spell a non-negative integer address that position,
    /// the same way `"2"` and `2` address the same slot of a list.
    #[must_use]
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Index(index) => Some(*index),
            Self::Field(name) => name.parse().ok(),
        }
    }

    /// The record field this key addresses.
    #[must_use]
    pub fn field_name(&self) -> Cow<'_, str> {
        match self {
            Self::Index(index) => Cow::Owned(index.to_string()),
            Self::Field(name) => Cow::Borrowed(name),
        }
    }

    /// Owned variant of [`field_name`](Self::field_name).
    #[must_use]
    pub fn into_field_name(self) -> String {
        match self {
            Self::Index(index) => index.to_string(),
            Self::Field(name) => name,
        }
    }

    /// Whether this key addresses a list slot rather than a record field.
    #[must_use]
    pub const fn is_index(&self) -> bool {
        matches!(self, Self::Index(_))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "{index}"),
            Self::Field(name) => f.write_str(name),
        }
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

/// Negative integers cannot address a list slot and become field names.
impl From<i32> for Key {
    fn from(index: i32) -> Self {
        match usize::try_from(index) {
            Ok(index) => Self::Index(index),
            Err(_) => Self::Field(index.to_string()),
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Self::Field(name.to_owned())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Self::Field(name)
    }
}

impl From<&String> for Key {
    fn from(name: &String) -> Self {
        Self::Field(name.clone())
    }
}

/// Renders a path as dot-separated keys (`items.2.name`), `$` for the root.
#[must_use]
pub fn format_path(path: &[Key]) -> String {
    if path.is_empty() {
        return "$".to_owned();
    }
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(".")
}
