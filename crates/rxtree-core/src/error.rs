#![forbid(unsafe_code)]

//! Errors raised when a trace or an entry cannot be laid onto a value.

use thiserror::Error;

use crate::key::Key;

/// A key addressed a value that cannot hold it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraceError {
    /// The key addressed a child of a scalar.
    #[error("cannot address `{key}` inside a {found} value")]
    NotAContainer { key: Key, found: &'static str },

    /// A list was addressed by a non-numeric field, or by an index too far
    /// past its end.
    #[error("`{key}` is not a valid list index")]
    InvalidIndex { key: Key },
}
