#![forbid(unsafe_code)]

use std::sync::Arc;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StateError>;

/// An error travelling on a state tree's error channel.
///
/// Errors are delivered to every subscriber of the failing node, so the type
/// is `Clone`; non-cloneable sources are held behind `Arc`.
#[derive(Debug, Clone, Error)]
pub enum StateError {
    #[error("{message}")]
    Custom { message: String },

    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    #[cfg(feature = "state-persistence")]
    #[error("JSON error: {0}")]
    Json(Arc<serde_json::Error>),

    #[error("unsupported storage format version {found} (expected {expected})")]
    UnsupportedFormat { found: u32, expected: u32 },
}

impl StateError {
    #[must_use]
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for StateError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

#[cfg(feature = "state-persistence")]
impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(Arc::new(err))
    }
}
