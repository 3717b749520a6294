#![forbid(unsafe_code)]

//! Core: tree values, key paths, and the change-trace algebra.
//!
//! # Role in rxtree
//! `rxtree-core` is the pure half of the workspace. It knows nothing about
//! streams or subscriptions; it answers "what changed between these two
//! trees" ([`diff`]), "replay this change" ([`apply`]) and "undo this
//! change" ([`reverse`]). The reactive nodes in `rxtree-runtime` route
//! [`Change`] values built from these primitives.
//!
//! # Primary responsibilities
//! - **Value**: persistent JSON-like trees with O(1) clone.
//! - **Key / Path**: child addresses, list indices and record fields.
//! - **Trace**: structural record of which positions changed, and how.
//! - **Change**: a value plus an optional trace, the unit routed by nodes.

pub mod change;
pub mod error;
pub mod key;
pub mod reverse;
pub mod trace;
pub mod value;

pub use change::{Change, change};
pub use error::TraceError;
pub use key::{Key, Path, format_path};
pub use reverse::reverse;
pub use trace::{LeafChange, Trace, apply, diff};
pub use value::{MAX_LIST_GAP, Value};
