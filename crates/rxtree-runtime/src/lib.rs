#![forbid(unsafe_code)]

//! Runtime: reactive state nodes over the `rxtree-core` change algebra.
//!
//! # Role in rxtree
//! `rxtree-runtime` turns [`Value`](rxtree_core::Value) trees into live,
//! addressable state. A [`State`] is one position in a tree; deriving
//! [`State::sub`] nodes, subscribing and writing all go through the same
//! upstream/downstream protocol, so a write anywhere reaches every
//! interested subscriber exactly once.
//!
//! # Primary responsibilities
//! - **State**: value cells with equality-suppressed emission and
//!   key-addressed derivation.
//! - **KeyedState**: list items addressed by identity instead of index.
//! - **VerifiedState**: predicate-gated writes with automatic rollback.
//! - **PersistentState**: mirroring into a [`Storage`] without feedback.
//! - **stream**: the single-threaded push-stream plumbing underneath.
//!
//! # Feature flags
//! - `state-persistence`: JSON file storage (`JsonFileStorage`).

pub mod error;
pub mod keyed;
pub mod persistent;
pub mod state;
pub mod storage;
pub mod stream;
pub mod verified;
pub mod watcher;

pub use error::{Result, StateError};
pub use keyed::KeyedState;
pub use persistent::PersistentState;
pub use state::{Equality, State};
#[cfg(feature = "state-persistence")]
pub use storage::{FORMAT_VERSION, FileStorageConfig, JsonFileStorage};
pub use storage::{MemoryStorage, Storage};
pub use stream::{Callbacks, Observer, Stream, Subject, Subscription};
pub use verified::VerifiedState;
pub use watcher::{Addition, Deletion, Entry, ItemKey, KeyFn, KeyMap, ListChanges, Move, Watcher};
