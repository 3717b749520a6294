#![forbid(unsafe_code)]

//! rxtree public facade crate.
//!
//! Re-exports the change algebra from `rxtree-core` and the state nodes from
//! `rxtree-runtime` behind one dependency.
//!
//! ```
//! use rxtree::prelude::*;
//!
//! let root = State::new(Value::record([("count", 1)]));
//! let count = root.sub("count");
//! count.set(Value::Int(2));
//! assert_eq!(root.value(), Some(Value::record([("count", 2)])));
//! ```

pub mod prelude {
    pub use rxtree_core as core;
    pub use rxtree_runtime as runtime;

    pub use rxtree_core::{Change, Key, Path, Trace, Value, apply, change, diff, reverse};
    pub use rxtree_runtime::{
        Callbacks, ItemKey, KeyedState, ListChanges, MemoryStorage, Observer, PersistentState,
        State, StateError, Storage, Stream, Subscription, VerifiedState,
    };

    #[cfg(feature = "state-persistence")]
    pub use rxtree_runtime::{FileStorageConfig, JsonFileStorage};
}
