#![forbid(unsafe_code)]

//! Storage collaborators for [`PersistentState`](crate::PersistentState).
//!
//! A [`Storage`] can hand over what it holds ([`Storage::load`]), accept new
//! values ([`Storage::save`]), and optionally announce values written by
//! someone else ([`Storage::changes`]).
//!
//! Backends:
//!
//! - [`MemoryStorage`]: an in-process slot, always available.
//! - `JsonFileStorage`: a JSON file, behind the `state-persistence` feature.

#[cfg(feature = "state-persistence")]
mod file;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use rxtree_core::Value;

use crate::stream::{Stream, Subject};

#[cfg(feature = "state-persistence")]
pub use file::{FORMAT_VERSION, FileStorageConfig, JsonFileStorage};

/// The load/save contract a persistent state talks to.
pub trait Storage {
    /// What is currently stored, or `None` when nothing is. The stream may
    /// emit later (asynchronous backends) and may emit more than once.
    fn load(&self) -> Option<Stream<Option<Value>>>;

    /// Stores `value`.
    fn save(&self, value: Option<&Value>);

    /// Values written to the storage by someone else.
    fn changes(&self) -> Option<Stream<Option<Value>>> {
        None
    }
}

impl<S: Storage + ?Sized> Storage for Rc<S> {
    fn load(&self) -> Option<Stream<Option<Value>>> {
        (**self).load()
    }

    fn save(&self, value: Option<&Value>) {
        (**self).save(value);
    }

    fn changes(&self) -> Option<Stream<Option<Value>>> {
        (**self).changes()
    }
}

struct MemoryInner {
    slot: RefCell<Option<Option<Value>>>,
    saves: RefCell<Vec<Option<Value>>>,
    loads: Cell<usize>,
    pushes: Subject<Option<Value>>,
}

/// Storage backed by an in-process slot.
///
/// Cloning creates a new handle to the **same** slot, so a test can keep a
/// handle to inspect or [`push`](Self::push) while the persistent state owns
/// another.
#[derive(Clone)]
pub struct MemoryStorage {
    inner: Rc<MemoryInner>,
}

impl fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("stored", &self.inner.slot.borrow())
            .field("save_count", &self.save_count())
            .finish()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    /// Empty storage: `load` yields nothing.
    pub fn new() -> Self {
        Self::from_slot(None)
    }

    /// Storage already holding `value`.
    pub fn with_value(value: impl Into<Option<Value>>) -> Self {
        Self::from_slot(Some(value.into()))
    }

    fn from_slot(slot: Option<Option<Value>>) -> Self {
        Self {
            inner: Rc::new(MemoryInner {
                slot: RefCell::new(slot),
                saves: RefCell::new(Vec::new()),
                loads: Cell::new(0),
                pushes: Subject::new(),
            }),
        }
    }

    /// Simulates an external writer: stores `value` and announces it on
    /// [`Storage::changes`].
    pub fn push(&self, value: impl Into<Option<Value>>) {
        let value = value.into();
        *self.inner.slot.borrow_mut() = Some(value.clone());
        self.inner.pushes.next(&value);
    }

    /// The stored value; `None` both when empty and when `None` is stored.
    #[must_use]
    pub fn stored(&self) -> Option<Value> {
        self.inner.slot.borrow().clone().flatten()
    }

    /// Whether anything (even `None`) has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.slot.borrow().is_none()
    }

    /// Every value passed to [`Storage::save`], oldest first.
    #[must_use]
    pub fn saved(&self) -> Vec<Option<Value>> {
        self.inner.saves.borrow().clone()
    }

    #[must_use]
    pub fn save_count(&self) -> usize {
        self.inner.saves.borrow().len()
    }

    /// How many times [`Storage::load`] was asked for a stream.
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.inner.loads.get()
    }
}

impl Storage for MemoryStorage {
    fn load(&self) -> Option<Stream<Option<Value>>> {
        self.inner.loads.set(self.inner.loads.get() + 1);
        let stored = self.inner.slot.borrow().clone();
        stored.map(Stream::of)
    }

    fn save(&self, value: Option<&Value>) {
        let value = value.cloned();
        *self.inner.slot.borrow_mut() = Some(value.clone());
        self.inner.saves.borrow_mut().push(value);
    }

    fn changes(&self) -> Option<Stream<Option<Value>>> {
        Some(self.inner.pushes.stream())
    }
}
