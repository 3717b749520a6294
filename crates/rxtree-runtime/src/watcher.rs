#![forbid(unsafe_code)]

//! Identity tracking for list items.
//!
//! A [`Watcher`] remembers where each item of a list sits, keyed by a
//! caller-supplied identity function, and reports how a new version of the
//! list differs from the last one in terms of identities rather than
//! positions.
//!
//! # Invariants
//!
//! 1. Every key of the new list is either an addition or present in the old
//!    map; every key of the old map is either a deletion or present in the
//!    new list.
//! 2. A key is reported as moved exactly when it is present in both maps at
//!    different indices. The reported item is the old one.
//! 3. Additions follow the new list's order; deletions and moves follow the
//!    old list's order.
//! 4. A missing or non-list value is the empty list.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use rxtree_core::Value;

/// Identity of a list item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ItemKey {
    Num(i64),
    Str(String),
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ItemKey {
    fn from(n: i64) -> Self {
        Self::Num(n)
    }
}

impl From<i32> for ItemKey {
    fn from(n: i32) -> Self {
        Self::Num(i64::from(n))
    }
}

impl From<&str> for ItemKey {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for ItemKey {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

/// Maps an item to its identity. Must be stable and collision-free within
/// one list.
pub type KeyFn = Rc<dyn Fn(&Value) -> ItemKey>;

/// Where an item currently sits.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub index: usize,
    pub item: Value,
}

/// Entries in list order.
pub type KeyMap = IndexMap<ItemKey, Entry>;

#[derive(Debug, Clone, PartialEq)]
pub struct Addition {
    pub index: usize,
    pub item: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Deletion {
    pub index: usize,
    pub item: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Move {
    pub old_index: usize,
    pub new_index: usize,
    pub item: Value,
}

/// Identity-level difference between two versions of a list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListChanges {
    pub additions: Vec<Addition>,
    pub deletions: Vec<Deletion>,
    pub moves: Vec<Move>,
}

impl ListChanges {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.deletions.is_empty() && self.moves.is_empty()
    }
}

/// Tracks the key map of one list across versions.
pub struct Watcher {
    key_fn: KeyFn,
    keymap: Rc<KeyMap>,
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("keymap", &self.keymap)
            .finish_non_exhaustive()
    }
}

impl Watcher {
    pub fn new(initial: Option<&Value>, key_fn: KeyFn) -> Self {
        let mut watcher = Self {
            key_fn,
            keymap: Rc::new(KeyMap::new()),
        };
        watcher.sync(initial);
        watcher
    }

    /// Rebuilds the key map from `list` without reporting differences.
    pub fn sync(&mut self, list: Option<&Value>) {
        self.keymap = Rc::new(self.index(list));
    }

    /// Rebuilds the key map from `list` and reports what changed.
    pub fn changes(&mut self, list: Option<&Value>) -> ListChanges {
        let next = self.index(list);
        let previous = &self.keymap;
        let mut changes = ListChanges::default();

        for (key, entry) in &next {
            if !previous.contains_key(key) {
                changes.additions.push(Addition {
                    index: entry.index,
                    item: entry.item.clone(),
                });
            }
        }
        for (key, old) in previous.iter() {
            match next.get(key) {
                None => changes.deletions.push(Deletion {
                    index: old.index,
                    item: old.item.clone(),
                }),
                Some(new) if new.index != old.index => changes.moves.push(Move {
                    old_index: old.index,
                    new_index: new.index,
                    item: old.item.clone(),
                }),
                Some(_) => {}
            }
        }

        self.keymap = Rc::new(next);
        changes
    }

    #[must_use]
    pub fn get(&self, key: &ItemKey) -> Option<&Entry> {
        self.keymap.get(key)
    }

    /// The current key map. Cheap to clone and never mutated afterwards.
    #[must_use]
    pub fn snapshot(&self) -> Rc<KeyMap> {
        Rc::clone(&self.keymap)
    }

    fn index(&self, list: Option<&Value>) -> KeyMap {
        let mut keymap = KeyMap::new();
        let Some(items) = list.and_then(Value::as_list) else {
            return keymap;
        };
        for (index, item) in items.iter().enumerate() {
            let key = (self.key_fn)(item);
            let entry = Entry {
                index,
                item: item.clone(),
            };
            if let Some(earlier) = keymap.insert(key.clone(), entry) {
                tracing::warn!(
                    message = "keyed.duplicate_key",
                    key = %key,
                    first_index = earlier.index,
                    index,
                );
            }
        }
        keymap
    }
}
