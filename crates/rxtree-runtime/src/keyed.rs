#![forbid(unsafe_code)]

//! Identity-addressed views over a list state.
//!
//! # Design
//!
//! [`KeyedState`] runs a [`Watcher`] over every change reaching the wrapped
//! list node and broadcasts, once per change, the change itself together
//! with the resulting [`ListChanges`] and a snapshot of the key map. Key
//! nodes resolve their key against that snapshot, so a message always
//! carries the index mapping that was valid when it was produced.
//!
//! Positional traces say nothing useful about an item that moved: its new
//! slot may hold an entirely different item in the old list. Before
//! broadcasting, the sub-trace of every destination index of a move is
//! therefore replaced by the diff between the item before the move and the
//! item now at that index, and every added index gets a leaf from nothing.
//!
//! # Invariants
//!
//! 1. A key node receives a change only if its own item changed; reordering
//!    alone is silent.
//! 2. An item moved and mutated in the same update delivers exactly the
//!    mutated paths.
//! 3. A key that disappears yields `None` on its node.
//! 4. The watcher is synchronised from the list before it is used by an
//!    inactive keyed state.
//!
//! # Failure Modes
//!
//! - **Write through a missing key**: dropped with a `keyed.key_missing`
//!   warning.
//! - **Duplicate keys**: see [`Watcher`]; the later item wins.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use rxtree_core::{Change, Key, Trace, Value, diff};

use crate::error::StateError;
use crate::state::{Equality, Refresh, Slot, State};
use crate::stream::{Callbacks, Observer, Shared, Stream, Subscription};
use crate::watcher::{ItemKey, KeyFn, KeyMap, ListChanges, Watcher};

#[derive(Clone)]
struct KeyedChange {
    change: Change,
    list: Rc<ListChanges>,
    keymap: Rc<KeyMap>,
}

/// A list state whose items can be addressed by identity.
///
/// ```
/// use rxtree_core::{Key, Value};
/// use rxtree_runtime::{ItemKey, KeyedState, State};
///
/// let list = State::new(Value::list([
///     Value::record([("id", 1), ("n", 10)]),
///     Value::record([("id", 2), ("n", 20)]),
/// ]));
/// let keyed = KeyedState::new(&list, |item| match item.get(&Key::from("id")) {
///     Some(Value::Int(id)) => ItemKey::Num(*id),
///     _ => ItemKey::Str(String::new()),
/// });
/// keyed.key(2).sub("n").set(Value::Int(21));
/// assert_eq!(
///     list.value().and_then(|l| l.get(&Key::Index(1)).cloned()),
///     Some(Value::record([("id", 2), ("n", 21)])),
/// );
/// ```
#[derive(Clone)]
pub struct KeyedState {
    state: State,
    watcher: Rc<RefCell<Watcher>>,
    feed: Shared<KeyedChange>,
}

impl fmt::Debug for KeyedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedState")
            .field("state", &self.state)
            .field("watcher", &self.watcher.borrow())
            .finish()
    }
}

impl KeyedState {
    pub fn new(state: &State, key_fn: impl Fn(&Value) -> ItemKey + 'static) -> Self {
        let key_fn: KeyFn = Rc::new(key_fn);
        let watcher = Rc::new(RefCell::new(Watcher::new(state.value().as_ref(), key_fn)));

        let tracker = Rc::clone(&watcher);
        let reconciled = state.downstream().map(move |change: &Change| {
            let mut watcher = tracker.borrow_mut();
            let list = watcher.changes(change.value.as_ref());
            KeyedChange {
                change: retrace(change, &list),
                list: Rc::new(list),
                keymap: watcher.snapshot(),
            }
        });

        let resync = Rc::clone(&watcher);
        let source = state.clone();
        let activated = Stream::new(move |sink| {
            let current = source.value();
            resync.borrow_mut().sync(current.as_ref());
            reconciled.subscribe_with(sink)
        });

        Self {
            state: state.clone(),
            watcher,
            feed: activated.share(),
        }
    }

    /// The wrapped list node.
    #[must_use]
    pub fn state(&self) -> &State {
        &self.state
    }

    #[must_use]
    pub fn value(&self) -> Option<Value> {
        self.state.value()
    }

    pub fn set(&self, value: impl Into<Option<Value>>) {
        self.state.set(value);
    }

    pub fn error(&self, err: StateError) {
        self.state.error(err);
    }

    pub fn complete(&self) {
        self.state.complete();
    }

    /// Subscribes to the list value; also keeps the watcher active.
    pub fn subscribe(&self, on_value: impl Fn(&Option<Value>) + 'static) -> Subscription {
        self.subscribe_with(Callbacks::new(on_value))
    }

    pub fn subscribe_with(&self, observer: impl Observer<Option<Value>> + 'static) -> Subscription {
        let reader = self.state.clone();
        self.feed
            .stream()
            .map(|keyed: &KeyedChange| keyed.change.value.clone())
            .with_replay(move || reader.value())
            .subscribe_with(observer)
    }

    /// Identity-level differences, one per change that has any.
    pub fn changes(&self) -> Stream<ListChanges> {
        self.feed
            .stream()
            .filter_map(|keyed: &KeyedChange| (!keyed.list.is_empty()).then(|| (*keyed.list).clone()))
    }

    /// The current index of `key`: replayed on subscribe, then re-emitted
    /// whenever it changes. `None` while the key is absent.
    pub fn index(&self, key: impl Into<ItemKey>) -> Stream<Option<usize>> {
        let key = key.into();
        let lookup = key.clone();
        let keyed = self.clone();
        self.feed
            .stream()
            .map(move |change: &KeyedChange| change.keymap.get(&lookup).map(|entry| entry.index))
            .with_replay(move || keyed.entry(&key).map(|(index, _)| index))
            .distinct_until_changed()
    }

    /// A node following the item with identity `key`, wherever it moves.
    pub fn key(&self, key: impl Into<ItemKey>) -> State {
        self.key_with(key, |new, old| new == old)
    }

    /// Like [`key`](Self::key), comparing untraced changes with `eq`.
    pub fn key_with(
        &self,
        key: impl Into<ItemKey>,
        eq: impl Fn(Option<&Value>, Option<&Value>) -> bool + 'static,
    ) -> State {
        let key = key.into();
        let eq: Equality = Rc::new(eq);
        let value: Slot = Rc::new(RefCell::new(self.entry(&key).map(|(_, item)| item)));

        let tracked = Rc::clone(&value);
        let address = key.clone();
        let source = self.feed.stream().filter_map(move |keyed: &KeyedChange| {
            let entry = keyed.keymap.get(&address);
            if let (Some(Trace::Node { subs }), Some(entry)) = (&keyed.change.trace, entry) {
                return subs
                    .get(&Key::Index(entry.index))
                    .map(|sub| Change::new(Some(entry.item.clone()), Some(sub.clone())));
            }
            let next = entry.map(|entry| entry.item.clone());
            let current = tracked.borrow().clone();
            (!eq(next.as_ref(), current.as_ref())).then(|| Change::untraced(next))
        });

        let reader = self.clone();
        let refresh_key = key.clone();
        let refresh: Refresh = Rc::new(move || reader.entry(&refresh_key).map(|(_, item)| item));
        let upstream = Rc::new(KeyUpstream {
            keyed: self.clone(),
            key,
        });
        State::assemble(value, source, upstream, Some(refresh))
    }

    /// Index and item of `key`, resynchronising the watcher first when no
    /// change stream keeps it current.
    fn entry(&self, key: &ItemKey) -> Option<(usize, Value)> {
        if !self.feed.is_connected() {
            let current = self.state.value();
            self.watcher.borrow_mut().sync(current.as_ref());
        }
        self.watcher
            .borrow()
            .get(key)
            .map(|entry| (entry.index, entry.item.clone()))
    }
}

/// Rewrites the sub-traces of moved and added indices so they describe the
/// item now at each index relative to where that item came from.
fn retrace(change: &Change, list: &ListChanges) -> Change {
    let Some(Trace::Node { subs }) = &change.trace else {
        return change.clone();
    };
    if list.moves.is_empty() && list.additions.is_empty() {
        return change.clone();
    }

    let items = change.value.as_ref().and_then(Value::as_list);
    let mut subs = subs.clone();
    for moved in &list.moves {
        let key = Key::Index(moved.new_index);
        let landed = items.and_then(|items| items.get(moved.new_index));
        match diff(Some(&moved.item), landed) {
            Some(sub) => {
                subs.insert(key, sub);
            }
            None => {
                subs.remove(&key);
            }
        }
    }
    for added in &list.additions {
        subs.insert(Key::Index(added.index), Trace::leaf(None, Some(added.item.clone())));
    }

    let trace = (!subs.is_empty()).then_some(Trace::Node { subs });
    Change::new(change.value.clone(), trace)
}

/// Upstream of a key node: writes at the key's current index.
struct KeyUpstream {
    keyed: KeyedState,
    key: ItemKey,
}

impl Observer<Change> for KeyUpstream {
    fn next(&self, change: &Change) {
        match self.keyed.entry(&self.key) {
            Some((index, _)) => self.keyed.state.write_child(&Key::Index(index), change),
            None => tracing::warn!(message = "keyed.key_missing", key = %self.key),
        }
    }

    fn error(&self, err: &StateError) {
        self.keyed.state.upstream().error(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v(json: serde_json::Value) -> Value {
        Value::from(json)
    }

    fn by_id(item: &Value) -> ItemKey {
        match item.get(&Key::from("id")) {
            Some(Value::Int(n)) => ItemKey::Num(*n),
            _ => ItemKey::Str(item.to_string()),
        }
    }

    fn people() -> Value {
        v(json!([
            {"id": 101, "name": "Jack"},
            {"id": 102, "name": "Jill"},
        ]))
    }

    #[test]
    fn retrace_drops_unchanged_moves() {
        let before = v(json!([{"id": 1}, {"id": 2}]));
        let after = v(json!([{"id": 2}, {"id": 1}]));
        let forward = rxtree_core::change(Some(&before), Some(&after)).unwrap();
        let mut watcher = Watcher::new(Some(&before), Rc::new(by_id));
        let list = watcher.changes(Some(&after));
        assert_eq!(retrace(&forward, &list).trace, None);
    }

    #[test]
    fn key_node_follows_item_across_reorder() {
        let root = State::new(people());
        let keyed = KeyedState::new(&root, by_id);
        let jill = keyed.key(102);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let _sub = jill.sub("name").subscribe(move |name| s.borrow_mut().push(name.clone()));

        root.set(v(json!([
            {"id": 102, "name": "Jill"},
            {"id": 101, "name": "Jack"},
        ])));
        jill.sub("name").set(Value::from("Judy"));

        assert_eq!(
            *seen.borrow(),
            vec![Some(Value::from("Jill")), Some(Value::from("Judy"))]
        );
        assert_eq!(
            root.value(),
            Some(v(json!([
                {"id": 102, "name": "Judy"},
                {"id": 101, "name": "Jack"},
            ])))
        );
    }

    #[test]
    fn removed_key_yields_none() {
        let root = State::new(people());
        let keyed = KeyedState::new(&root, by_id);
        let jack = keyed.key(101);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let _sub = jack.subscribe(move |value| s.borrow_mut().push(value.clone()));
        root.set(v(json!([{"id": 102, "name": "Jill"}])));
        assert_eq!(seen.borrow().last(), Some(&None));
    }

    #[test]
    fn write_to_missing_key_is_dropped() {
        let root = State::new(people());
        let keyed = KeyedState::new(&root, by_id);
        keyed.key(999).set(v(json!({"id": 999})));
        assert_eq!(root.value(), Some(people()));
    }

    #[test]
    fn inactive_keyed_state_resyncs_before_writing() {
        let root = State::new(people());
        let keyed = KeyedState::new(&root, by_id);
        let jack = keyed.key(101);
        root.set(v(json!([
            {"id": 102, "name": "Jill"},
            {"id": 101, "name": "Jack"},
        ])));
        jack.sub("name").set(Value::from("John"));
        assert_eq!(
            root.value(),
            Some(v(json!([
                {"id": 102, "name": "Jill"},
                {"id": 101, "name": "John"},
            ])))
        );
    }

    #[test]
    fn index_stream_tracks_position() {
        let root = State::new(people());
        let keyed = KeyedState::new(&root, by_id);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let _sub = keyed.index(101).subscribe(move |i| s.borrow_mut().push(*i));
        root.set(v(json!([
            {"id": 102, "name": "Jill"},
            {"id": 101, "name": "Jack"},
        ])));
        root.set(v(json!([
            {"id": 102, "name": "Jane"},
            {"id": 101, "name": "Jack"},
        ])));
        root.set(v(json!([{"id": 102, "name": "Jane"}])));
        assert_eq!(*seen.borrow(), vec![Some(0), Some(1), None]);
    }

    #[test]
    fn changes_skip_in_place_edits() {
        let root = State::new(people());
        let keyed = KeyedState::new(&root, by_id);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let _sub = keyed.changes().subscribe(move |c| s.borrow_mut().push(c.clone()));
        root.sub(0usize).sub("name").set(Value::from("Jake"));
        root.set(v(json!([{"id": 103, "name": "Joe"}])));
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(seen.borrow()[0].additions.len(), 1);
        assert_eq!(seen.borrow()[0].deletions.len(), 2);
    }
}
