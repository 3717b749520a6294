#![forbid(unsafe_code)]

//! Mirroring a state node into a [`Storage`].
//!
//! # Design
//!
//! [`PersistentState`] wraps a node and shares its downstream. While the
//! wrapper has subscribers, one connection taps that downstream and saves
//! every value that differs from the last value synchronised with storage.
//! The same connection listens to [`Storage::changes`] and writes pushed
//! values into the wrapped node.
//!
//! Loading happens once, at construction, independently of subscribers.
//!
//! # Invariants
//!
//! 1. A loaded value replaces the wrapped node's value and is never saved
//!    back. With nothing to load, the current value is saved immediately.
//! 2. A value pushed by storage is never saved back.
//! 3. Each change is saved at most once however many subscribers are
//!    attached, and not at all while none are.
//! 4. The save transform never changes what subscribers observe.
//!
//! # Failure Modes
//!
//! - **Load error**: terminates the wrapper's subscribers with the error;
//!   the wrapped node stays open.
//! - **Storage changes stream errors**: treated like any upstream error of
//!   the wrapper's downstream and delivered to its subscribers.

use std::cell::RefCell;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use rxtree_core::{Change, Value};

use crate::error::StateError;
use crate::state::{Refresh, State};
use crate::storage::Storage;
use crate::stream::{Callbacks, Observer, Subscription};

type Transform = Rc<dyn Fn(Change) -> Change>;

/// A [`State`] whose value is kept in sync with a [`Storage`].
///
/// Dereferences to the wrapper node.
///
/// ```
/// use rxtree_core::Value;
/// use rxtree_runtime::{MemoryStorage, PersistentState, State};
///
/// let storage = MemoryStorage::with_value(Value::Int(7));
/// let root = State::new(Value::Int(1));
/// let persistent = PersistentState::new(&root, storage.clone());
/// assert_eq!(persistent.value(), Some(Value::Int(7)));
/// assert_eq!(storage.save_count(), 0);
/// ```
pub struct PersistentState {
    state: State,
    wrapped: State,
    _loading: Subscription,
}

impl fmt::Debug for PersistentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentState")
            .field("state", &self.state)
            .field("wrapped", &self.wrapped)
            .finish_non_exhaustive()
    }
}

impl PersistentState {
    pub fn new(wrapped: &State, storage: impl Storage + 'static) -> Self {
        Self::build(wrapped, Rc::new(storage), None)
    }

    /// Like [`new`](Self::new), but every change passes through `transform`
    /// before it is saved.
    pub fn with_transform(
        wrapped: &State,
        storage: impl Storage + 'static,
        transform: impl Fn(Change) -> Change + 'static,
    ) -> Self {
        Self::build(wrapped, Rc::new(storage), Some(Rc::new(transform)))
    }

    fn build(wrapped: &State, storage: Rc<dyn Storage>, transform: Option<Transform>) -> Self {
        let synced: Rc<RefCell<Option<Value>>> = Rc::new(RefCell::new(None));

        let encode = move |change: Change| match &transform {
            Some(transform) => transform(change),
            None => change,
        };
        let encode = Rc::new(encode);

        let saves = {
            let synced = Rc::clone(&synced);
            let storage = Rc::clone(&storage);
            let encode = Rc::clone(&encode);
            wrapped.downstream().tap(move |change: &Change| {
                if *synced.borrow() == change.value {
                    return;
                }
                *synced.borrow_mut() = change.value.clone();
                let change = encode(change.clone());
                tracing::debug!(message = "persistent.save", traced = change.is_traced());
                storage.save(change.value.as_ref());
            })
        };

        let source = match storage.changes() {
            Some(pushes) => {
                let inject = injector(wrapped, &synced);
                saves.merge(&pushes.filter_map(move |value: &Option<Value>| {
                    tracing::debug!(message = "persistent.inject", source = "changes");
                    inject(value.clone());
                    None::<Change>
                }))
            }
            None => saves,
        };
        let source = source.take_until(&wrapped.downstream().ignore_elements());

        let reader = wrapped.clone();
        let refresh: Refresh = Rc::new(move || reader.value());
        let state = State::assemble(
            Rc::new(RefCell::new(wrapped.value())),
            source,
            Rc::new(Forward(wrapped.upstream())),
            Some(refresh),
        );

        let loading = match storage.load() {
            Some(loaded) => {
                let inject = injector(wrapped, &synced);
                let failing = state.clone();
                loaded.subscribe_with(
                    Callbacks::new(move |value: &Option<Value>| {
                        tracing::debug!(message = "persistent.inject", source = "load");
                        inject(value.clone());
                    })
                    .on_error(move |err| {
                        tracing::warn!(message = "persistent.load_failed", error = %err);
                        failing.fail(err);
                    }),
                )
            }
            None => {
                let initial = wrapped.value();
                *synced.borrow_mut() = initial.clone();
                let change = encode(Change::untraced(initial));
                tracing::debug!(message = "persistent.save", initial = true);
                storage.save(change.value.as_ref());
                Subscription::empty()
            }
        };

        Self {
            state,
            wrapped: wrapped.clone(),
            _loading: loading,
        }
    }

    /// The node being persisted.
    #[must_use]
    pub fn wrapped(&self) -> &State {
        &self.wrapped
    }

    /// The wrapper as a plain [`State`] handle.
    #[must_use]
    pub fn state(&self) -> &State {
        &self.state
    }
}

impl Deref for PersistentState {
    type Target = State;

    fn deref(&self) -> &State {
        &self.state
    }
}

/// Writes a value coming from storage into `wrapped` without saving it back.
fn injector(wrapped: &State, synced: &Rc<RefCell<Option<Value>>>) -> impl Fn(Option<Value>) + 'static {
    let wrapped = wrapped.clone();
    let synced = Rc::clone(synced);
    move |value| {
        *synced.borrow_mut() = value.clone();
        wrapped.set(value);
    }
}

/// Upstream of the wrapper. Completion stays local to the wrapper.
struct Forward(Rc<dyn Observer<Change>>);

impl Observer<Change> for Forward {
    fn next(&self, change: &Change) {
        self.0.next(change);
    }

    fn error(&self, err: &StateError) {
        self.0.error(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::stream::{Stream, Subject};
    use serde_json::json;

    fn v(json: serde_json::Value) -> Value {
        Value::from(json)
    }

    fn record(state: &State) -> (Rc<RefCell<Vec<Option<Value>>>>, Subscription) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let sub = state.subscribe(move |value| s.borrow_mut().push(value.clone()));
        (seen, sub)
    }

    /// A root whose upstream records every change before reflecting it.
    fn reflecting_root(initial: Value) -> (State, Rc<RefCell<Vec<Option<Value>>>>) {
        let written = Rc::new(RefCell::new(Vec::new()));
        let reflect = Subject::new();
        let w = Rc::clone(&written);
        let r = reflect.clone();
        let root = State::with_channels(
            initial,
            &reflect.stream(),
            Callbacks::new(move |change: &Change| {
                w.borrow_mut().push(change.value.clone());
                r.next(change);
            }),
        );
        (root, written)
    }

    #[test]
    fn empty_storage_keeps_initial_value_and_saves_it() {
        let storage = MemoryStorage::new();
        let persistent = PersistentState::new(&State::new(Value::Int(42)), storage.clone());
        assert_eq!(persistent.value(), Some(Value::Int(42)));
        assert_eq!(storage.saved(), vec![Some(Value::Int(42))]);
    }

    #[test]
    fn stored_value_wins_and_is_not_saved() {
        let storage = MemoryStorage::with_value(None);
        let persistent = PersistentState::new(&State::new(Value::Int(42)), storage.clone());
        assert_eq!(persistent.value(), None);
        assert_eq!(storage.save_count(), 0);
    }

    #[test]
    fn passes_changes_down() {
        let root = State::new(v(json!({"x": 42})));
        let persistent = PersistentState::new(&root, MemoryStorage::new());
        let (seen, _sub) = record(&persistent.sub("x"));
        root.sub("x").set(Value::Int(43));
        assert_eq!(*seen.borrow(), vec![Some(Value::Int(42)), Some(Value::Int(43))]);
    }

    #[test]
    fn saves_changes_coming_down() {
        let root = State::new(v(json!({"x": 42})));
        let storage = MemoryStorage::new();
        let persistent = PersistentState::new(&root, storage.clone());
        let _sub = persistent.subscribe(|_| {});
        root.sub("x").set(Value::Int(43));
        assert_eq!(
            storage.saved(),
            vec![Some(v(json!({"x": 42}))), Some(v(json!({"x": 43})))]
        );
    }

    #[test]
    fn writes_through_wrapper_are_saved() {
        let root = State::new(v(json!({"x": 1})));
        let storage = MemoryStorage::new();
        let persistent = PersistentState::new(&root, storage.clone());
        let _sub = persistent.subscribe(|_| {});
        persistent.sub("x").set(Value::Int(2));
        assert_eq!(root.value(), Some(v(json!({"x": 2}))));
        assert_eq!(storage.stored(), Some(v(json!({"x": 2}))));
    }

    #[test]
    fn listens_to_storage_pushes_without_saving_them() {
        let storage = MemoryStorage::new();
        let persistent = PersistentState::new(&State::new(Value::Int(42)), storage.clone());
        let (seen, _sub) = record(&persistent);
        storage.push(Value::Int(43));
        assert_eq!(*seen.borrow(), vec![Some(Value::Int(42)), Some(Value::Int(43))]);
        assert_eq!(storage.saved(), vec![Some(Value::Int(42))]);
    }

    #[test]
    fn transform_applies_to_saves_only() {
        let root = State::new(v(json!({"x": 42})));
        let storage = MemoryStorage::new();
        let doubled = |change: Change| {
            let x = change
                .value
                .as_ref()
                .and_then(|value| value.get(&"x".into()))
                .and_then(Value::as_i64)
                .unwrap_or(0);
            Change::untraced(Some(v(json!({"x": x * 2}))))
        };
        let persistent = PersistentState::with_transform(&root, storage.clone(), doubled);
        let (seen, _sub) = record(&persistent.sub("x"));
        root.set(v(json!({"x": 43})));
        assert_eq!(
            storage.saved(),
            vec![Some(v(json!({"x": 84}))), Some(v(json!({"x": 86})))]
        );
        assert_eq!(*seen.borrow(), vec![Some(Value::Int(42)), Some(Value::Int(43))]);
    }

    #[test]
    fn one_save_per_change_with_many_subscribers() {
        let root = State::new(Value::Int(42));
        let storage = MemoryStorage::new();
        let persistent = PersistentState::new(&root, storage.clone());
        let _a = persistent.subscribe(|_| {});
        let _b = persistent.subscribe(|_| {});
        root.set(Value::Int(43));
        assert_eq!(storage.saved(), vec![Some(Value::Int(42)), Some(Value::Int(43))]);
    }

    #[test]
    fn no_saves_without_subscribers() {
        let root = State::new(Value::Int(42));
        let storage = MemoryStorage::new();
        let persistent = PersistentState::new(&root, storage.clone());
        persistent.subscribe(|_| {}).unsubscribe();
        root.set(Value::Int(43));
        assert_eq!(storage.saved(), vec![Some(Value::Int(42))]);
    }

    #[test]
    fn one_injection_per_push_with_many_subscribers() {
        let (root, written) = reflecting_root(Value::Int(42));
        let storage = MemoryStorage::new();
        let persistent = PersistentState::new(&root, storage.clone());
        let _a = persistent.subscribe(|_| {});
        let _b = persistent.subscribe(|_| {});
        storage.push(Value::Int(43));
        assert_eq!(*written.borrow(), vec![Some(Value::Int(43))]);
    }

    #[test]
    fn pushes_ignored_while_unsubscribed() {
        let (root, written) = reflecting_root(Value::Int(42));
        let storage = MemoryStorage::new();
        let persistent = PersistentState::new(&root, storage.clone());

        let sub = persistent.subscribe(|_| {});
        storage.push(Value::Int(43));
        drop(sub);
        storage.push(Value::Int(44));
        let sub = persistent.subscribe(|_| {});
        storage.push(Value::Int(45));
        drop(sub);
        storage.push(Value::Int(46));

        assert_eq!(*written.borrow(), vec![Some(Value::Int(43)), Some(Value::Int(45))]);
    }

    #[test]
    fn load_error_terminates_wrapper_only() {
        struct Broken;
        impl Storage for Broken {
            fn load(&self) -> Option<Stream<Option<Value>>> {
                Some(Stream::new(|sink| {
                    sink.error(&StateError::custom("unreadable"));
                    Subscription::empty()
                }))
            }
            fn save(&self, _value: Option<&Value>) {}
        }

        let root = State::new(Value::Int(1));
        let persistent = PersistentState::new(&root, Broken);
        assert!(persistent.is_closed());
        assert!(!root.is_closed());
    }

    #[test]
    fn completing_wrapper_leaves_wrapped_open() {
        let root = State::new(Value::Int(1));
        let persistent = PersistentState::new(&root, MemoryStorage::new());
        persistent.complete();
        assert!(persistent.is_closed());
        assert!(!root.is_closed());
        root.set(Value::Int(2));
        assert_eq!(root.value(), Some(Value::Int(2)));
    }
}
