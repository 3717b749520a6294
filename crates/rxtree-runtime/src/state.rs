#![forbid(unsafe_code)]

//! Reactive state nodes.
//!
//! # Design
//!
//! A [`State`] is a cell holding an `Option<Value>` plus two channels:
//!
//! - **downstream**: a shared stream of [`Change`]s flowing from the root
//!   towards this node. Every subscriber and every derived node attaches to
//!   the same connection, so each change is filtered once per node.
//! - **upstream**: an [`Observer`] receiving the changes this node (or a
//!   node derived from it) wants to make.
//!
//! A root built with [`State::new`] closes the loop itself: its upstream
//! records the change and rebroadcasts it on its own downstream. A node
//! derived with [`State::sub`] filters its parent's downstream down to one
//! key and, on the way up, patches its parent's value copy-on-write and
//! re-emits the patch one level higher.
//!
//! # Invariants
//!
//! 1. Writing a value equal to the current one emits nothing, anywhere.
//! 2. Subscribers receive the current value first, then every accepted
//!    change, in submission order, including changes submitted re-entrantly
//!    from inside a subscriber callback.
//! 3. A node's tracked value is mutated only by its own downstream and its
//!    own upstream handler.
//! 4. Completing a node closes its own subscribers and the nodes derived
//!    from it, never its ancestors or siblings.
//!
//! # Failure Modes
//!
//! - **Write below a closed node**: dropped at the first closed ancestor
//!   with `state.write_ignored`; no slot above it changes.
//! - **Write into a scalar parent**: rejected with a `state.write_rejected`
//!   warning; nothing is emitted.
//! - **Error reaching a root loopback**: logged as `state.upstream_error`;
//!   the tree stays alive.
//! - **Panicking equality check**: surfaces to the caller of the write that
//!   triggered it. The root's write queue is reset so later writes still
//!   flow.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use rxtree_core::{Change, Key, Trace, Value, change};

use crate::error::StateError;
use crate::stream::{Callbacks, Observer, Shared, Stream, Subject, Subscription};

pub(crate) type Slot = Rc<RefCell<Option<Value>>>;
pub(crate) type Refresh = Rc<dyn Fn() -> Option<Value>>;

/// Decides whether an untraced change left a derived node's value unchanged.
///
/// Called as `eq(new, old)`.
pub type Equality = Rc<dyn Fn(Option<&Value>, Option<&Value>) -> bool>;

struct Node {
    value: Slot,
    downstream: Shared<Change>,
    upstream: Rc<dyn Observer<Change>>,
    lifecycle: Subject<()>,
    refresh: Option<Refresh>,
}

/// A reactive handle onto one position of a state tree.
///
/// Cloning a `State` creates a new handle to the **same** node.
///
/// ```
/// use rxtree_core::Value;
/// use rxtree_runtime::State;
///
/// let root = State::new(Value::record([("a", 1), ("b", 2)]));
/// let a = root.sub("a");
/// a.set(Value::Int(9));
/// assert_eq!(root.value(), Some(Value::record([("a", 9), ("b", 2)])));
/// ```
#[derive(Clone)]
pub struct State {
    node: Rc<Node>,
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("value", &self.node.value.borrow())
            .field("active", &self.is_active())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl State {
    /// A root node with its own loopback channel.
    pub fn new(initial: impl Into<Option<Value>>) -> Self {
        let value: Slot = Rc::new(RefCell::new(initial.into()));
        let loopback = Loopback::new(Rc::clone(&value));
        let source = loopback.subject.stream();
        Self::assemble(value, source, Rc::new(loopback), None)
    }

    /// A node fed by an external downstream and writing to an external
    /// upstream.
    ///
    /// Incoming leaf traces between two containers are refined into node
    /// traces so derived nodes can be addressed precisely.
    pub fn with_channels(
        initial: impl Into<Option<Value>>,
        downstream: &Stream<Change>,
        upstream: impl Observer<Change> + 'static,
    ) -> Self {
        let source = downstream.map(|change: &Change| change.clone().post_trace());
        Self::assemble(
            Rc::new(RefCell::new(initial.into())),
            source,
            Rc::new(upstream),
            None,
        )
    }

    pub(crate) fn assemble(
        value: Slot,
        source: Stream<Change>,
        upstream: Rc<dyn Observer<Change>>,
        refresh: Option<Refresh>,
    ) -> Self {
        let lifecycle = Subject::new();
        let tracked = Rc::clone(&value);
        let tapped = source
            .take_until(&lifecycle.stream())
            .tap(move |change: &Change| {
                *tracked.borrow_mut() = change.value.clone();
            });

        let resync = Rc::clone(&value);
        let on_connect = refresh.clone();
        let connected = Stream::new(move |sink| {
            let connection = tapped.subscribe_with(sink);
            if let Some(refresh) = &on_connect {
                let fresh = refresh();
                *resync.borrow_mut() = fresh;
            }
            connection
        });

        Self {
            node: Rc::new(Node {
                value,
                downstream: connected.share(),
                upstream,
                lifecycle,
                refresh,
            }),
        }
    }

    /// The current value.
    ///
    /// An inactive derived node re-reads it from its source first.
    #[must_use]
    pub fn value(&self) -> Option<Value> {
        if let Some(refresh) = &self.node.refresh
            && !self.is_active()
        {
            let fresh = refresh();
            *self.node.value.borrow_mut() = fresh.clone();
            return fresh;
        }
        self.node.value.borrow().clone()
    }

    /// Proposes `value`, traced against the current value.
    pub fn set(&self, value: impl Into<Option<Value>>) {
        if self.is_closed() {
            tracing::debug!(message = "state.write_ignored", reason = "closed");
            return;
        }
        let value = value.into();
        let current = self.value();
        match change(current.as_ref(), value.as_ref()) {
            Some(change) => self.node.upstream.next(&change),
            None => tracing::debug!(message = "state.suppressed", reason = "equal"),
        }
    }

    /// Proposes `value` as an untraced replacement.
    pub fn replace(&self, value: impl Into<Option<Value>>) {
        if self.is_closed() {
            tracing::debug!(message = "state.write_ignored", reason = "closed");
            return;
        }
        let value = value.into();
        if self.value() == value {
            tracing::debug!(message = "state.suppressed", reason = "equal");
            return;
        }
        self.node.upstream.next(&Change::untraced(value));
    }

    /// Subscribes to values: the current one first, then every change.
    pub fn subscribe(&self, on_value: impl Fn(&Option<Value>) + 'static) -> Subscription {
        self.subscribe_with(Callbacks::new(on_value))
    }

    pub fn subscribe_with(&self, observer: impl Observer<Option<Value>> + 'static) -> Subscription {
        self.values().subscribe_with(observer)
    }

    /// The stream behind [`subscribe`](Self::subscribe).
    pub fn values(&self) -> Stream<Option<Value>> {
        let reader = self.clone();
        self.downstream()
            .map(|change: &Change| change.value.clone())
            .with_replay(move || reader.value())
    }

    /// Raw changes reaching this node.
    pub fn downstream(&self) -> Stream<Change> {
        self.node.downstream.stream()
    }

    /// The sink this node writes its changes to.
    pub fn upstream(&self) -> Rc<dyn Observer<Change>> {
        Rc::clone(&self.node.upstream)
    }

    /// A node addressed at `key`, comparing untraced changes with `==`.
    pub fn sub(&self, key: impl Into<Key>) -> State {
        self.sub_with(key, |new, old| new == old)
    }

    /// A node addressed at `key`, comparing untraced changes with `eq`.
    pub fn sub_with(
        &self,
        key: impl Into<Key>,
        eq: impl Fn(Option<&Value>, Option<&Value>) -> bool + 'static,
    ) -> State {
        let key = key.into();
        let eq: Equality = Rc::new(eq);
        let value: Slot = Rc::new(RefCell::new(child_of(self.value(), &key)));

        let tracked = Rc::clone(&value);
        let address = key.clone();
        let source = self.downstream().filter_map(move |change: &Change| {
            let narrowed = change.narrow(&address)?;
            if narrowed.is_traced() {
                return Some(narrowed);
            }
            let current = tracked.borrow().clone();
            let unchanged = eq(narrowed.value.as_ref(), current.as_ref());
            (!unchanged).then_some(narrowed)
        });

        let parent = self.clone();
        let refresh_key = key.clone();
        let refresh: Refresh = Rc::new(move || child_of(parent.value(), &refresh_key));
        let upstream = Rc::new(ChildUpstream {
            parent: self.clone(),
            key,
        });
        State::assemble(value, source, upstream, Some(refresh))
    }

    /// Terminates this node's subtree with `err` and forwards it upstream.
    pub fn error(&self, err: StateError) {
        self.node.lifecycle.error(&err);
        self.node.upstream.error(&err);
    }

    /// Closes this node's subscribers and derived nodes.
    pub fn complete(&self) {
        self.node.lifecycle.complete();
        self.node.upstream.complete();
    }

    /// Terminates this node's subtree without telling upstream.
    pub(crate) fn fail(&self, err: &StateError) {
        self.node.lifecycle.error(err);
    }

    /// Whether the shared downstream is connected.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.node.downstream.is_connected()
    }

    /// Whether the node has completed or errored.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.node.lifecycle.is_terminated()
    }

    /// Writes `change` into this node's value at `key` and emits the patch
    /// upwards.
    pub(crate) fn write_child(&self, key: &Key, change: &Change) {
        if self.is_closed() {
            tracing::debug!(message = "state.write_ignored", reason = "closed", key = %key);
            return;
        }
        let base = self.value();
        let previous = base.as_ref().and_then(|value| value.get(key)).cloned();
        let updated = match Value::with_entry(base.as_ref(), key, change.value.clone()) {
            Ok(updated) => updated,
            Err(err) => {
                tracing::warn!(message = "state.write_rejected", key = %key, error = %err);
                return;
            }
        };
        *self.node.value.borrow_mut() = Some(updated.clone());
        let trace = change
            .trace
            .clone()
            .unwrap_or_else(|| Trace::leaf(previous, change.value.clone()));
        self.node
            .upstream
            .next(&Change::new(Some(updated), Some(Trace::wrap(key.clone(), trace))));
    }
}

impl Observer<Option<Value>> for State {
    fn next(&self, value: &Option<Value>) {
        self.set(value.clone());
    }

    fn error(&self, err: &StateError) {
        State::error(self, err.clone());
    }

    fn complete(&self) {
        State::complete(self);
    }
}

fn child_of(parent: Option<Value>, key: &Key) -> Option<Value> {
    parent.and_then(|value| value.get(key).cloned())
}

/// Upstream of a node derived with [`State::sub`].
struct ChildUpstream {
    parent: State,
    key: Key,
}

impl Observer<Change> for ChildUpstream {
    fn next(&self, change: &Change) {
        self.parent.write_child(&self.key, change);
    }

    fn error(&self, err: &StateError) {
        self.parent.node.upstream.error(err);
    }
}

/// Upstream of a root: records each change and rebroadcasts it downstream.
///
/// Changes submitted while a broadcast is in flight are queued and
/// delivered afterwards, in order.
struct Loopback {
    value: Slot,
    subject: Subject<Change>,
    queue: RefCell<VecDeque<Change>>,
    draining: Cell<bool>,
}

impl Loopback {
    fn new(value: Slot) -> Self {
        Self {
            value,
            subject: Subject::new(),
            queue: RefCell::new(VecDeque::new()),
            draining: Cell::new(false),
        }
    }
}

/// Resets the loopback queue if a subscriber panics mid-broadcast.
struct DrainGuard<'a>(&'a Loopback);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.queue.borrow_mut().clear();
        self.0.draining.set(false);
    }
}

impl Observer<Change> for Loopback {
    fn next(&self, change: &Change) {
        if self.subject.is_terminated() {
            tracing::debug!(message = "state.write_ignored", reason = "closed");
            return;
        }
        *self.value.borrow_mut() = change.value.clone();
        self.queue.borrow_mut().push_back(change.clone());
        if self.draining.replace(true) {
            tracing::trace!(message = "state.queued", pending = self.queue.borrow().len());
            return;
        }
        let _guard = DrainGuard(self);
        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some(next) = next else { break };
            self.subject.next(&next);
        }
    }

    fn error(&self, err: &StateError) {
        tracing::warn!(message = "state.upstream_error", error = %err);
    }

    fn complete(&self) {
        self.subject.complete();
    }
}
