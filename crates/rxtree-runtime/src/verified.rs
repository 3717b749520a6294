#![forbid(unsafe_code)]

//! Validating wrapper that bounces rejected writes.
//!
//! # Design
//!
//! [`VerifiedState`] sits between a wrapped node and everything derived from
//! the wrapper. Changes travelling up through the wrapper are checked by a
//! predicate: accepted ones continue to the wrapped node's upstream, rejected
//! ones are sent to a bounce subject instead. The wrapper's downstream is the
//! wrapped node's downstream merged with a rollback of every bounced change,
//! so the writer sees its own edit undone. A traced change rolls back through
//! its reverse; an untraced one carries no old value, so its rollback is a
//! leaf trace from the attempted value back to the wrapped node's current
//! value.
//!
//! # Invariants
//!
//! 1. A rejected change never reaches the wrapped node.
//! 2. Each rejection appears once on [`VerifiedState::bounce`], as attempted.
//! 3. Changes coming down from the wrapped node are not verified.
//! 4. Completing the wrapped node completes the wrapper and its bounce
//!    streams; completing the wrapper leaves the wrapped node open.

use std::cell::RefCell;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use rxtree_core::{Change, Trace, Value, reverse};

use crate::error::StateError;
use crate::state::{Refresh, State};
use crate::stream::{Observer, Stream, Subject};

/// A [`State`] that only lets through changes accepted by a predicate.
///
/// Dereferences to the wrapper node, so `sub`, `subscribe`, `set` and the
/// rest of the [`State`] API apply to the verified view.
pub struct VerifiedState {
    state: State,
    wrapped: State,
    bounces: Subject<Change>,
}

impl fmt::Debug for VerifiedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifiedState")
            .field("state", &self.state)
            .field("wrapped", &self.wrapped)
            .finish()
    }
}

impl VerifiedState {
    pub fn new(wrapped: &State, verify: impl Fn(&Change) -> bool + 'static) -> Self {
        let bounces = Subject::new();
        let current = wrapped.clone();
        let rollbacks = bounces
            .stream()
            .map(move |change: &Change| rollback(change, current.value()));
        let source = wrapped
            .downstream()
            .merge(&rollbacks)
            .take_until(&wrapped.downstream().ignore_elements());

        let gate = Gate {
            upstream: wrapped.upstream(),
            verify: Box::new(verify),
            bounces: bounces.clone(),
        };
        let reader = wrapped.clone();
        let refresh: Refresh = Rc::new(move || reader.value());
        let state = State::assemble(
            Rc::new(RefCell::new(wrapped.value())),
            source,
            Rc::new(gate),
            Some(refresh),
        );

        Self {
            state,
            wrapped: wrapped.clone(),
            bounces,
        }
    }

    /// Rejected changes, as they were attempted.
    pub fn bounce(&self) -> Stream<Change> {
        self.bounces
            .stream()
            .take_until(&self.wrapped.downstream().ignore_elements())
    }

    /// The node being verified.
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

impl Deref for VerifiedState {
    type Target = State;

    fn deref(&self) -> &State {
        &self.state
    }
}

/// The change that undoes a rejected `change`, given the wrapped value.
fn rollback(change: &Change, current: Option<Value>) -> Change {
    if change.is_traced() {
        reverse(change)
    } else {
        let trace = Trace::leaf(change.value.clone(), current.clone());
        Change::new(current, Some(trace))
    }
}

struct Gate {
    upstream: Rc<dyn Observer<Change>>,
    verify: Box<dyn Fn(&Change) -> bool>,
    bounces: Subject<Change>,
}

impl Observer<Change> for Gate {
    fn next(&self, change: &Change) {
        if (self.verify)(change) {
            self.upstream.next(change);
        } else {
            tracing::debug!(message = "verified.bounce", traced = change.is_traced());
            self.bounces.next(change);
        }
    }

    fn error(&self, err: &StateError) {
        self.upstream.error(err);
    }

    fn complete(&self) {
        self.bounces.complete();
    }
}
