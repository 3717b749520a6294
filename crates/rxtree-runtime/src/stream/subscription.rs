#![forbid(unsafe_code)]

//! RAII subscription guards.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

type Teardown = Box<dyn FnOnce()>;

/// Shared lifetime record between a [`Sink`](super::Sink) and the
/// [`Subscription`] handed to the subscriber.
///
/// `stopped` is set once the sink has delivered a terminal event or the
/// subscriber let go; `released` once the teardowns have run.
#[derive(Default)]
pub(crate) struct Link {
    stopped: Cell<bool>,
    released: Cell<bool>,
    teardowns: RefCell<Vec<Teardown>>,
}

impl Link {
    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.get()
    }

    /// Marks the link stopped. Returns `false` if it already was.
    pub(crate) fn stop(&self) -> bool {
        !self.stopped.replace(true)
    }

    /// Stops the link and runs its teardowns, newest first. Idempotent.
    pub(crate) fn release(&self) {
        self.stopped.set(true);
        if self.released.replace(true) {
            return;
        }
        let teardowns = std::mem::take(&mut *self.teardowns.borrow_mut());
        for teardown in teardowns.into_iter().rev() {
            teardown();
        }
    }

    /// Registers a teardown; runs it immediately if already released.
    pub(crate) fn add(&self, teardown: Teardown) {
        if self.released.get() {
            teardown();
        } else {
            self.teardowns.borrow_mut().push(teardown);
        }
    }
}

/// RAII guard for an active subscription.
///
/// Dropping the guard unsubscribes: no further events reach the observer
/// and the upstream resources it held are released.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    link: Rc<Link>,
}

impl Subscription {
    pub(crate) fn from_link(link: Rc<Link>) -> Self {
        Self { link }
    }

    /// A subscription that is already closed.
    pub fn empty() -> Self {
        let link = Link::default();
        link.release();
        Self {
            link: Rc::new(link),
        }
    }

    /// A subscription that runs `teardown` when released.
    pub fn from_fn(teardown: impl FnOnce() + 'static) -> Self {
        let link = Link::default();
        link.add(Box::new(teardown));
        Self {
            link: Rc::new(link),
        }
    }

    /// One guard for several subscriptions; releasing it releases them all.
    pub fn bundle(subscriptions: Vec<Subscription>) -> Self {
        Self::from_fn(move || drop(subscriptions))
    }

    /// Releases the subscription without waiting for the guard to drop.
    pub fn unsubscribe(&self) {
        self.link.release();
    }

    /// Whether the subscription no longer delivers events, either because
    /// the source terminated or because it was released.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.link.is_stopped()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.link.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .finish()
    }
}
