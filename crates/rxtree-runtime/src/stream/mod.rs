#![forbid(unsafe_code)]

//! Single-threaded push streams.
//!
//! This module provides the plumbing state nodes are built from:
//!
//! - [`Observer`]: receives `next`, `error` and `complete` events.
//! - [`Stream`]: a cold, cloneable producer. Every subscription runs the
//!   producer afresh.
//! - [`Subject`]: a hot multicast point that observers attach to.
//! - [`Shared`]: a ref-counted connection that turns a cold stream hot for as
//!   long as it has subscribers.
//! - [`Subscription`]: RAII guard that unsubscribes on drop.
//!
//! # Architecture
//!
//! Everything is `Rc`-based and runs synchronously on the calling thread.
//! A subscriber sees events from inside the call that produced them, so
//! writes made from a callback re-enter the tree; re-entrancy is resolved
//! by the state root, not here.
//!
//! # Invariants
//!
//! 1. An observer receives no event after `error` or `complete`, and at most
//!    one of the two.
//! 2. Observers attached to a [`Subject`] are notified in attach order.
//! 3. Releasing a [`Subscription`] stops delivery before the next event.
//! 4. No `RefCell` borrow is held while user callbacks run.

mod operators;
mod shared;
mod subject;
mod subscription;

use std::rc::Rc;

pub use shared::Shared;
pub use subject::Subject;
pub use subscription::Subscription;

use subscription::Link;

use crate::error::StateError;

/// Receiver of stream events.
pub trait Observer<T> {
    fn next(&self, value: &T);

    fn error(&self, err: &StateError) {
        let _ = err;
    }

    fn complete(&self) {}
}

impl<T, O: Observer<T> + ?Sized> Observer<T> for Rc<O> {
    fn next(&self, value: &T) {
        (**self).next(value);
    }

    fn error(&self, err: &StateError) {
        (**self).error(err);
    }

    fn complete(&self) {
        (**self).complete();
    }
}

/// An [`Observer`] assembled from closures.
///
/// ```
/// use rxtree_runtime::stream::{Callbacks, Stream};
///
/// let _sub = Stream::of(1).subscribe_with(
///     Callbacks::new(|n: &i32| println!("{n}")).on_complete(|| println!("done")),
/// );
/// ```
pub struct Callbacks<T> {
    on_next: Box<dyn Fn(&T)>,
    on_error: Box<dyn Fn(&StateError)>,
    on_complete: Box<dyn Fn()>,
}

impl<T: 'static> Callbacks<T> {
    pub fn new(on_next: impl Fn(&T) + 'static) -> Self {
        Self {
            on_next: Box::new(on_next),
            on_error: Box::new(|_| {}),
            on_complete: Box::new(|| {}),
        }
    }

    /// An observer that discards everything.
    pub fn ignore() -> Self {
        Self::new(|_| {})
    }

    #[must_use]
    pub fn on_error(mut self, on_error: impl Fn(&StateError) + 'static) -> Self {
        self.on_error = Box::new(on_error);
        self
    }

    #[must_use]
    pub fn on_complete(mut self, on_complete: impl Fn() + 'static) -> Self {
        self.on_complete = Box::new(on_complete);
        self
    }
}

impl<T> Observer<T> for Callbacks<T> {
    fn next(&self, value: &T) {
        (self.on_next)(value);
    }

    fn error(&self, err: &StateError) {
        (self.on_error)(err);
    }

    fn complete(&self) {
        (self.on_complete)();
    }
}

/// The producer-side handle of one subscription.
///
/// Forwards events to the subscriber until a terminal event or until the
/// subscriber lets go; after that every call is a no-op.
pub struct Sink<T> {
    observer: Rc<dyn Observer<T>>,
    link: Rc<Link>,
}

impl<T> Clone for Sink<T> {
    fn clone(&self) -> Self {
        Self {
            observer: Rc::clone(&self.observer),
            link: Rc::clone(&self.link),
        }
    }
}

impl<T> Sink<T> {
    pub fn next(&self, value: &T) {
        if !self.link.is_stopped() {
            self.observer.next(value);
        }
    }

    pub fn error(&self, err: &StateError) {
        if self.link.stop() {
            self.observer.error(err);
            self.link.release();
        }
    }

    pub fn complete(&self) {
        if self.link.stop() {
            self.observer.complete();
            self.link.release();
        }
    }

    /// Whether events sent now would be dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.link.is_stopped()
    }
}

impl<T> Observer<T> for Sink<T> {
    fn next(&self, value: &T) {
        Sink::next(self, value);
    }

    fn error(&self, err: &StateError) {
        Sink::error(self, err);
    }

    fn complete(&self) {
        Sink::complete(self);
    }
}

type Producer<T> = dyn Fn(Sink<T>) -> Subscription;

/// A cold stream: each subscription runs the producer.
pub struct Stream<T> {
    produce: Rc<Producer<T>>,
}

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Self {
            produce: Rc::clone(&self.produce),
        }
    }
}

impl<T: 'static> Stream<T> {
    /// A stream whose subscriptions run `produce`.
    ///
    /// The producer emits into the [`Sink`] and returns the subscription
    /// that releases whatever it set up.
    pub fn new(produce: impl Fn(Sink<T>) -> Subscription + 'static) -> Self {
        Self {
            produce: Rc::new(produce),
        }
    }

    /// Emits `value` and completes.
    pub fn of(value: T) -> Self
    where
        T: Clone,
    {
        Self::new(move |sink| {
            sink.next(&value);
            sink.complete();
            Subscription::empty()
        })
    }

    /// Completes immediately.
    pub fn empty() -> Self {
        Self::new(|sink| {
            sink.complete();
            Subscription::empty()
        })
    }

    pub fn subscribe(&self, on_next: impl Fn(&T) + 'static) -> Subscription {
        self.subscribe_with(Callbacks::new(on_next))
    }

    pub fn subscribe_with(&self, observer: impl Observer<T> + 'static) -> Subscription {
        let link = Rc::new(Link::default());
        let sink = Sink {
            observer: Rc::new(observer),
            link: Rc::clone(&link),
        };
        let upstream = (self.produce)(sink);
        link.add(Box::new(move || drop(upstream)));
        Subscription::from_link(link)
    }
}
