#![forbid(unsafe_code)]

//! Ref-counted sharing of a cold stream.
//!
//! # Invariants
//!
//! 1. The source is subscribed at most once at a time, while at least one
//!    subscriber is attached.
//! 2. A subscriber is attached before the source is connected, so events
//!    emitted synchronously during connection reach it.
//! 3. When the last subscriber leaves the connection is released; the next
//!    subscriber reconnects afresh.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::{Sink, Stream, Subject, Subscription};

struct ShareState<T> {
    subject: Option<Subject<T>>,
    connection: Option<Subscription>,
    refs: usize,
}

/// A stream shared between subscribers through a single connection.
pub struct Shared<T> {
    source: Stream<T>,
    inner: Rc<RefCell<ShareState<T>>>,
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Shared<T> {
    pub(crate) fn new(source: Stream<T>) -> Self {
        Self {
            source,
            inner: Rc::new(RefCell::new(ShareState {
                subject: None,
                connection: None,
                refs: 0,
            })),
        }
    }

    /// Number of attached subscribers.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.inner.borrow().refs
    }

    /// Whether the source is currently connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.ref_count() > 0
    }

    /// The shared stream. Subscribing attaches to the single connection.
    pub fn stream(&self) -> Stream<T> {
        let source = self.source.clone();
        let inner = Rc::clone(&self.inner);
        Stream::new(move |sink: Sink<T>| {
            let (subject, first) = {
                let mut state = inner.borrow_mut();
                let subject = state.subject.get_or_insert_with(Subject::new).clone();
                state.refs += 1;
                (subject, state.refs == 1)
            };
            let member = subject.attach(sink);
            if first {
                let connection = source.subscribe_with(subject);
                let stale = {
                    let mut state = inner.borrow_mut();
                    if state.refs == 0 {
                        Some(connection)
                    } else {
                        state.connection = Some(connection);
                        None
                    }
                };
                drop(stale);
            }
            let weak = Rc::downgrade(&inner);
            Subscription::from_fn(move || {
                drop(member);
                leave(&weak);
            })
        })
    }
}

fn leave<T>(inner: &Weak<RefCell<ShareState<T>>>) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let connection = {
        let mut state = inner.borrow_mut();
        state.refs = state.refs.saturating_sub(1);
        if state.refs == 0 {
            state.subject = None;
            state.connection.take()
        } else {
            None
        }
    };
    drop(connection);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn counting_source(connects: &Rc<Cell<u32>>, subject: &Subject<i32>) -> Stream<i32> {
        let connects = Rc::clone(connects);
        let subject = subject.clone();
        Stream::new(move |sink| {
            connects.set(connects.get() + 1);
            subject.stream().subscribe_with(sink)
        })
    }

    #[test]
    fn single_connection_for_many_subscribers() {
        let connects = Rc::new(Cell::new(0));
        let subject = Subject::new();
        let shared = counting_source(&connects, &subject).share();
        let seen = Rc::new(Cell::new(0));
        let (a, b) = (Rc::clone(&seen), Rc::clone(&seen));
        let s1 = shared.stream().subscribe(move |_| a.set(a.get() + 1));
        let s2 = shared.stream().subscribe(move |_| b.set(b.get() + 1));
        subject.next(&1);
        assert_eq!(connects.get(), 1);
        assert_eq!(seen.get(), 2);
        assert_eq!(shared.ref_count(), 2);
        drop((s1, s2));
        assert!(!shared.is_connected());
        assert_eq!(subject.observer_count(), 0);
    }

    #[test]
    fn reconnects_after_last_subscriber_leaves() {
        let connects = Rc::new(Cell::new(0));
        let subject = Subject::new();
        let shared = counting_source(&connects, &subject).share();
        drop(shared.stream().subscribe(|_| {}));
        let _again = shared.stream().subscribe(|_| {});
        assert_eq!(connects.get(), 2);
    }

    #[test]
    fn synchronous_emission_reaches_first_subscriber() {
        let shared = Stream::of(5).share();
        let got = Rc::new(Cell::new(0));
        let g = Rc::clone(&got);
        let sub = shared.stream().subscribe(move |n| g.set(*n));
        assert_eq!(got.get(), 5);
        assert!(sub.is_closed());
        assert_eq!(shared.ref_count(), 0);
    }
}
