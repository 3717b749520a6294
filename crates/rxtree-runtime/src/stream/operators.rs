#![forbid(unsafe_code)]

//! Stream combinators used to wire state nodes together.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::{Callbacks, Observer, Shared, Sink, Stream, Subscription};
use crate::error::StateError;

/// Forwards terminal events unchanged and routes values through `on_next`.
struct Relay<T, U> {
    sink: Sink<U>,
    on_next: Rc<dyn Fn(&Sink<U>, &T)>,
}

impl<T, U> Observer<T> for Relay<T, U> {
    fn next(&self, value: &T) {
        (self.on_next)(&self.sink, value);
    }

    fn error(&self, err: &StateError) {
        self.sink.error(err);
    }

    fn complete(&self) {
        self.sink.complete();
    }
}

impl<T: 'static> Stream<T> {
    fn relay<U: 'static>(&self, on_next: impl Fn(&Sink<U>, &T) + 'static) -> Stream<U> {
        let source = self.clone();
        let on_next: Rc<dyn Fn(&Sink<U>, &T)> = Rc::new(on_next);
        Stream::new(move |sink| {
            source.subscribe_with(Relay {
                sink,
                on_next: Rc::clone(&on_next),
            })
        })
    }

    pub fn map<U: 'static>(&self, f: impl Fn(&T) -> U + 'static) -> Stream<U> {
        self.relay(move |sink, value| sink.next(&f(value)))
    }

    pub fn filter(&self, keep: impl Fn(&T) -> bool + 'static) -> Stream<T> {
        self.relay(move |sink, value| {
            if keep(value) {
                sink.next(value);
            }
        })
    }

    pub fn filter_map<U: 'static>(&self, f: impl Fn(&T) -> Option<U> + 'static) -> Stream<U> {
        self.relay(move |sink, value| {
            if let Some(mapped) = f(value) {
                sink.next(&mapped);
            }
        })
    }

    /// Runs `f` on each value before passing it on.
    pub fn tap(&self, f: impl Fn(&T) + 'static) -> Stream<T> {
        self.relay(move |sink, value| {
            f(value);
            sink.next(value);
        })
    }

    /// Drops every value; only `error` and `complete` get through.
    pub fn ignore_elements(&self) -> Stream<T> {
        self.relay(|_, _| {})
    }

    /// Mirrors this stream until `notifier` emits or completes, then
    /// completes. An error from `notifier` is forwarded.
    pub fn take_until<N: 'static>(&self, notifier: &Stream<N>) -> Stream<T> {
        let source = self.clone();
        let notifier = notifier.clone();
        Stream::new(move |sink: Sink<T>| {
            let (on_value, on_error, on_done) = (sink.clone(), sink.clone(), sink.clone());
            let guard = notifier.subscribe_with(
                Callbacks::new(move |_: &N| on_value.complete())
                    .on_error(move |err| on_error.error(err))
                    .on_complete(move || on_done.complete()),
            );
            if sink.is_closed() {
                return guard;
            }
            let main = source.subscribe_with(sink);
            Subscription::bundle(vec![guard, main])
        })
    }

    /// Interleaves both streams. Completes once both have completed; the
    /// first error from either side terminates the result.
    pub fn merge(&self, other: &Stream<T>) -> Stream<T> {
        let sources = [self.clone(), other.clone()];
        Stream::new(move |sink: Sink<T>| {
            let pending = Rc::new(Cell::new(sources.len()));
            let members = sources
                .iter()
                .map(|source| {
                    let (on_value, on_error, on_done) = (sink.clone(), sink.clone(), sink.clone());
                    let pending = Rc::clone(&pending);
                    source.subscribe_with(
                        Callbacks::new(move |value: &T| on_value.next(value))
                            .on_error(move |err| on_error.error(err))
                            .on_complete(move || {
                                pending.set(pending.get().saturating_sub(1));
                                if pending.get() == 0 {
                                    on_done.complete();
                                }
                            }),
                    )
                })
                .collect();
            Subscription::bundle(members)
        })
    }

    /// Emits `current()` to each subscriber right after it is connected,
    /// then mirrors this stream.
    pub fn with_replay(&self, current: impl Fn() -> T + 'static) -> Stream<T> {
        let source = self.clone();
        Stream::new(move |sink: Sink<T>| {
            let connection = source.subscribe_with(sink.clone());
            if !sink.is_closed() {
                sink.next(&current());
            }
            connection
        })
    }

    /// Suppresses values equal to the previous one seen by the same
    /// subscriber.
    pub fn distinct_until_changed(&self) -> Stream<T>
    where
        T: Clone + PartialEq,
    {
        let source = self.clone();
        Stream::new(move |sink: Sink<T>| {
            let last: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
            let forward = sink.clone();
            let (on_error, on_done) = (sink.clone(), sink);
            source.subscribe_with(
                Callbacks::new(move |value: &T| {
                    let repeated = last.borrow().as_ref() == Some(value);
                    if !repeated {
                        *last.borrow_mut() = Some(value.clone());
                        forward.next(value);
                    }
                })
                .on_error(move |err| on_error.error(err))
                .on_complete(move || on_done.complete()),
            )
        })
    }

    /// Shares one connection to this stream between all subscribers.
    pub fn share(&self) -> Shared<T> {
        Shared::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Subject;

    fn collect<T: Clone + 'static>(stream: &Stream<T>) -> (Rc<RefCell<Vec<T>>>, Subscription) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let sub = stream.subscribe(move |v: &T| s.borrow_mut().push(v.clone()));
        (seen, sub)
    }

    #[test]
    fn map_filter_chain() {
        let subject = Subject::new();
        let (seen, _sub) = collect(&subject.stream().filter(|n: &i32| n % 2 == 0).map(|n| n * 10));
        for n in 1..=4 {
            subject.next(&n);
        }
        assert_eq!(*seen.borrow(), vec![20, 40]);
    }

    #[test]
    fn take_until_stops_on_notifier() {
        let subject = Subject::new();
        let stop: Subject<()> = Subject::new();
        let done = Rc::new(Cell::new(false));
        let d = Rc::clone(&done);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let _sub = subject.stream().take_until(&stop.stream()).subscribe_with(
            Callbacks::new(move |n: &i32| s.borrow_mut().push(*n)).on_complete(move || d.set(true)),
        );
        subject.next(&1);
        stop.complete();
        subject.next(&2);
        assert_eq!(*seen.borrow(), vec![1]);
        assert!(done.get());
        assert_eq!(subject.observer_count(), 0);
    }

    #[test]
    fn take_until_forwards_notifier_error() {
        let stop: Subject<()> = Subject::new();
        let failed = Rc::new(Cell::new(false));
        let f = Rc::clone(&failed);
        let _sub = Subject::<i32>::new()
            .stream()
            .take_until(&stop.stream())
            .subscribe_with(Callbacks::new(|_| {}).on_error(move |_| f.set(true)));
        stop.error(&StateError::custom("gone"));
        assert!(failed.get());
    }

    #[test]
    fn merge_completes_after_both() {
        let (a, b) = (Subject::new(), Subject::new());
        let done = Rc::new(Cell::new(false));
        let d = Rc::clone(&done);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let _sub = a.stream().merge(&b.stream()).subscribe_with(
            Callbacks::new(move |n: &i32| s.borrow_mut().push(*n)).on_complete(move || d.set(true)),
        );
        a.next(&1);
        b.next(&2);
        a.complete();
        assert!(!done.get());
        b.next(&3);
        b.complete();
        assert!(done.get());
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn replay_then_distinct() {
        let subject = Subject::new();
        let stream = subject.stream().with_replay(|| 1).distinct_until_changed();
        let (seen, _sub) = collect(&stream);
        subject.next(&1);
        subject.next(&2);
        subject.next(&2);
        subject.next(&1);
        assert_eq!(*seen.borrow(), vec![1, 2, 1]);
    }

    #[test]
    fn tap_runs_before_downstream() {
        let subject = Subject::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let (a, b) = (Rc::clone(&log), Rc::clone(&log));
        let _sub = subject
            .stream()
            .tap(move |_: &()| a.borrow_mut().push("tap"))
            .subscribe(move |_| b.borrow_mut().push("next"));
        subject.next(&());
        assert_eq!(*log.borrow(), vec!["tap", "next"]);
    }
}
