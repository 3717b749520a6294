#![forbid(unsafe_code)]

//! Hot multicast subjects.

use std::cell::RefCell;
use std::rc::Rc;

use super::{Observer, Sink, Stream, Subscription};
use crate::error::StateError;

#[derive(Clone)]
enum Terminal {
    Completed,
    Failed(StateError),
}

struct SubjectState<T> {
    members: Vec<(u64, Sink<T>)>,
    next_id: u64,
    terminal: Option<Terminal>,
}

/// A multicast point: every event sent to the subject reaches every
/// currently attached observer.
///
/// Cloning a `Subject` creates a new handle to the **same** observer list.
/// After `error` or `complete` the subject stays terminated; late
/// subscribers receive the terminal event and nothing else.
pub struct Subject<T> {
    inner: Rc<RefCell<SubjectState<T>>>,
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Subject<T> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(SubjectState {
                members: Vec::new(),
                next_id: 0,
                terminal: None,
            })),
        }
    }

    pub fn next(&self, value: &T) {
        let members: Vec<Sink<T>> = {
            let state = self.inner.borrow();
            if state.terminal.is_some() {
                return;
            }
            state.members.iter().map(|(_, sink)| sink.clone()).collect()
        };
        for sink in members {
            sink.next(value);
        }
    }

    pub fn error(&self, err: &StateError) {
        for (_, sink) in self.terminate(Terminal::Failed(err.clone())) {
            sink.error(err);
        }
    }

    pub fn complete(&self) {
        for (_, sink) in self.terminate(Terminal::Completed) {
            sink.complete();
        }
    }

    fn terminate(&self, terminal: Terminal) -> Vec<(u64, Sink<T>)> {
        let mut state = self.inner.borrow_mut();
        if state.terminal.is_some() {
            return Vec::new();
        }
        state.terminal = Some(terminal);
        std::mem::take(&mut state.members)
    }

    /// Whether `error` or `complete` has been called.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.inner.borrow().terminal.is_some()
    }

    /// Number of attached observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.inner.borrow().members.len()
    }

    /// The subject as a stream; each subscription attaches one observer.
    pub fn stream(&self) -> Stream<T> {
        let subject = self.clone();
        Stream::new(move |sink| subject.attach(sink))
    }

    pub(crate) fn attach(&self, sink: Sink<T>) -> Subscription {
        let terminal = self.inner.borrow().terminal.clone();
        match terminal {
            Some(Terminal::Completed) => {
                sink.complete();
                return Subscription::empty();
            }
            Some(Terminal::Failed(err)) => {
                sink.error(&err);
                return Subscription::empty();
            }
            None => {}
        }

        let id = {
            let mut state = self.inner.borrow_mut();
            let id = state.next_id;
            state.next_id += 1;
            state.members.push((id, sink));
            id
        };
        let weak = Rc::downgrade(&self.inner);
        Subscription::from_fn(move || {
            if let Some(inner) = weak.upgrade() {
                inner.borrow_mut().members.retain(|(member, _)| *member != id);
            }
        })
    }
}

impl<T: 'static> Observer<T> for Subject<T> {
    fn next(&self, value: &T) {
        Subject::next(self, value);
    }

    fn error(&self, err: &StateError) {
        Subject::error(self, err);
    }

    fn complete(&self) {
        Subject::complete(self);
    }
}
