#![forbid(unsafe_code)]

//! The unit of information flowing through a state tree.

use crate::key::Key;
use crate::trace::{Trace, diff};
use crate::value::Value;

/// A new value, optionally with the trace describing how it was reached.
///
/// An untraced change is a wholesale replacement whose previous value is
/// unknown to the receiver.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Change {
    pub value: Option<Value>,
    pub trace: Option<Trace>,
}

impl Change {
    #[must_use]
    pub fn new(value: Option<Value>, trace: Option<Trace>) -> Self {
        Self { value, trace }
    }

    /// A replacement without a trace.
    #[must_use]
    pub fn untraced(value: Option<Value>) -> Self {
        Self { value, trace: None }
    }

    #[must_use]
    pub const fn is_traced(&self) -> bool {
        self.trace.is_some()
    }

    /// The change as seen by the child at `key`.
    ///
    /// - Node trace that mentions `key`: the child value with its sub-trace.
    /// - Node trace that does not mention `key`: `None`, the child did not
    ///   change.
    /// - Leaf trace or no trace: the child value, untraced. The receiver
    ///   decides by comparison whether it changed.
    #[must_use]
    pub fn narrow(&self, key: &Key) -> Option<Change> {
        let child = || self.value.as_ref().and_then(|value| value.get(key)).cloned();
        match &self.trace {
            Some(Trace::Node { subs }) => subs
                .get(key)
                .map(|sub| Change::new(child(), Some(sub.clone()))),
            Some(Trace::Leaf { .. }) | None => Some(Change::untraced(child())),
        }
    }

    /// Refines a leaf trace between two containers into the structural
    /// trace between them, so children can be told exactly what changed.
    #[must_use]
    pub fn post_trace(self) -> Change {
        let refined = match &self.trace {
            Some(Trace::Leaf {
                from: Some(from),
                to: Some(to),
            }) if from.is_container() && to.is_container() => diff(Some(from), Some(to)),
            _ => None,
        };
        match refined {
            Some(trace) => Change::new(self.value, Some(trace)),
            None => self,
        }
    }
}

/// The traced change taking `src` to `dest`, or `None` when they are equal.
#[must_use]
pub fn change(src: Option<&Value>, dest: Option<&Value>) -> Option<Change> {
    diff(src, dest).map(|trace| Change::new(dest.cloned(), Some(trace)))
}
