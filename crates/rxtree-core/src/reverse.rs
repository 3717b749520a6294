#![forbid(unsafe_code)]

//! Undoing a traced change.
//!
//! # Invariants
//!
//! 1. For `c = change(a, b)`, `reverse(&c).value == a` and
//!    `reverse(&reverse(&c)) == c`.
//! 2. Only the positions named by the trace are rewritten; every other
//!    subtree of the result shares storage with the forward value.
//!
//! # Failure Modes
//!
//! - **Untraced change**: the previous value is unknown, so the change is
//!   returned as is.
//! - **Node trace over an absent or scalar value**: the value cannot be
//!   rebuilt and is returned unchanged, with the inverted trace.

use crate::change::Change;
use crate::trace::Trace;
use crate::value::Value;

/// The change that undoes `change`.
#[must_use]
pub fn reverse(change: &Change) -> Change {
    match &change.trace {
        None => change.clone(),
        Some(trace) => Change::new(
            restore(change.value.as_ref(), trace),
            Some(trace.inverted()),
        ),
    }
}

fn restore(value: Option<&Value>, trace: &Trace) -> Option<Value> {
    match trace {
        Trace::Leaf { from, .. } => from.clone(),
        Trace::Node { subs } => {
            let current = match value {
                Some(current) if current.is_container() => current,
                _ => return value.cloned(),
            };
            let entries = subs
                .iter()
                .map(|(key, sub)| (key.clone(), restore(current.get(key), sub)));
            Some(Value::with_entries(Some(current), entries).unwrap_or_else(|_| current.clone()))
        }
    }
}
