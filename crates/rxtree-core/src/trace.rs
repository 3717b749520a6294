#![forbid(unsafe_code)]

//! Structural descriptions of how one value became another.
//!
//! # Design
//!
//! A [`Trace`] mirrors the part of the tree that changed. A
//! [`Trace::Leaf`] records the old and new values at one position; a
//! [`Trace::Node`] maps child keys to the traces of the children that
//! changed. Children that did not change do not appear.
//!
//! # Invariants
//!
//! 1. `diff(a, b)` is `None` exactly when `a` and `b` are equal.
//! 2. A `Node` trace is never empty.
//! 3. `apply(a, &diff(a, b)?) == b`.
//! 4. Containers of different kinds (list vs record) produce a leaf, never
//!    a node.
//! 5. Containers that share storage are equal without being walked.

use im::OrdMap;

use crate::error::TraceError;
use crate::key::{Key, Path};
use crate::value::Value;

/// How a value changed.
#[derive(Debug, Clone, PartialEq)]
pub enum Trace {
    /// Wholesale replacement at this position. Either side may be absent.
    Leaf {
        from: Option<Value>,
        to: Option<Value>,
    },
    /// Some children changed; non-empty.
    Node { subs: OrdMap<Key, Trace> },
}

/// One leaf of a trace, flattened to its path from the trace root.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafChange {
    pub path: Path,
    pub from: Option<Value>,
    pub to: Option<Value>,
}

impl Trace {
    /// A leaf trace.
    #[must_use]
    pub fn leaf(from: Option<Value>, to: Option<Value>) -> Self {
        Self::Leaf { from, to }
    }

    /// A node trace from `(key, sub-trace)` pairs.
    #[must_use]
    pub fn node<I: IntoIterator<Item = (Key, Trace)>>(subs: I) -> Self {
        Self::Node {
            subs: subs.into_iter().collect(),
        }
    }

    /// A node trace with a single changed child.
    #[must_use]
    pub fn wrap(key: Key, inner: Trace) -> Self {
        Self::Node {
            subs: OrdMap::unit(key, inner),
        }
    }

    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf { .. })
    }

    /// The sub-trace for `key`, when this is a node trace that has one.
    #[must_use]
    pub fn sub(&self, key: &Key) -> Option<&Trace> {
        match self {
            Self::Node { subs } => subs.get(key),
            Self::Leaf { .. } => None,
        }
    }

    /// The same change seen backwards: every leaf has its ends swapped.
    #[must_use]
    pub fn inverted(&self) -> Trace {
        match self {
            Self::Leaf { from, to } => Self::Leaf {
                from: to.clone(),
                to: from.clone(),
            },
            Self::Node { subs } => Self::Node {
                subs: subs
                    .iter()
                    .map(|(key, sub)| (key.clone(), sub.inverted()))
                    .collect(),
            },
        }
    }

    /// Every leaf of the trace with its path, in key order.
    #[must_use]
    pub fn paths(&self) -> Vec<LeafChange> {
        let mut out = Vec::new();
        let mut prefix = Vec::new();
        collect_leaves(self, &mut prefix, &mut out);
        out
    }

    /// Number of leaves.
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        match self {
            Self::Leaf { .. } => 1,
            Self::Node { subs } => subs.values().map(Trace::leaf_count).sum(),
        }
    }
}

fn collect_leaves(trace: &Trace, prefix: &mut Path, out: &mut Vec<LeafChange>) {
    match trace {
        Trace::Leaf { from, to } => out.push(LeafChange {
            path: prefix.clone(),
            from: from.clone(),
            to: to.clone(),
        }),
        Trace::Node { subs } => {
            for (key, sub) in subs.iter() {
                prefix.push(key.clone());
                collect_leaves(sub, prefix, out);
                prefix.pop();
            }
        }
    }
}

/// Computes the trace taking `src` to `dest`, or `None` when they are equal.
#[must_use]
pub fn diff(src: Option<&Value>, dest: Option<&Value>) -> Option<Trace> {
    match (src, dest) {
        (None, None) => None,
        (Some(a), Some(b)) => diff_present(a, b),
        _ => Some(Trace::leaf(src.cloned(), dest.cloned())),
    }
}

fn diff_present(a: &Value, b: &Value) -> Option<Trace> {
    match (a, b) {
        (Value::List(xs), Value::List(ys)) => {
            if xs.ptr_eq(ys) {
                return None;
            }
            let len = xs.len().max(ys.len());
            node_of((0..len).filter_map(|index| {
                diff(xs.get(index), ys.get(index)).map(|sub| (Key::Index(index), sub))
            }))
        }
        (Value::Record(xs), Value::Record(ys)) => {
            if xs.ptr_eq(ys) {
                return None;
            }
            let changed = xs
                .iter()
                .filter_map(|(name, x)| diff(Some(x), ys.get(name)).map(|sub| (name, sub)));
            let added = ys
                .iter()
                .filter(|(name, _)| !xs.contains_key(*name))
                .map(|(name, y)| (name, Trace::leaf(None, Some(y.clone()))));
            node_of(
                changed
                    .chain(added)
                    .map(|(name, sub)| (Key::Field(name.clone()), sub)),
            )
        }
        _ if a == b => None,
        _ => Some(Trace::leaf(Some(a.clone()), Some(b.clone()))),
    }
}

fn node_of<I: Iterator<Item = (Key, Trace)>>(subs: I) -> Option<Trace> {
    let subs: OrdMap<Key, Trace> = subs.collect();
    (!subs.is_empty()).then_some(Trace::Node { subs })
}

/// Lays `trace` onto `src`.
///
/// Leaves replace wholesale. Nodes rebuild the container around their
/// patched children with [`Value::with_entries`], so an absent `src`
/// materialises the container and a scalar `src` is an error.
pub fn apply(src: Option<&Value>, trace: &Trace) -> Result<Option<Value>, TraceError> {
    match trace {
        Trace::Leaf { to, .. } => Ok(to.clone()),
        Trace::Node { subs } => {
            let entries = subs
                .iter()
                .map(|(key, sub)| {
                    let child = src.and_then(|value| value.get(key));
                    apply(child, sub).map(|patched| (key.clone(), patched))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Value::with_entries(src, entries).map(Some)
        }
    }
}
