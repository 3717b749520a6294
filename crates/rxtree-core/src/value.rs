#![forbid(unsafe_code)]

//! Immutable tree values.
//!
//! # Design
//!
//! [`Value`] is a JSON-like tree whose containers are persistent collections
//! from [`im`]: cloning a value is O(1) and an updated copy shares every
//! untouched subtree with its predecessor. Two containers that share storage
//! are known equal without walking them, which is what keeps
//! [`diff`](crate::trace::diff) cheap for copy-on-write updates.
//!
//! "Undefined" is not a variant. Absence is `Option<Value>::None` everywhere
//! in the crate, and `Value::Null` is an ordinary scalar that is present.
//!
//! # Invariants
//!
//! 1. Values are acyclic; the ownership model makes cycles unrepresentable.
//! 2. Dates compare by instant, never by identity.
//! 3. [`Value::with_entries`] never mutates its input; the result shares
//!    structure with it.
//! 4. A list rebuilt by [`Value::with_entries`] never ends in a removed slot:
//!    trailing removals shorten the list, interior removals become `Null`.
//!
//! # Failure Modes
//!
//! - **Scalar addressed as a container**: [`Value::with_entries`] returns
//!   [`TraceError::NotAContainer`] and leaves the input untouched.
//! - **Non-numeric field on a list**: [`TraceError::InvalidIndex`].
//! - **Index more than [`MAX_LIST_GAP`] past the end**:
//!   [`TraceError::InvalidIndex`]; padding is never unbounded.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use im::{OrdMap, Vector};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TraceError;

/// Most `Null` slots a single write may pad a list with.
pub const MAX_LIST_GAP: usize = 4096;
use crate::key::Key;

/// A node of a state tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(DateTime<Utc>),
    List(Vector<Value>),
    Record(OrdMap<String, Value>),
}

impl Value {
    /// Builds a list from anything convertible into values.
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// Builds a record from `(name, value)` pairs.
    pub fn record<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Record(
            fields
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }

    /// Whether this value has addressable children.
    #[must_use]
    pub const fn is_container(&self) -> bool {
        matches!(self, Self::List(_) | Self::Record(_))
    }

    /// Short name of the variant, used in error messages and logs.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Date(_) => "date",
            Self::List(_) => "list",
            Self::Record(_) => "record",
        }
    }

    /// The child at `key`, if this value is a container that has one.
    #[must_use]
    pub fn get(&self, key: &Key) -> Option<&Value> {
        match self {
            Self::List(items) => key.as_index().and_then(|index| items.get(index)),
            Self::Record(fields) => fields.get(&*key.field_name()),
            _ => None,
        }
    }

    /// The descendant at `path`. An empty path yields `self`.
    #[must_use]
    pub fn get_path(&self, path: &[Key]) -> Option<&Value> {
        path.iter().try_fold(self, |node, key| node.get(key))
    }

    /// Keys of the direct children, in order.
    #[must_use]
    pub fn keys(&self) -> Vec<Key> {
        match self {
            Self::List(items) => (0..items.len()).map(Key::Index).collect(),
            Self::Record(fields) => fields.keys().cloned().map(Key::Field).collect(),
            _ => Vec::new(),
        }
    }

    /// Number of direct children; zero for scalars.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::List(items) => items.len(),
            Self::Record(fields) => fields.len(),
            _ => 0,
        }
    }

    /// Whether this value has no children.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cheap equality: shared container storage short-circuits to `true`.
    #[must_use]
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::List(a), Self::List(b)) if a.ptr_eq(b) => true,
            (Self::Record(a), Self::Record(b)) if a.ptr_eq(b) => true,
            _ => self == other,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(flag) => Some(*flag),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric view; integers widen to `f64`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(x) => Some(*x),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(text) => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_date(&self) -> Option<&DateTime<Utc>> {
        match self {
            Self::Date(date) => Some(date),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_list(&self) -> Option<&Vector<Value>> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_record(&self) -> Option<&OrdMap<String, Value>> {
        match self {
            Self::Record(fields) => Some(fields),
            _ => None,
        }
    }

    /// Copy of `base` with a single child replaced or removed.
    ///
    /// See [`with_entries`](Self::with_entries) for the rules.
    pub fn with_entry(
        base: Option<&Value>,
        key: &Key,
        entry: Option<Value>,
    ) -> Result<Value, TraceError> {
        Self::with_entries(base, [(key.clone(), entry)])
    }

    /// Copy of `base` with the given children replaced (`Some`) or removed
    /// (`None`).
    ///
    /// - An absent base becomes an empty list when the first key is an
    ///   index, otherwise an empty record.
    /// - Records insert or drop the named field.
    /// - Lists pad with `Null` up to an index past the end, at most
    ///   [`MAX_LIST_GAP`] slots. Removed slots at the tail shorten the list;
    ///   removed slots elsewhere become `Null`. Removing past the end is a
    ///   no-op.
    pub fn with_entries<I>(base: Option<&Value>, entries: I) -> Result<Value, TraceError>
    where
        I: IntoIterator<Item = (Key, Option<Value>)>,
    {
        let mut entries = entries.into_iter().peekable();
        let base = match base {
            Some(value) => value.clone(),
            None => match entries.peek() {
                Some((Key::Index(_), _)) => Self::List(Vector::new()),
                _ => Self::Record(OrdMap::new()),
            },
        };

        match base {
            Self::List(mut items) => {
                let mut holes = BTreeSet::new();
                for (key, entry) in entries {
                    let index = key
                        .as_index()
                        .ok_or_else(|| TraceError::InvalidIndex { key: key.clone() })?;
                    match entry {
                        Some(child) => {
                            if index.saturating_sub(items.len()) > MAX_LIST_GAP {
                                return Err(TraceError::InvalidIndex { key });
                            }
                            holes.remove(&index);
                            while items.len() < index {
                                items.push_back(Self::Null);
                            }
                            if index == items.len() {
                                items.push_back(child);
                            } else {
                                items.set(index, child);
                            }
                        }
                        None if index < items.len() => {
                            holes.insert(index);
                            items.set(index, Self::Null);
                        }
                        None => {}
                    }
                }
                while !items.is_empty() && holes.contains(&(items.len() - 1)) {
                    items.pop_back();
                }
                Ok(Self::List(items))
            }
            Self::Record(mut fields) => {
                for (key, entry) in entries {
                    let name = key.into_field_name();
                    match entry {
                        Some(child) => {
                            fields.insert(name, child);
                        }
                        None => {
                            fields.remove(&name);
                        }
                    }
                }
                Ok(Self::Record(fields))
            }
            scalar => match entries.next() {
                Some((key, _)) => Err(TraceError::NotAContainer {
                    key,
                    found: scalar.kind_name(),
                }),
                None => Ok(scalar),
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(text) => f.write_str(&text),
            Err(_) => write!(f, "<{}>", self.kind_name()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(flag) => serializer.serialize_bool(*flag),
            Self::Int(n) => serializer.serialize_i64(*n),
            Self::Float(x) => serializer.serialize_f64(*x),
            Self::Str(text) => serializer.serialize_str(text),
            Self::Date(date) => serializer.serialize_str(&date.to_rfc3339()),
            Self::List(items) => serializer.collect_seq(items.iter()),
            Self::Record(fields) => serializer.collect_map(fields.iter()),
        }
    }
}

/// Deserializes through the JSON data model; dates come back as strings.
impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Self::from)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(flag) => Self::Bool(flag),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(int) => Self::Int(int),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(text) => Self::Str(text),
            serde_json::Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            serde_json::Value::Object(fields) => Self::Record(
                fields
                    .into_iter()
                    .map(|(name, value)| (name, Self::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for Value {
    fn from(flag: bool) -> Self {
        Self::Bool(flag)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Self::Str(text.to_owned())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Self::Str(text)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(date: DateTime<Utc>) -> Self {
        Self::Date(date)
    }
}

impl<V: Into<Value>> From<Vec<V>> for Value {
    fn from(items: Vec<V>) -> Self {
        Self::list(items)
    }
}

impl From<Vector<Value>> for Value {
    fn from(items: Vector<Value>) -> Self {
        Self::List(items)
    }
}

impl From<OrdMap<String, Value>> for Value {
    fn from(fields: OrdMap<String, Value>) -> Self {
        Self::Record(fields)
    }
}

impl<V: Into<Value>> FromIterator<V> for Value {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        Self::list(iter)
    }
}
