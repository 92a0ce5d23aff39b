//! Resolved datasource values.

use super::declaration::DatasourceRef;
use super::spec::AttrType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// An attribute value during resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// A concrete value.
    Known(Value),
    /// A value of the given type that is not known yet.
    Unknown(AttrType),
    /// The value could not be computed.
    Error(String),
}

impl Resolved {
    /// Returns true for [`Resolved::Known`].
    #[must_use]
    pub const fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }

    /// Returns the concrete value, substituting the type's placeholder for
    /// an unknown.
    ///
    /// # Errors
    ///
    /// Returns the message of a [`Resolved::Error`].
    pub fn into_placeholder(self) -> Result<Value, String> {
        match self {
            Self::Known(v) => Ok(v),
            Self::Unknown(ty) => Ok(ty.placeholder()),
            Self::Error(message) => Err(message),
        }
    }
}

/// Computed values, keyed by type then name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasourceValues {
    by_type: BTreeMap<String, BTreeMap<String, Value>>,
}

impl DatasourceValues {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the value of `data.<kind>.<name>`.
    pub fn insert(&mut self, kind: impl Into<String>, name: impl Into<String>, value: Value) {
        self.by_type
            .entry(kind.into())
            .or_default()
            .insert(name.into(), value);
    }

    /// Returns the value of a declaration.
    #[must_use]
    pub fn get(&self, r: &DatasourceRef) -> Option<&Value> {
        self.by_type.get(&r.kind).and_then(|names| names.get(&r.name))
    }

    /// Returns all values of one type.
    #[must_use]
    pub fn of_type(&self, kind: &str) -> Option<&BTreeMap<String, Value>> {
        self.by_type.get(kind)
    }

    /// Looks up `<type>.<name>[.<attr>...]`. List elements are addressed by
    /// index.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let kind = parts.next()?;
        let name = parts.next()?;
        let root = self.by_type.get(kind)?.get(name)?;
        parts.try_fold(root, |value, part| match value {
            Value::Object(map) => map.get(part),
            Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }

    /// Returns the nested `{type: {name: value}}` object.
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::to_value(&self.by_type).unwrap_or_default()
    }

    /// Returns the number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_type.values().map(BTreeMap::len).sum()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
