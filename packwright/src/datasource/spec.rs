//! Attribute schemas for datasource configuration and output.

use super::value::Resolved;
use crate::diagnostics::{Diagnostic, Diagnostics, SourceRange};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Type of a schema attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttrType {
    /// A string.
    #[serde(rename = "string")]
    String,
    /// A JSON number.
    #[serde(rename = "number")]
    Number,
    /// A boolean.
    #[serde(rename = "bool")]
    Bool,
    /// A list of strings.
    #[serde(rename = "list(string)")]
    StringList,
    /// A map of string to string.
    #[serde(rename = "map(string)")]
    StringMap,
}

impl AttrType {
    /// Returns the stand-in written for a value of this type that is not
    /// known yet.
    #[must_use]
    pub fn placeholder(self) -> Value {
        match self {
            Self::String => Value::String("<unknown>".to_string()),
            Self::Number => Value::from(0),
            Self::Bool => Value::Bool(false),
            Self::StringList => Value::Array(Vec::new()),
            Self::StringMap => Value::Object(Map::new()),
        }
    }

    /// Returns true if `value` has this type.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::StringList => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
            Self::StringMap => value
                .as_object()
                .is_some_and(|entries| entries.values().all(Value::is_string)),
        }
    }
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Bool => "bool",
            Self::StringList => "list(string)",
            Self::StringMap => "map(string)",
        };
        f.write_str(name)
    }
}

/// One attribute of an [`ObjectSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrSpec {
    /// Attribute type.
    pub ty: AttrType,
    /// Whether the attribute must be set.
    #[serde(default)]
    pub required: bool,
}

/// The attributes an object is expected to have.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ObjectSpec {
    attrs: BTreeMap<String, AttrSpec>,
}

impl ObjectSpec {
    /// Creates an empty spec.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an optional attribute.
    #[must_use]
    pub fn optional(mut self, name: impl Into<String>, ty: AttrType) -> Self {
        self.attrs.insert(name.into(), AttrSpec { ty, required: false });
        self
    }

    /// Adds a required attribute.
    #[must_use]
    pub fn required(mut self, name: impl Into<String>, ty: AttrType) -> Self {
        self.attrs.insert(name.into(), AttrSpec { ty, required: true });
        self
    }

    /// Looks up an attribute.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AttrSpec> {
        self.attrs.get(name)
    }

    /// Iterates over attributes in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrSpec)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns an object with every attribute set to its placeholder.
    #[must_use]
    pub fn placeholder_object(&self) -> Value {
        Value::Object(
            self.attrs
                .iter()
                .map(|(name, attr)| (name.clone(), attr.ty.placeholder()))
                .collect(),
        )
    }

    /// Checks `body` against this schema and produces the configuration object.
    ///
    /// Unknown values are replaced with their type's placeholder so that the
    /// result is always plain JSON. Every problem is reported as a diagnostic
    /// naming the attribute; the returned object is only meaningful when no
    /// error was reported.
    #[must_use]
    pub fn decode(
        &self,
        body: BTreeMap<String, Resolved>,
        subject: Option<&SourceRange>,
    ) -> (Value, Diagnostics) {
        let mut diags = Diagnostics::new();
        let mut out = Map::new();

        for (name, attr) in &self.attrs {
            if attr.required && !body.contains_key(name) {
                diags.push(
                    Diagnostic::error("Missing required argument")
                        .with_detail(format!("The argument \"{name}\" is required, but no definition was found."))
                        .with_subject(subject.cloned()),
                );
            }
        }

        for (name, value) in body {
            let Some(attr) = self.attrs.get(&name) else {
                diags.push(
                    Diagnostic::error("Unsupported argument")
                        .with_detail(format!("An argument named \"{name}\" is not expected here."))
                        .with_subject(subject.cloned()),
                );
                continue;
            };

            let mismatch = |found: &dyn fmt::Display| {
                Diagnostic::error("Incorrect attribute value type")
                    .with_detail(format!(
                        "Inappropriate value for attribute \"{name}\": {} required, found {found}.",
                        attr.ty
                    ))
                    .with_subject(subject.cloned())
            };

            let wrong_type = match value {
                Resolved::Known(ref v) if !attr.ty.accepts(v) => Some(mismatch(&json_kind(v))),
                Resolved::Unknown(ty) if ty != attr.ty => Some(mismatch(&ty)),
                _ => None,
            };
            if let Some(diag) = wrong_type {
                diags.push(diag);
                continue;
            }

            match value.into_placeholder() {
                Ok(v) => {
                    out.insert(name, v);
                }
                Err(message) => diags.push(
                    Diagnostic::error(format!("Invalid value for \"{name}\""))
                        .with_detail(message)
                        .with_subject(subject.cloned()),
                ),
            }
        }

        (Value::Object(out), diags)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
