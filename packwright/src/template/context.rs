//! Build metadata available to templates.

use crate::datasource::DatasourceValues;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Run metadata that templates are rendered against.
///
/// Field lookup ignores case and `_`/`-` separators, so `SourceAMI`,
/// `source_ami` and `source` all name the source identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildContext {
    /// Identifier of the image the build started from.
    pub source: String,
    /// Provider region or location of the build.
    pub region: String,
    /// Name of the build.
    pub build_name: String,
    /// Builder type (e.g. `amazon-ebs`).
    pub builder_type: String,
    /// Unique id of this run.
    pub run_id: Uuid,
    /// When this run started.
    pub started_at: DateTime<Utc>,
    /// User variables, referenced as `var.<name>`.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    /// Resolved datasource values, referenced as `data.<type>.<name>.<attr>`.
    #[serde(default)]
    pub data: DatasourceValues,
}

impl Default for BuildContext {
    fn default() -> Self {
        Self {
            source: String::new(),
            region: String::new(),
            build_name: String::new(),
            builder_type: String::new(),
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            vars: BTreeMap::new(),
            data: DatasourceValues::default(),
        }
    }
}

impl BuildContext {
    /// Creates a context for a new run.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the source identifier.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Sets the region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Sets the build name.
    #[must_use]
    pub fn with_build_name(mut self, name: impl Into<String>) -> Self {
        self.build_name = name.into();
        self
    }

    /// Sets the builder type.
    #[must_use]
    pub fn with_builder_type(mut self, builder_type: impl Into<String>) -> Self {
        self.builder_type = builder_type.into();
        self
    }

    /// Pins the run id.
    #[must_use]
    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    /// Pins the start time.
    #[must_use]
    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    /// Adds a user variable.
    #[must_use]
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Attaches resolved datasource values.
    #[must_use]
    pub fn with_datasources(mut self, data: DatasourceValues) -> Self {
        self.data = data;
        self
    }

    /// Looks up a field by the name used in a template reference.
    #[must_use]
    pub fn lookup(&self, field: &str) -> Option<String> {
        if let Some(name) = field.strip_prefix("var.") {
            return self.vars.get(name).cloned();
        }
        if let Some(path) = field.strip_prefix("data.") {
            return self.data.lookup(path).map(json_to_text);
        }

        let normalized: String = field
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();

        match normalized.as_str() {
            "source" | "sourceami" | "sourceimage" | "sourceimageid" => Some(self.source.clone()),
            "region" | "buildregion" => Some(self.region.clone()),
            "buildname" => Some(self.build_name.clone()),
            "buildertype" | "buildtype" => Some(self.builder_type.clone()),
            "runid" => Some(self.run_id.to_string()),
            "timestamp" => Some(self.started_at.timestamp().to_string()),
            "isotime" | "isotimestamp" => {
                Some(self.started_at.to_rfc3339_opts(SecondsFormat::Secs, true))
            }
            _ => None,
        }
    }
}

fn json_to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
