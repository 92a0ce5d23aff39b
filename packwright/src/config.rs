//! Build configuration loaded from JSON.

use crate::datasource::DatasourceDeclaration;
use crate::errors::{ConfigError, PackwrightError};
use crate::pipeline::RetryPolicy;
use crate::tagging::TagSpec;
use crate::template::BuildContext;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Tags for an image and, separately, for its snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TagSpecPair {
    /// Applied to the image and every snapshot.
    #[serde(default)]
    pub tags: TagSpec,
    /// Applied to snapshots only, after `tags`.
    #[serde(default)]
    pub snapshot_tags: TagSpec,
}

/// Everything the core needs to run one build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Name of the build.
    pub build_name: String,
    /// Builder type, e.g. `amazon-ebs`.
    #[serde(default)]
    pub builder_type: String,
    /// Region the build runs in.
    #[serde(default)]
    pub region: String,
    /// Image the build starts from.
    #[serde(default)]
    pub source_image: Option<String>,
    /// User variables.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    /// Tag specifications, applied in order.
    #[serde(default)]
    pub tag_specs: Vec<TagSpecPair>,
    /// Backoff for provider calls.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Datasource declarations.
    #[serde(default)]
    pub datasources: Vec<DatasourceDeclaration>,
    /// Limit on simultaneously evaluating datasources.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    /// Bound on each step's run, in milliseconds.
    #[serde(default)]
    pub step_timeout_ms: Option<u64>,
    /// Bound on each step's cleanup, in milliseconds.
    #[serde(default = "default_cleanup_timeout_ms")]
    pub cleanup_timeout_ms: Option<u64>,
}

#[allow(clippy::unnecessary_wraps)]
fn default_cleanup_timeout_ms() -> Option<u64> {
    Some(300_000)
}

impl BuildConfig {
    /// Creates a configuration with defaults for everything but the name.
    #[must_use]
    pub fn new(build_name: impl Into<String>) -> Self {
        Self {
            build_name: build_name.into(),
            builder_type: String::new(),
            region: String::new(),
            source_image: None,
            vars: BTreeMap::new(),
            tag_specs: Vec::new(),
            retry: RetryPolicy::default(),
            datasources: Vec::new(),
            max_concurrency: None,
            step_timeout_ms: None,
            cleanup_timeout_ms: default_cleanup_timeout_ms(),
        }
    }

    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// Returns a serialization error for malformed JSON and a config error
    /// for invalid values.
    pub fn from_json_str(json: &str) -> Result<Self, PackwrightError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be read, otherwise as
    /// [`BuildConfig::from_json_str`].
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, PackwrightError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Checks the build name, the retry policy and the timeouts.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.build_name.trim().is_empty() {
            return Err(ConfigError::invalid_field("build_name", "must not be empty"));
        }
        self.retry.validate()?;
        if self.max_concurrency == Some(0) {
            return Err(ConfigError::invalid_field("max_concurrency", "must be at least 1"));
        }
        if self.step_timeout_ms == Some(0) {
            return Err(ConfigError::invalid_field("step_timeout_ms", "must be greater than zero"));
        }
        if self.cleanup_timeout_ms == Some(0) {
            return Err(ConfigError::invalid_field("cleanup_timeout_ms", "must be greater than zero"));
        }
        Ok(())
    }

    /// Returns the step timeout.
    #[must_use]
    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_ms.map(Duration::from_millis)
    }

    /// Returns the cleanup timeout.
    #[must_use]
    pub fn cleanup_timeout(&self) -> Option<Duration> {
        self.cleanup_timeout_ms.map(Duration::from_millis)
    }

    /// Returns a fresh build context for this configuration.
    #[must_use]
    pub fn build_context(&self) -> BuildContext {
        let ctx = BuildContext::new()
            .with_build_name(&self.build_name)
            .with_builder_type(&self.builder_type)
            .with_region(&self.region)
            .with_source(self.source_image.clone().unwrap_or_default());
        self.vars
            .iter()
            .fold(ctx, |ctx, (name, value)| ctx.with_var(name, value))
    }
}
