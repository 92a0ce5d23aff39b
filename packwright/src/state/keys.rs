//! Well-known state keys shared between the runner and the built-in steps.

use super::StateKey;
use crate::datasource::DatasourceValues;
use crate::errors::StepError;
use crate::template::BuildContext;
use crate::ui::Ui;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The image a build started from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceImage {
    /// Provider identifier, e.g. `ami-0abc`.
    pub id: String,
    /// Display name, if the provider reports one.
    #[serde(default)]
    pub name: Option<String>,
}

impl SourceImage {
    /// Creates a source image with only an id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

/// Output channel for build progress.
pub const UI: StateKey<Arc<dyn Ui>> = StateKey::new("ui");

/// Why the run halted. Written by the runner.
pub const ERROR: StateKey<StepError> = StateKey::new("error");

/// Set when the run stopped because of cancellation.
pub const CANCELLED: StateKey<bool> = StateKey::new("cancelled");

/// Set when a step halted the run.
pub const HALTED: StateKey<bool> = StateKey::new("halted");

/// The image the build started from, when known.
pub const SOURCE_IMAGE: StateKey<SourceImage> = StateKey::new("source-image");

/// Images produced by the build, keyed by region.
pub const ARTIFACT_IMAGES: StateKey<BTreeMap<String, String>> = StateKey::new("artifact-images");

/// Run metadata for template rendering.
pub const BUILD_CONTEXT: StateKey<BuildContext> = StateKey::new("build-context");

/// Values computed by datasources before the run.
pub const DATASOURCE_VALUES: StateKey<DatasourceValues> = StateKey::new("datasource-values");
