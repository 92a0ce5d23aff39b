//! Span attributes for a build run.

use crate::template::BuildContext;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::Span;

/// Attributes identifying one build run in logs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildSpanAttributes {
    /// Build name.
    pub build_name: String,
    /// Run id.
    pub run_id: String,
    /// Builder type.
    pub builder_type: Option<String>,
    /// Region.
    pub region: Option<String>,
}

impl BuildSpanAttributes {
    /// Takes the attributes from a build context.
    #[must_use]
    pub fn from_context(ctx: &BuildContext) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Self {
            build_name: ctx.build_name.clone(),
            run_id: ctx.run_id.to_string(),
            builder_type: non_empty(&ctx.builder_type),
            region: non_empty(&ctx.region),
        }
    }

    /// Flattens into dotted attribute names.
    #[must_use]
    pub fn to_attributes(&self) -> HashMap<String, String> {
        let mut attrs = HashMap::new();
        attrs.insert("build.name".to_string(), self.build_name.clone());
        attrs.insert("build.run_id".to_string(), self.run_id.clone());
        if let Some(ref v) = self.builder_type {
            attrs.insert("build.builder_type".to_string(), v.clone());
        }
        if let Some(ref v) = self.region {
            attrs.insert("build.region".to_string(), v.clone());
        }
        attrs
    }

    /// Opens an `info` span carrying the attributes.
    #[must_use]
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "build",
            build_name = %self.build_name,
            run_id = %self.run_id,
            builder_type = self.builder_type.as_deref().unwrap_or_default(),
            region = self.region.as_deref().unwrap_or_default(),
        )
    }
}
