//! The `image-iteration` datasource: looks up the image an image-registry
//! iteration produced for one cloud provider and region.

use super::registry::{Datasource, DatasourceRegistry};
use super::spec::{AttrType, ObjectSpec};
use crate::errors::DatasourceError;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Registry type name.
pub const IMAGE_ITERATION: &str = "image-iteration";

/// An image recorded in an iteration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IterationImage {
    /// Cloud provider, e.g. `aws`.
    pub cloud_provider: String,
    /// Builder that produced the image.
    pub component_type: String,
    /// RFC 3339 creation time.
    pub created_at: String,
    /// Build that produced the image.
    pub build_id: String,
    /// Iteration the build belongs to.
    pub iteration_id: String,
    /// Run that produced the build.
    pub packer_run_uuid: String,
    /// Provider image id.
    pub id: String,
    /// Region the image lives in.
    pub region: String,
    /// Free-form labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Source of iteration images.
#[async_trait]
pub trait ImageCatalog: Send + Sync + Debug {
    /// Returns the images of `iteration_id` in `bucket`.
    async fn iteration_images(&self, bucket: &str, iteration_id: &str) -> Result<Vec<IterationImage>, DatasourceError>;
}

/// A catalog held in memory.
#[derive(Debug, Default)]
pub struct InMemoryImageCatalog {
    buckets: RwLock<BTreeMap<String, Vec<IterationImage>>>,
}

impl InMemoryImageCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an image to `bucket`.
    pub fn add(&self, bucket: impl Into<String>, image: IterationImage) {
        self.buckets.write().entry(bucket.into()).or_default().push(image);
    }
}

#[async_trait]
impl ImageCatalog for InMemoryImageCatalog {
    async fn iteration_images(&self, bucket: &str, iteration_id: &str) -> Result<Vec<IterationImage>, DatasourceError> {
        let buckets = self.buckets.read();
        let images = buckets
            .get(bucket)
            .ok_or_else(|| DatasourceError::new(format!("bucket \"{bucket}\" does not exist")))?;
        Ok(images
            .iter()
            .filter(|i| i.iteration_id == iteration_id)
            .cloned()
            .collect())
    }
}

/// Configuration of an `image-iteration` declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageIterationConfig {
    /// Build name, set by the core.
    #[serde(default)]
    pub packer_build_name: Option<String>,
    /// Builder type, set by the core.
    #[serde(default)]
    pub packer_builder_type: Option<String>,
    /// Core version, set by the core.
    #[serde(default)]
    pub packer_core_version: Option<String>,
    /// Debug mode flag.
    #[serde(default)]
    pub packer_debug: Option<bool>,
    /// Force flag.
    #[serde(default)]
    pub packer_force: Option<bool>,
    /// What to do on error.
    #[serde(default)]
    pub packer_on_error: Option<String>,
    /// User variables.
    #[serde(default)]
    pub packer_user_variables: BTreeMap<String, String>,
    /// Names of sensitive variables.
    #[serde(default)]
    pub packer_sensitive_variables: Vec<String>,
    /// Registry bucket.
    #[serde(default)]
    pub bucket_name: String,
    /// Iteration to read.
    #[serde(default)]
    pub iteration_id: String,
    /// Cloud provider to select.
    #[serde(default)]
    pub cloud_provider: String,
    /// Region to select.
    #[serde(default)]
    pub region: String,
}

impl ImageIterationConfig {
    fn validate(&self) -> Result<(), DatasourceError> {
        let missing: Vec<String> = [
            ("bucket_name", &self.bucket_name),
            ("iteration_id", &self.iteration_id),
            ("cloud_provider", &self.cloud_provider),
            ("region", &self.region),
        ]
        .into_iter()
        .filter(|(_, v)| v.is_empty())
        .map(|(name, _)| format!("The `{name}` must be specified"))
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(DatasourceError::new(missing.join("; ")))
        }
    }
}

/// The `image-iteration` plugin.
#[derive(Debug)]
pub struct ImageIterationDatasource {
    catalog: Arc<dyn ImageCatalog>,
    config: ImageIterationConfig,
}

impl ImageIterationDatasource {
    /// Creates an unconfigured instance.
    #[must_use]
    pub fn new(catalog: Arc<dyn ImageCatalog>) -> Self {
        Self {
            catalog,
            config: ImageIterationConfig::default(),
        }
    }

    /// Registers the plugin under [`IMAGE_ITERATION`].
    pub fn register(registry: &DatasourceRegistry, catalog: Arc<dyn ImageCatalog>) {
        registry.register(IMAGE_ITERATION, move || {
            Ok(Box::new(Self::new(catalog.clone())) as Box<dyn Datasource>)
        });
    }
}

#[async_trait]
impl Datasource for ImageIterationDatasource {
    fn config_spec(&self) -> ObjectSpec {
        ObjectSpec::new()
            .optional("packer_build_name", AttrType::String)
            .optional("packer_builder_type", AttrType::String)
            .optional("packer_core_version", AttrType::String)
            .optional("packer_debug", AttrType::Bool)
            .optional("packer_force", AttrType::Bool)
            .optional("packer_on_error", AttrType::String)
            .optional("packer_user_variables", AttrType::StringMap)
            .optional("packer_sensitive_variables", AttrType::StringList)
            .required("bucket_name", AttrType::String)
            .required("iteration_id", AttrType::String)
            .required("cloud_provider", AttrType::String)
            .required("region", AttrType::String)
    }

    fn output_spec(&self) -> ObjectSpec {
        ObjectSpec::new()
            .optional("cloud_provider", AttrType::String)
            .optional("component_type", AttrType::String)
            .optional("created_at", AttrType::String)
            .optional("build_id", AttrType::String)
            .optional("iteration_id", AttrType::String)
            .optional("packer_run_uuid", AttrType::String)
            .optional("id", AttrType::String)
            .optional("region", AttrType::String)
            .optional("labels", AttrType::StringMap)
    }

    async fn configure(&mut self, config: serde_json::Value) -> Result<(), DatasourceError> {
        let config: ImageIterationConfig =
            serde_json::from_value(config).map_err(|e| DatasourceError::new(format!("invalid configuration: {e}")))?;
        config.validate()?;
        self.config = config;
        Ok(())
    }

    async fn execute(&self) -> Result<serde_json::Value, DatasourceError> {
        let c = &self.config;
        let images = self.catalog.iteration_images(&c.bucket_name, &c.iteration_id).await?;
        let image = images
            .into_iter()
            .find(|i| i.cloud_provider == c.cloud_provider && i.region == c.region)
            .ok_or_else(|| {
                DatasourceError::new(format!(
                    "could not find an image for cloud provider \"{}\" in region \"{}\" in iteration \"{}\" of bucket \"{}\"",
                    c.cloud_provider, c.region, c.iteration_id, c.bucket_name
                ))
            })?;
        serde_json::to_value(image).map_err(|e| DatasourceError::new(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn catalog() -> Arc<InMemoryImageCatalog> {
        let catalog = InMemoryImageCatalog::new();
        catalog.add(
            "base-images",
            IterationImage {
                cloud_provider: "aws".into(),
                component_type: "amazon-ebs.ubuntu".into(),
                created_at: "2024-01-01T00:00:00Z".into(),
                build_id: "b-1".into(),
                iteration_id: "it-1".into(),
                packer_run_uuid: "6f1c0a36-7c1e-4d8f-9d0b-0d7a0f1f2e3c".into(),
                id: "ami-0abc".into(),
                region: "us-east-1".into(),
                labels: BTreeMap::from([("os".into(), "ubuntu".into())]),
            },
        );
        Arc::new(catalog)
    }

    fn config() -> serde_json::Value {
        json!({
            "bucket_name": "base-images",
            "iteration_id": "it-1",
            "cloud_provider": "aws",
            "region": "us-east-1",
            "packer_user_variables": {"env": "prod"}
        })
    }

    #[tokio::test]
    async fn test_finds_image_for_provider_and_region() {
        let mut ds = ImageIterationDatasource::new(catalog());
        ds.configure(config()).await.unwrap();
        let value = ds.execute().await.unwrap();

        assert_eq!(value["id"], json!("ami-0abc"));
        assert_eq!(value["labels"], json!({"os": "ubuntu"}));
    }

    #[tokio::test]
    async fn test_missing_required_fields() {
        let mut ds = ImageIterationDatasource::new(catalog());
        let err = ds.configure(json!({"bucket_name": "base-images"})).await.unwrap_err();
        assert_eq!(
            err.message,
            "The `iteration_id` must be specified; The `cloud_provider` must be specified; The `region` must be specified"
        );
    }

    #[tokio::test]
    async fn test_no_matching_region() {
        let mut ds = ImageIterationDatasource::new(catalog());
        let mut cfg = config();
        cfg["region"] = json!("eu-west-1");
        ds.configure(cfg).await.unwrap();
        let err = ds.execute().await.unwrap_err();
        assert!(err.message.contains("\"eu-west-1\""));
    }

    #[test]
    fn test_output_spec_matches_image_fields() {
        let ds = ImageIterationDatasource::new(catalog());
        let image = serde_json::to_value(IterationImage::default()).unwrap();
        let fields: Vec<_> = image.as_object().unwrap().keys().cloned().collect();
        let spec: Vec<_> = ds.output_spec().iter().map(|(k, _)| k.to_string()).collect();
        let mut fields = fields;
        fields.sort();
        assert_eq!(fields, spec);
    }
}
