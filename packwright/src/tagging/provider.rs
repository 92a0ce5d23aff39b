//! Provider seam used by the tagging step.

use crate::errors::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use super::Tag;

/// A block device attached to an image.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockDeviceMapping {
    /// Device name, e.g. `/dev/sda1`.
    pub device_name: String,
    /// Persistent snapshot backing the device. `None` for ephemeral storage.
    #[serde(default)]
    pub snapshot_id: Option<String>,
    /// Instance-store name, e.g. `ephemeral0`.
    #[serde(default)]
    pub virtual_name: Option<String>,
}

impl BlockDeviceMapping {
    /// A device backed by a snapshot.
    #[must_use]
    pub fn snapshot(device_name: impl Into<String>, snapshot_id: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            snapshot_id: Some(snapshot_id.into()),
            virtual_name: None,
        }
    }

    /// An instance-store device.
    #[must_use]
    pub fn ephemeral(device_name: impl Into<String>, virtual_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            snapshot_id: None,
            virtual_name: Some(virtual_name.into()),
        }
    }
}

/// What a provider reports about an image.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImageDetails {
    /// Image identifier.
    pub id: String,
    /// Attached devices.
    #[serde(default)]
    pub block_devices: Vec<BlockDeviceMapping>,
}

impl ImageDetails {
    /// Creates image details.
    #[must_use]
    pub fn new(id: impl Into<String>, block_devices: Vec<BlockDeviceMapping>) -> Self {
        Self {
            id: id.into(),
            block_devices,
        }
    }

    /// Returns the snapshot ids of persistent devices, in device order.
    #[must_use]
    pub fn snapshot_ids(&self) -> Vec<String> {
        self.block_devices
            .iter()
            .filter_map(|d| d.snapshot_id.clone())
            .collect()
    }
}

/// Region-scoped access to a provider's image and tagging APIs.
///
/// Both calls may fail with [`crate::errors::ProviderErrorKind::NotFound`]
/// while a freshly created resource propagates.
#[async_trait]
pub trait TagProvider: Send + Sync + Debug {
    /// Looks up an image and its block devices.
    async fn describe_image(&self, region: &str, image_id: &str) -> Result<Vec<ImageDetails>, ProviderError>;

    /// Creates or overwrites `tags` on every resource in `resource_ids`.
    async fn create_tags(&self, region: &str, resource_ids: &[String], tags: &[Tag]) -> Result<(), ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_ids_skip_ephemeral_devices() {
        let image = ImageDetails::new(
            "ami-1",
            vec![
                BlockDeviceMapping::snapshot("/dev/sda1", "snap-1"),
                BlockDeviceMapping::ephemeral("/dev/sdb", "ephemeral0"),
                BlockDeviceMapping::snapshot("/dev/sdc", "snap-2"),
            ],
        );
        assert_eq!(image.snapshot_ids(), vec!["snap-1".to_string(), "snap-2".to_string()]);
    }

    #[test]
    fn test_details_deserialize_with_defaults() {
        let image: ImageDetails = serde_json::from_str(r#"{"id": "ami-2"}"#).unwrap();
        assert!(image.block_devices.is_empty());
    }
}
