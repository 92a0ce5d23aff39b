//! Resource tagging.
//!
//! Renders tag templates against the build context and applies them to
//! built images and their persistent snapshots.

mod provider;
mod step;
mod tags;

pub use provider::{BlockDeviceMapping, ImageDetails, TagProvider};
pub use step::CreateTagsStep;
pub use tags::{render_tags, report_tags, Tag, TagSpec};
