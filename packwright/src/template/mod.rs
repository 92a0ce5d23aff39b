//! Template interpolation against build metadata.

mod context;
mod render;

pub use context::BuildContext;
pub use render::{contains_reference, render};
