//! # Packwright
//!
//! The core of a machine image builder.
//!
//! Packwright runs an ordered pipeline of build steps against a shared,
//! typed state container, and resolves interdependent datasource values
//! before the pipeline starts:
//!
//! - **Step execution**: strictly sequential steps with halt and reverse,
//!   best-effort cleanup
//! - **Retries**: exponential backoff for eventually-consistent provider APIs
//! - **Templates**: tag and configuration strings rendered against the build
//!   context
//! - **Tagging**: images and their snapshots tagged through a provider seam
//! - **Datasources**: plugin-computed values evaluated in dependency order,
//!   with every problem reported as a diagnostic
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use packwright::prelude::*;
//!
//! let config = BuildConfig::from_path("build.json")?;
//! let registry = Arc::new(DatasourceRegistry::new());
//! ImageIterationDatasource::register(&registry, catalog);
//!
//! let build = Build::new(config, registry);
//! let mut steps = vec![create_image_step];
//! steps.extend(build.tagging_steps(&provider));
//!
//! let report = build.run(steps).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod datasource;
pub mod diagnostics;
pub mod errors;
pub mod observability;
pub mod pipeline;
pub mod state;
pub mod tagging;
pub mod template;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod ui;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{BuildConfig, TagSpecPair};
    pub use crate::datasource::{
        Datasource, DatasourceDeclaration, DatasourceRef, DatasourceRegistry, DatasourceValues,
        ImageCatalog, ImageIterationDatasource, InMemoryImageCatalog, ObjectSpec, Resolution,
        ResolveMode, Resolver,
    };
    pub use crate::diagnostics::{Diagnostic, Diagnostics, Severity};
    pub use crate::errors::{PackwrightError, ProviderError, ProviderErrorKind, StepError};
    pub use crate::observability::{init_logging, LogFormat};
    pub use crate::pipeline::{
        retry, AttemptOutcome, Build, BuildReport, FnStep, RetryPolicy, RunOutcome, RunStatus,
        Step, StepAction, StepRunner,
    };
    pub use crate::state::{keys, StateBag, StateKey};
    pub use crate::tagging::{CreateTagsStep, ImageDetails, Tag, TagProvider, TagSpec};
    pub use crate::template::{render, BuildContext};
    pub use crate::ui::{RecordingUi, TracingUi, Ui};
}
