//! Datasource declarations and their dependency-ordered resolution.
//!
//! A datasource is a named value computed by a plugin before the build
//! runs. Declarations may reference each other's outputs; the
//! [`Resolver`] evaluates them in dependency order and reports every
//! problem as a [`crate::diagnostics::Diagnostic`].

mod builtin;
mod declaration;
mod registry;
mod resolver;
mod spec;
mod value;

pub use builtin::{
    ImageCatalog, ImageIterationConfig, ImageIterationDatasource, InMemoryImageCatalog, IterationImage,
    IMAGE_ITERATION,
};
pub use declaration::{is_valid_identifier, DatasourceDeclaration, DatasourceRef, Expr, RefExpr, UnknownExpr};
pub use registry::{Datasource, DatasourceFactory, DatasourceRegistry};
pub use resolver::{DatasourceState, Resolution, ResolveMode, Resolver};
pub use spec::{AttrSpec, AttrType, ObjectSpec};
pub use value::{DatasourceValues, Resolved};
