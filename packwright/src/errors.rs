//! Error types for packwright.
//!
//! Each subsystem has its own error type; `PackwrightError` wraps them for
//! callers that drive a whole build.

use crate::diagnostics::Diagnostics;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The main error type for packwright operations.
#[derive(Debug, Error)]
pub enum PackwrightError {
    /// A template failed to render.
    #[error("{0}")]
    Render(#[from] RenderError),

    /// A provider call failed.
    #[error("{0}")]
    Provider(#[from] ProviderError),

    /// The state container was read incorrectly.
    #[error("{0}")]
    State(#[from] StateError),

    /// A datasource plugin failed.
    #[error("{0}")]
    Datasource(#[from] DatasourceError),

    /// The build configuration is invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// Datasource resolution produced error diagnostics.
    #[error("datasource resolution failed:\n{0}")]
    Resolution(Diagnostics),

    /// The build was cancelled.
    #[error("Build cancelled: {0}")]
    Cancelled(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while rendering a template against a build context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// A `${` or `{{` opener has no matching closer.
    #[error("unterminated reference at offset {offset} in {template:?}")]
    Unterminated {
        /// The template being rendered.
        template: String,
        /// Byte offset of the opener.
        offset: usize,
    },

    /// A reference with nothing between the delimiters.
    #[error("empty reference in {template:?}")]
    EmptyReference {
        /// The template being rendered.
        template: String,
    },

    /// The reference does not name a field of the build context.
    #[error("undefined field '{field}'")]
    UndefinedField {
        /// The field as written in the template.
        field: String,
    },
}

impl RenderError {
    /// Creates an undefined-field error.
    #[must_use]
    pub fn undefined(field: impl Into<String>) -> Self {
        Self::UndefinedField {
            field: field.into(),
        }
    }
}

/// Classification of provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// The resource is not visible yet (eventual consistency).
    NotFound,
    /// Credentials were rejected.
    Unauthorized,
    /// The request itself is invalid.
    Malformed,
    /// Anything else.
    Other,
}

/// An error returned by a cloud or virtualization provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct ProviderError {
    /// The failure class.
    pub kind: ProviderErrorKind,
    /// The provider's error code (e.g. `InvalidSnapshot.NotFound`).
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ProviderError {
    /// Creates a new provider error.
    #[must_use]
    pub fn new(kind: ProviderErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates a "not found yet" error.
    #[must_use]
    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::NotFound, code, message)
    }

    /// Returns true when the error is transient and worth retrying.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind == ProviderErrorKind::NotFound
    }
}

/// Errors raised by the state container.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// A key was read before any step wrote it.
    #[error("state key '{key}' was read before it was written")]
    Missing {
        /// The key name.
        key: String,
    },

    /// A value exists under the key's name but with a different type.
    #[error("state key '{key}' holds a value of a different type")]
    TypeMismatch {
        /// The key name.
        key: String,
    },
}

/// An error produced by a step's `run` or `cleanup`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct StepError {
    /// Descriptive message naming the resource involved.
    pub message: String,
}

impl StepError {
    /// Creates a new step error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<StateError> for StepError {
    fn from(err: StateError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<RenderError> for StepError {
    fn from(err: RenderError) -> Self {
        Self::new(err.to_string())
    }
}

/// An error returned by a datasource plugin.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DatasourceError {
    /// The message reported by the plugin.
    pub message: String,
}

impl DatasourceError {
    /// Creates a new datasource error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors in the build configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The retry policy violates its invariants.
    #[error("invalid retry policy: {0}")]
    InvalidRetryPolicy(String),

    /// A field has an invalid value.
    #[error("invalid value for '{field}': {message}")]
    InvalidField {
        /// The field name.
        field: String,
        /// What is wrong with it.
        message: String,
    },
}

impl ConfigError {
    /// Creates an invalid-field error.
    #[must_use]
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::not_found("InvalidAMIID.NotFound", "image ami-1 does not exist");
        assert_eq!(err.to_string(), "InvalidAMIID.NotFound: image ami-1 does not exist");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_permanent_provider_error_not_retryable() {
        let err = ProviderError::new(ProviderErrorKind::Unauthorized, "AuthFailure", "denied");
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_state_error_names_key() {
        let err = StateError::Missing {
            key: "artifact-images".to_string(),
        };
        assert!(err.to_string().contains("artifact-images"));

        let step_err: StepError = err.into();
        assert!(step_err.message.contains("artifact-images"));
    }

    #[test]
    fn test_render_error_into_step_error() {
        let err: StepError = RenderError::undefined("nope").into();
        assert_eq!(err.message, "undefined field 'nope'");
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::invalid_field("build_name", "must not be empty");
        assert_eq!(err.to_string(), "invalid value for 'build_name': must not be empty");
    }
}
