//! User-facing build output.
//!
//! Steps report progress through a [`Ui`] stored in the state container.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tracing::{error, info};

/// Output channel for build progress.
pub trait Ui: Send + Sync + Debug {
    /// Announces a top-level action.
    fn say(&self, message: &str);

    /// Reports a detail under the current action.
    fn message(&self, message: &str);

    /// Reports an error.
    fn error(&self, message: &str);
}

/// A UI that writes through the tracing framework.
#[derive(Debug, Clone, Default)]
pub struct TracingUi {
    /// Prefix added to every line, usually the build name.
    prefix: Option<String>,
}

impl TracingUi {
    /// Creates a UI without a prefix.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a UI that prefixes lines with the build name.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    fn line(&self, message: &str) -> String {
        match self.prefix {
            Some(ref p) => format!("{p}: {message}"),
            None => message.to_string(),
        }
    }
}

impl Ui for TracingUi {
    fn say(&self, message: &str) {
        info!(target: "packwright::ui", "==> {}", self.line(message));
    }

    fn message(&self, message: &str) {
        info!(target: "packwright::ui", "    {}", self.line(message));
    }

    fn error(&self, message: &str) {
        error!(target: "packwright::ui", "{}", self.line(message));
    }
}

/// Kind of a recorded UI line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiLevel {
    /// From [`Ui::say`].
    Say,
    /// From [`Ui::message`].
    Message,
    /// From [`Ui::error`].
    Error,
}

/// A UI that records every line, for tests and for inspection after a run.
#[derive(Debug, Default)]
pub struct RecordingUi {
    lines: RwLock<Vec<(UiLevel, String)>>,
}

impl RecordingUi {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all recorded lines.
    #[must_use]
    pub fn lines(&self) -> Vec<(UiLevel, String)> {
        self.lines.read().clone()
    }

    /// Returns the recorded error lines.
    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.lines
            .read()
            .iter()
            .filter(|(level, _)| *level == UiLevel::Error)
            .map(|(_, line)| line.clone())
            .collect()
    }

    /// Returns true if any line contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.read().iter().any(|(_, line)| line.contains(needle))
    }

    fn record(&self, level: UiLevel, message: &str) {
        self.lines.write().push((level, message.to_string()));
    }
}

impl Ui for RecordingUi {
    fn say(&self, message: &str) {
        self.record(UiLevel::Say, message);
    }

    fn message(&self, message: &str) {
        self.record(UiLevel::Message, message);
    }

    fn error(&self, message: &str) {
        self.record(UiLevel::Error, message);
    }
}
