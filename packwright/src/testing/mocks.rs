//! Recording steps and a scripted provider for tests.

use crate::errors::{ProviderError, StepError};
use crate::pipeline::{Step, StepAction};
use crate::state::StateBag;
use crate::tagging::{ImageDetails, Tag, TagProvider};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// A shared, ordered log of `run:<name>` / `cleanup:<name>` entries.
#[derive(Debug, Clone, Default)]
pub struct StepLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl StepLog {
    /// Appends an entry.
    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    /// Returns all entries so far.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }
}

/// A step that logs its calls and returns a configured result.
#[derive(Debug)]
pub struct RecordingStep {
    name: String,
    log: StepLog,
    action: StepAction,
    error: Option<String>,
    cleanup_error: Option<String>,
    delay: Option<Duration>,
}

impl RecordingStep {
    /// Creates a step that continues.
    #[must_use]
    pub fn new(name: impl Into<String>, log: StepLog) -> Self {
        Self {
            name: name.into(),
            log,
            action: StepAction::Continue,
            error: None,
            cleanup_error: None,
            delay: None,
        }
    }

    /// Sets the action `run` returns.
    #[must_use]
    pub fn with_action(mut self, action: StepAction) -> Self {
        self.action = action;
        self
    }

    /// Makes `run` fail with `message`.
    #[must_use]
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    /// Makes `cleanup` fail with `message`.
    #[must_use]
    pub fn with_cleanup_error(mut self, message: impl Into<String>) -> Self {
        self.cleanup_error = Some(message.into());
        self
    }

    /// Sleeps before `run` records anything.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl Step for RecordingStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _state: &mut StateBag) -> Result<StepAction, StepError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.log.push(format!("run:{}", self.name));
        match self.error {
            Some(ref message) => Err(StepError::new(message.clone())),
            None => Ok(self.action),
        }
    }

    async fn cleanup(&self, _state: &mut StateBag) -> Result<(), StepError> {
        self.log.push(format!("cleanup:{}", self.name));
        match self.cleanup_error {
            Some(ref message) => Err(StepError::new(message.clone())),
            None => Ok(()),
        }
    }
}

/// One recorded `create_tags` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCall {
    /// Region the call was scoped to.
    pub region: String,
    /// Resources named in the call.
    pub resource_ids: Vec<String>,
    /// Tags sent.
    pub tags: Vec<Tag>,
}

/// A [`TagProvider`] with scripted answers.
///
/// `describe_image` answers from the images registered with
/// [`with_image`](Self::with_image) and reports "not found" for anything
/// else. `create_tags` pops scripted results in order, then succeeds.
#[derive(Debug, Default)]
pub struct ScriptedTagProvider {
    images: HashMap<String, Vec<ImageDetails>>,
    tag_results: Mutex<VecDeque<Result<(), ProviderError>>>,
    describe_calls: Mutex<usize>,
    tag_calls: Mutex<Vec<TagCall>>,
}

impl ScriptedTagProvider {
    /// Creates a provider that knows no images.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the describe answer for `image_id`.
    #[must_use]
    pub fn with_image(mut self, image_id: impl Into<String>, details: Vec<ImageDetails>) -> Self {
        self.images.insert(image_id.into(), details);
        self
    }

    /// Queues results for successive `create_tags` calls.
    #[must_use]
    pub fn with_tag_results(self, results: Vec<Result<(), ProviderError>>) -> Self {
        self.tag_results.lock().extend(results);
        self
    }

    /// Returns how many times `describe_image` was called.
    #[must_use]
    pub fn describe_count(&self) -> usize {
        *self.describe_calls.lock()
    }

    /// Returns every `create_tags` call so far.
    #[must_use]
    pub fn tag_calls(&self) -> Vec<TagCall> {
        self.tag_calls.lock().clone()
    }
}

#[async_trait]
impl TagProvider for ScriptedTagProvider {
    async fn describe_image(&self, _region: &str, image_id: &str) -> Result<Vec<ImageDetails>, ProviderError> {
        *self.describe_calls.lock() += 1;
        self.images.get(image_id).cloned().ok_or_else(|| {
            ProviderError::not_found(
                "InvalidAMIID.NotFound",
                format!("The image id '[{image_id}]' does not exist"),
            )
        })
    }

    async fn create_tags(&self, region: &str, resource_ids: &[String], tags: &[Tag]) -> Result<(), ProviderError> {
        self.tag_calls.lock().push(TagCall {
            region: region.to_string(),
            resource_ids: resource_ids.to_vec(),
            tags: tags.to_vec(),
        });
        self.tag_results.lock().pop_front().unwrap_or(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_results_then_success() {
        let provider = ScriptedTagProvider::new()
            .with_tag_results(vec![Err(ProviderError::not_found("InvalidSnapshot.NotFound", "snap-1"))]);
        let ids = vec!["snap-1".to_string()];

        assert!(provider.create_tags("r", &ids, &[]).await.is_err());
        assert!(provider.create_tags("r", &ids, &[]).await.is_ok());
        assert_eq!(provider.tag_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_recording_step_logs() {
        let log = StepLog::default();
        let step = RecordingStep::new("a", log.clone()).with_action(StepAction::Halt);
        let mut state = StateBag::new();

        assert_eq!(step.run(&mut state).await, Ok(StepAction::Halt));
        step.cleanup(&mut state).await.unwrap();
        assert_eq!(log.entries(), vec!["run:a", "cleanup:a"]);
    }
}
