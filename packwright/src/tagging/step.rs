//! Step that tags built images and their snapshots.

use super::{render_tags, report_tags, Tag, TagProvider, TagSpec};
use crate::cancellation::CancellationToken;
use crate::errors::{ProviderError, StepError};
use crate::pipeline::{retry, AttemptOutcome, RetryPolicy, Step, StepAction};
use crate::state::{keys, StateBag};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Tags every image in [`keys::ARTIFACT_IMAGES`] and the snapshots behind it.
///
/// `tags` go on the image and all its snapshots; `snapshot_tags` are then
/// written over the snapshots only. Provider "not found" errors are retried
/// under the step's [`RetryPolicy`] on both calls.
#[derive(Debug, Clone)]
pub struct CreateTagsStep {
    provider: Arc<dyn TagProvider>,
    tags: TagSpec,
    snapshot_tags: TagSpec,
    retry: RetryPolicy,
    cancellation: Option<Arc<CancellationToken>>,
}

struct TagPlan {
    resource_ids: Vec<String>,
    snapshot_ids: Vec<String>,
    image_tags: Vec<Tag>,
    snapshot_tags: Vec<Tag>,
}

impl CreateTagsStep {
    /// Creates a tagging step with the default retry policy.
    #[must_use]
    pub fn new(provider: Arc<dyn TagProvider>, tags: TagSpec, snapshot_tags: TagSpec) -> Self {
        Self {
            provider,
            tags,
            snapshot_tags,
            retry: RetryPolicy::default(),
            cancellation: None,
        }
    }

    /// Sets the retry policy for tag creation.
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Aborts retry backoff when `token` fires.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancellation = Some(token);
        self
    }

    async fn tag_image(&self, state: &StateBag, region: &str, image_id: &str) -> Result<(), StepError> {
        let ui = state.ui();
        ui.say(&format!("Adding tags to image ({image_id})..."));

        let images = self
            .provider
            .describe_image(region, image_id)
            .await
            .map_err(|e| StepError::new(format!("Error retrieving details for image ({image_id}): {e}")))?;
        let image = images.first().ok_or_else(|| {
            StepError::new(format!("Error retrieving details for image ({image_id}), no images found"))
        })?;
        if image.block_devices.is_empty() {
            return Err(StepError::new(format!(
                "Error retrieving details for image ({image_id}), no block device mappings"
            )));
        }

        let snapshot_ids = image.snapshot_ids();
        for snapshot in &snapshot_ids {
            ui.say(&format!("Tagging snapshot: {snapshot}"));
        }

        let mut ctx = state.get_opt(keys::BUILD_CONTEXT).cloned().unwrap_or_default();
        if let Some(source) = state.get_opt(keys::SOURCE_IMAGE) {
            ctx = ctx.with_source(source.id.clone());
        }
        let ctx = ctx.with_region(region);

        ui.say("Creating image tags");
        let image_tags = render_tags(&self.tags, &ctx)?;
        report_tags(ui.as_ref(), &image_tags);

        ui.say("Creating snapshot tags");
        let snapshot_tags = render_tags(&self.snapshot_tags, &ctx)?;
        report_tags(ui.as_ref(), &snapshot_tags);

        let mut resource_ids = vec![image_id.to_string()];
        resource_ids.extend(snapshot_ids.iter().cloned());
        let plan = TagPlan {
            resource_ids,
            snapshot_ids,
            image_tags,
            snapshot_tags,
        };

        let provider = self.provider.as_ref();
        let plan_ref = &plan;
        let attempts = retry(&self.retry, self.cancellation.as_deref(), |attempt| async move {
            debug!(region, attempt, "Creating tags");
            apply_once(provider, region, plan_ref).await
        })
        .await
        .map_err(|e| {
            StepError::new(format!(
                "Error adding tags to resources [{}]: {e}",
                plan.resource_ids.join(", ")
            ))
        })?;

        info!(region, image = image_id, attempts, "Tagged image and snapshots");
        Ok(())
    }
}

async fn apply_once(provider: &dyn TagProvider, region: &str, plan: &TagPlan) -> AttemptOutcome<ProviderError> {
    if !plan.image_tags.is_empty() {
        if let Err(e) = provider.create_tags(region, &plan.resource_ids, &plan.image_tags).await {
            return classify(e);
        }
    }
    if !plan.snapshot_tags.is_empty() && !plan.snapshot_ids.is_empty() {
        if let Err(e) = provider.create_tags(region, &plan.snapshot_ids, &plan.snapshot_tags).await {
            return classify(e);
        }
    }
    AttemptOutcome::Success
}

fn classify(err: ProviderError) -> AttemptOutcome<ProviderError> {
    if err.is_not_found() {
        AttemptOutcome::Transient(err)
    } else {
        AttemptOutcome::Permanent(err)
    }
}

#[async_trait]
impl Step for CreateTagsStep {
    fn name(&self) -> &str {
        "create-tags"
    }

    async fn run(&self, state: &mut StateBag) -> Result<StepAction, StepError> {
        if self.tags.is_empty() && self.snapshot_tags.is_empty() {
            return Ok(StepAction::Continue);
        }

        let images = state.get(keys::ARTIFACT_IMAGES)?.clone();
        for (region, image_id) in &images {
            self.tag_image(state, region, image_id).await?;
        }
        Ok(StepAction::Continue)
    }
}
