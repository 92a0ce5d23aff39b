//! One build run: resolve datasources, seed the state, run the steps.

use super::{RunOutcome, Step, StepRunner};
use crate::cancellation::CancellationToken;
use crate::config::BuildConfig;
use crate::datasource::{DatasourceRegistry, DatasourceValues, Resolution, ResolveMode, Resolver};
use crate::diagnostics::Diagnostics;
use crate::errors::PackwrightError;
use crate::observability::BuildSpanAttributes;
use crate::state::{keys, SourceImage, StateBag};
use crate::tagging::{CreateTagsStep, TagProvider};
use crate::template::BuildContext;
use crate::ui::{TracingUi, Ui};
use std::sync::Arc;
use tracing::{info, Instrument};

/// What a finished run leaves behind.
#[derive(Debug)]
pub struct BuildReport {
    /// Runner result.
    pub outcome: RunOutcome,
    /// Non-fatal diagnostics from datasource resolution.
    pub diagnostics: Diagnostics,
    /// The state container after cleanup, for inspection.
    pub state: StateBag,
}

impl BuildReport {
    /// Returns true if resolution and every step succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

/// Drives one build from its configuration.
#[derive(Debug, Clone)]
pub struct Build {
    config: BuildConfig,
    registry: Arc<DatasourceRegistry>,
    ui: Arc<dyn Ui>,
    cancellation: Arc<CancellationToken>,
    mode: ResolveMode,
}

impl Build {
    /// Creates a build that resolves datasources through `registry`.
    #[must_use]
    pub fn new(config: BuildConfig, registry: Arc<DatasourceRegistry>) -> Self {
        let ui: Arc<dyn Ui> = Arc::new(TracingUi::with_prefix(config.build_name.clone()));
        Self {
            config,
            registry,
            ui,
            cancellation: Arc::new(CancellationToken::new()),
            mode: ResolveMode::Execute,
        }
    }

    /// Sets the UI stored in the state container.
    #[must_use]
    pub fn with_ui(mut self, ui: Arc<dyn Ui>) -> Self {
        self.ui = ui;
        self
    }

    /// Uses an external cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancellation = token;
        self
    }

    /// Sets the datasource resolve mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: ResolveMode) -> Self {
        self.mode = mode;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Returns the token that cancels this build.
    #[must_use]
    pub fn cancellation(&self) -> Arc<CancellationToken> {
        Arc::clone(&self.cancellation)
    }

    /// Evaluates the configured datasources.
    pub async fn resolve(&self) -> Resolution {
        let mut resolver = Resolver::new(Arc::clone(&self.registry))
            .with_cancellation(self.cancellation())
            .with_mode(self.mode);
        if let Some(limit) = self.config.max_concurrency {
            resolver = resolver.with_max_concurrency(limit);
        }
        resolver.resolve(&self.config.datasources).await
    }

    /// Returns one tagging step per configured tag specification.
    #[must_use]
    pub fn tagging_steps(&self, provider: &Arc<dyn TagProvider>) -> Vec<Arc<dyn Step>> {
        self.config
            .tag_specs
            .iter()
            .map(|pair| {
                Arc::new(
                    CreateTagsStep::new(Arc::clone(provider), pair.tags.clone(), pair.snapshot_tags.clone())
                        .with_retry(self.config.retry.clone())
                        .with_cancellation(self.cancellation()),
                ) as Arc<dyn Step>
            })
            .collect()
    }

    /// Creates the state container a run starts with.
    #[must_use]
    pub fn seed_state(&self, ctx: BuildContext, values: DatasourceValues) -> StateBag {
        let mut state = StateBag::new();
        state.put(keys::UI, Arc::clone(&self.ui));
        if let Some(ref source) = self.config.source_image {
            state.put(keys::SOURCE_IMAGE, SourceImage::new(source.clone()));
        }
        state.put(keys::BUILD_CONTEXT, ctx);
        state.put(keys::DATASOURCE_VALUES, values);
        state
    }

    /// Resolves datasources and, if that succeeds, runs `steps`.
    ///
    /// # Errors
    ///
    /// Returns a config error for an invalid configuration and
    /// [`PackwrightError::Resolution`] if any datasource diagnostic is an
    /// error, and [`PackwrightError::Cancelled`] if the token fired before
    /// the build started. A run halted or cancelled midway is reported in
    /// the [`BuildReport`].
    pub async fn run(&self, steps: Vec<Arc<dyn Step>>) -> Result<BuildReport, PackwrightError> {
        self.config.validate()?;
        if self.cancellation.is_cancelled() {
            let reason = self.cancellation.reason().unwrap_or_default();
            return Err(PackwrightError::Cancelled(reason));
        }
        let ctx = self.config.build_context();
        let span = BuildSpanAttributes::from_context(&ctx).span();

        async move {
            let resolution = self.resolve().await;
            let (values, diagnostics) = resolution.into_parts();
            if diagnostics.has_errors() {
                for diag in diagnostics.errors() {
                    self.ui.error(&diag.to_string());
                }
                return Err(PackwrightError::Resolution(diagnostics));
            }
            info!(datasources = values.len(), "Datasources resolved");

            let mut state = self.seed_state(ctx.with_datasources(values.clone()), values);
            let mut runner = StepRunner::new(steps).with_cancellation(self.cancellation());
            if let Some(limit) = self.config.step_timeout() {
                runner = runner.with_step_timeout(limit);
            }
            if let Some(limit) = self.config.cleanup_timeout() {
                runner = runner.with_cleanup_timeout(limit);
            }

            let outcome = runner.run(&mut state).await;
            info!(status = ?outcome.status, duration_ms = outcome.duration_ms, "Build finished");
            Ok(BuildReport {
                outcome,
                diagnostics,
                state,
            })
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TagSpecPair;
    use crate::datasource::{DatasourceDeclaration, Expr};
    use crate::pipeline::{FnStep, RunStatus, StepAction};
    use crate::tagging::{BlockDeviceMapping, ImageDetails, Tag};
    use crate::testing::{echo_registry, EvalLog, ScriptedTagProvider};
    use crate::ui::RecordingUi;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn config() -> BuildConfig {
        let mut config = BuildConfig::new("web");
        config.region = "us-east-1".to_string();
        config.source_image = Some("ami-src".to_string());
        config.datasources = vec![DatasourceDeclaration::new("echo", "release").with_attr("value", Expr::literal("2024.1"))];
        config.tag_specs = vec![TagSpecPair {
            tags: BTreeMap::from([
                ("Name".to_string(), "built-from-${source}".to_string()),
                ("Release".to_string(), "${data.echo.release.value}".to_string()),
            ]),
            snapshot_tags: BTreeMap::new(),
        }];
        config
    }

    fn produce_image() -> Arc<dyn Step> {
        Arc::new(FnStep::new("create-image", |state| {
            state.put(
                keys::ARTIFACT_IMAGES,
                BTreeMap::from([("us-east-1".to_string(), "ami-new".to_string())]),
            );
            Ok(StepAction::Continue)
        }))
    }

    #[tokio::test]
    async fn test_resolve_then_tag() {
        let log = EvalLog::default();
        let provider = Arc::new(ScriptedTagProvider::new().with_image(
            "ami-new",
            vec![ImageDetails::new("ami-new", vec![BlockDeviceMapping::snapshot("/dev/sda1", "snap-9")])],
        ));
        let ui = Arc::new(RecordingUi::new());
        let build = Build::new(config(), Arc::new(echo_registry(&log))).with_ui(ui.clone());

        let mut steps = vec![produce_image()];
        steps.extend(build.tagging_steps(&(provider.clone() as Arc<dyn TagProvider>)));
        let report = build.run(steps).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.outcome.executed, vec!["create-image", "create-tags"]);
        assert_eq!(
            provider.tag_calls()[0].tags,
            vec![Tag::new("Name", "built-from-ami-src"), Tag::new("Release", "2024.1")]
        );
        assert_eq!(
            report.state.get(keys::DATASOURCE_VALUES).unwrap().lookup("echo.release.value"),
            Some(&serde_json::json!("2024.1"))
        );
        assert!(ui.contains("Adding tags to image (ami-new)..."));
    }

    #[tokio::test]
    async fn test_resolution_errors_stop_before_steps() {
        let log = EvalLog::default();
        let mut cfg = config();
        cfg.datasources.push(DatasourceDeclaration::new("consul", "kv"));
        let ui = Arc::new(RecordingUi::new());
        let build = Build::new(cfg, Arc::new(echo_registry(&log))).with_ui(ui.clone());

        let ran = Arc::new(parking_lot::Mutex::new(false));
        let flag = ran.clone();
        let step = FnStep::new("never", move |_| {
            *flag.lock() = true;
            Ok(StepAction::Continue)
        });

        let err = build.run(vec![Arc::new(step)]).await.unwrap_err();
        match err {
            PackwrightError::Resolution(diags) => {
                assert_eq!(diags.errors().count(), 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!*ran.lock());
        assert!(ui.contains("Unknown data source type consul"));
    }

    #[tokio::test]
    async fn test_cancelled_build_reports_cancelled() {
        let log = EvalLog::default();
        let mut cfg = config();
        cfg.datasources.clear();
        let build = Build::new(cfg, Arc::new(echo_registry(&log)));
        let token = build.cancellation();

        let cancel = FnStep::new("cancel", move |_| {
            token.cancel("SIGINT");
            Ok(StepAction::Continue)
        });
        let report = build
            .run(vec![Arc::new(cancel), produce_image()])
            .await
            .unwrap();

        assert_eq!(report.outcome.status, RunStatus::Cancelled);
        assert_eq!(report.state.get(keys::CANCELLED), Ok(&true));
        assert!(!report.state.contains(keys::ARTIFACT_IMAGES));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let log = EvalLog::default();
        let build = Build::new(config(), Arc::new(echo_registry(&log)));
        build.cancellation().cancel("shutdown");

        let err = build.run(vec![produce_image()]).await.unwrap_err();
        assert!(matches!(err, PackwrightError::Cancelled(ref reason) if reason == "shutdown"));
        assert!(log.finished().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let log = EvalLog::default();
        let mut cfg = config();
        cfg.retry.max_attempts = 0;
        let build = Build::new(cfg, Arc::new(echo_registry(&log)));
        assert!(matches!(build.run(Vec::new()).await, Err(PackwrightError::Config(_))));
    }
}
