//! Sequential step runner with halt and reverse cleanup.
//!
//! Steps run strictly in order, one at a time. When a step halts (or fails,
//! times out, or the build is cancelled) no further step runs. Every step
//! that ran is then cleaned up in reverse order; cleanup is best-effort.

use super::{Step, StepAction};
use crate::cancellation::CancellationToken;
use crate::errors::StepError;
use crate::state::{keys, StateBag};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every step returned `Continue`.
    Succeeded,
    /// A step halted or failed.
    Halted,
    /// The cancellation token fired between steps.
    Cancelled,
}

/// A cleanup that failed; logged and collected, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupFailure {
    /// The step whose cleanup failed.
    pub step: String,
    /// What went wrong.
    pub error: String,
}

/// Result of running a step sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Final status.
    pub status: RunStatus,
    /// Steps whose `run` was invoked, in order.
    pub executed: Vec<String>,
    /// Steps whose `cleanup` was invoked, in order.
    pub cleaned_up: Vec<String>,
    /// The step that halted, if any.
    pub halted_at: Option<String>,
    /// Contents of the error slot at the end of the run.
    pub error: Option<StepError>,
    /// Cleanups that failed.
    pub cleanup_failures: Vec<CleanupFailure>,
    /// Total execution time in milliseconds.
    pub duration_ms: f64,
}

impl RunOutcome {
    /// Returns true if the run succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

/// Runs an ordered list of steps against a state bag.
#[derive(Debug, Clone, Default)]
pub struct StepRunner {
    steps: Vec<Arc<dyn Step>>,
    cancellation: Option<Arc<CancellationToken>>,
    step_timeout: Option<Duration>,
    cleanup_timeout: Option<Duration>,
}

impl StepRunner {
    /// Creates a runner for `steps`.
    #[must_use]
    pub fn new(steps: Vec<Arc<dyn Step>>) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }

    /// Observes `token` between steps.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Bounds each step's `run`; exceeding it halts the run.
    #[must_use]
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    /// Bounds each step's `cleanup`; exceeding it counts as a cleanup failure.
    #[must_use]
    pub fn with_cleanup_timeout(mut self, timeout: Duration) -> Self {
        self.cleanup_timeout = Some(timeout);
        self
    }

    /// Returns the number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if there are no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs every step in order, then cleans up the executed ones in reverse.
    pub async fn run(&self, state: &mut StateBag) -> RunOutcome {
        let start = Instant::now();
        let mut executed: Vec<&Arc<dyn Step>> = Vec::with_capacity(self.steps.len());
        let mut status = RunStatus::Succeeded;
        let mut halted_at = None;

        for step in &self.steps {
            if let Some(ref token) = self.cancellation {
                if token.is_cancelled() {
                    let reason = token.reason().unwrap_or_else(|| "cancelled".to_string());
                    info!(step = step.name(), reason = %reason, "Build cancelled before step");
                    state.put(keys::CANCELLED, true);
                    status = RunStatus::Cancelled;
                    break;
                }
            }

            debug!(step = step.name(), "Running step");
            executed.push(step);

            match self.run_step(step.as_ref(), state).await {
                Ok(StepAction::Continue) => {}
                Ok(StepAction::Halt) => {
                    if !state.contains(keys::ERROR) {
                        state.put(
                            keys::ERROR,
                            StepError::new(format!("step '{}' halted the build", step.name())),
                        );
                    }
                    halted_at = Some(step.name().to_string());
                    status = RunStatus::Halted;
                    break;
                }
                Err(err) => {
                    state.ui().error(&err.message);
                    state.put(keys::ERROR, err);
                    halted_at = Some(step.name().to_string());
                    status = RunStatus::Halted;
                    break;
                }
            }
        }

        if status == RunStatus::Halted {
            state.put(keys::HALTED, true);
            warn!(step = halted_at.as_deref().unwrap_or_default(), "Build halted");
        }

        let mut cleaned_up = Vec::with_capacity(executed.len());
        let mut cleanup_failures = Vec::new();
        for step in executed.iter().rev().copied() {
            if let Err(error) = self.cleanup_step(step.as_ref(), state).await {
                warn!(step = step.name(), error = %error, "Cleanup failed");
                cleanup_failures.push(CleanupFailure {
                    step: step.name().to_string(),
                    error,
                });
            }
            cleaned_up.push(step.name().to_string());
        }

        RunOutcome {
            status,
            executed: executed.iter().map(|s| s.name().to_string()).collect(),
            cleaned_up,
            halted_at,
            error: state.get_opt(keys::ERROR).cloned(),
            cleanup_failures,
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
        }
    }

    async fn run_step(&self, step: &dyn Step, state: &mut StateBag) -> Result<StepAction, StepError> {
        match self.step_timeout {
            Some(limit) => tokio::time::timeout(limit, step.run(state))
                .await
                .unwrap_or_else(|_| {
                    Err(StepError::new(format!(
                        "step '{}' timed out after {}ms",
                        step.name(),
                        limit.as_millis()
                    )))
                }),
            None => step.run(state).await,
        }
    }

    async fn cleanup_step(&self, step: &dyn Step, state: &mut StateBag) -> Result<(), String> {
        let guarded = AssertUnwindSafe(step.cleanup(state)).catch_unwind();
        let result = match self.cleanup_timeout {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(result) => result,
                Err(_) => return Err(format!("cleanup timed out after {}ms", limit.as_millis())),
            },
            None => guarded.await,
        };

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err.message),
            Err(panic) => Err(format!("cleanup panicked: {}", panic_message(panic.as_ref()))),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateKey;
    use crate::testing::{RecordingStep, StepLog};
    use crate::ui::{RecordingUi, Ui};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const TRAIL: StateKey<Vec<String>> = StateKey::new("trail");

    fn recording(name: &str, log: &StepLog, action: StepAction) -> Arc<dyn Step> {
        Arc::new(RecordingStep::new(name, log.clone()).with_action(action))
    }

    #[tokio::test]
    async fn test_empty_runner_succeeds() {
        let mut state = StateBag::new();
        let outcome = StepRunner::new(Vec::new()).run(&mut state).await;
        assert!(outcome.is_success());
        assert!(outcome.executed.is_empty());
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_all_continue_cleans_up_in_reverse() {
        let log = StepLog::default();
        let runner = StepRunner::new(vec![
            recording("a", &log, StepAction::Continue),
            recording("b", &log, StepAction::Continue),
            recording("c", &log, StepAction::Continue),
        ]);

        let mut state = StateBag::new();
        let outcome = runner.run(&mut state).await;

        assert_eq!(outcome.status, RunStatus::Succeeded);
        assert_eq!(
            log.entries(),
            vec!["run:a", "run:b", "run:c", "cleanup:c", "cleanup:b", "cleanup:a"]
        );
        assert!(!state.contains(keys::HALTED));
    }

    #[tokio::test]
    async fn test_halt_stops_and_cleans_up_executed_steps() {
        let log = StepLog::default();
        let runner = StepRunner::new(vec![
            recording("a", &log, StepAction::Continue),
            recording("b", &log, StepAction::Halt),
            recording("c", &log, StepAction::Continue),
        ]);

        let mut state = StateBag::new();
        let outcome = runner.run(&mut state).await;

        assert_eq!(outcome.status, RunStatus::Halted);
        assert_eq!(outcome.halted_at.as_deref(), Some("b"));
        assert_eq!(outcome.executed, vec!["a", "b"]);
        assert_eq!(outcome.cleaned_up, vec!["b", "a"]);
        assert_eq!(log.entries(), vec!["run:a", "run:b", "cleanup:b", "cleanup:a"]);
        assert_eq!(state.get(keys::HALTED), Ok(&true));
        assert_eq!(
            outcome.error.map(|e| e.message),
            Some("step 'b' halted the build".to_string())
        );
    }

    #[tokio::test]
    async fn test_run_error_becomes_halt_in_error_slot() {
        let log = StepLog::default();
        let ui = Arc::new(RecordingUi::new());
        let runner = StepRunner::new(vec![
            recording("a", &log, StepAction::Continue),
            Arc::new(
                RecordingStep::new("tag", log.clone())
                    .with_error("Error adding tags to resources [ami-1]"),
            ),
            recording("never", &log, StepAction::Continue),
        ]);

        let mut state = StateBag::new();
        state.put(keys::UI, ui.clone() as Arc<dyn Ui>);
        let outcome = runner.run(&mut state).await;

        assert_eq!(outcome.status, RunStatus::Halted);
        assert_eq!(
            state.get(keys::ERROR).map(|e| e.message.clone()),
            Ok("Error adding tags to resources [ami-1]".to_string())
        );
        assert_eq!(ui.errors(), vec!["Error adding tags to resources [ami-1]".to_string()]);
        assert!(!log.entries().contains(&"run:never".to_string()));
    }

    #[tokio::test]
    async fn test_cleanup_failures_do_not_block_earlier_cleanups() {
        let log = StepLog::default();
        let runner = StepRunner::new(vec![
            recording("a", &log, StepAction::Continue),
            Arc::new(RecordingStep::new("b", log.clone()).with_cleanup_error("delete failed")),
            Arc::new(RecordingStep::new("c", log.clone()).with_action(StepAction::Halt)),
        ]);

        let mut state = StateBag::new();
        let outcome = runner.run(&mut state).await;

        assert_eq!(outcome.cleaned_up, vec!["c", "b", "a"]);
        assert_eq!(
            outcome.cleanup_failures,
            vec![CleanupFailure {
                step: "b".to_string(),
                error: "delete failed".to_string()
            }]
        );
        assert_eq!(outcome.status, RunStatus::Halted);
    }

    #[derive(Debug)]
    struct PanickingCleanup;

    #[async_trait]
    impl Step for PanickingCleanup {
        fn name(&self) -> &str {
            "panics"
        }

        async fn run(&self, _state: &mut StateBag) -> Result<StepAction, StepError> {
            Ok(StepAction::Continue)
        }

        async fn cleanup(&self, _state: &mut StateBag) -> Result<(), StepError> {
            panic!("deregister ami-1 failed")
        }
    }

    #[tokio::test]
    async fn test_cleanup_panic_is_contained() {
        let log = StepLog::default();
        let runner = StepRunner::new(vec![
            recording("a", &log, StepAction::Continue),
            Arc::new(PanickingCleanup),
        ]);

        let mut state = StateBag::new();
        let outcome = runner.run(&mut state).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.cleanup_failures.len(), 1);
        assert_eq!(
            outcome.cleanup_failures[0].error,
            "cleanup panicked: deregister ami-1 failed"
        );
        assert_eq!(log.entries(), vec!["run:a", "cleanup:a"]);
    }

    #[test]
    fn test_panic_message_payloads() {
        let owned: Box<dyn Any + Send> = Box::new(format!("snapshot {} busy", "snap-1"));
        let opaque: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(owned.as_ref()), "snapshot snap-1 busy");
        assert_eq!(panic_message(opaque.as_ref()), "unknown panic");
    }

    #[derive(Debug)]
    struct HangingCleanup;

    #[async_trait]
    impl Step for HangingCleanup {
        fn name(&self) -> &str {
            "hang"
        }

        async fn run(&self, _state: &mut StateBag) -> Result<StepAction, StepError> {
            Ok(StepAction::Continue)
        }

        async fn cleanup(&self, _state: &mut StateBag) -> Result<(), StepError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_timeout_is_recorded_and_earlier_cleanups_run() {
        let log = StepLog::default();
        let runner = StepRunner::new(vec![
            recording("a", &log, StepAction::Continue),
            Arc::new(HangingCleanup),
        ])
        .with_cleanup_timeout(Duration::from_secs(1));

        let mut state = StateBag::new();
        let outcome = runner.run(&mut state).await;

        assert!(outcome.is_success());
        assert_eq!(
            outcome.cleanup_failures,
            vec![CleanupFailure {
                step: "hang".to_string(),
                error: "cleanup timed out after 1000ms".to_string()
            }]
        );
        assert_eq!(outcome.cleaned_up, vec!["hang", "a"]);
        assert_eq!(log.entries(), vec!["run:a", "cleanup:a"]);
    }

    #[tokio::test]
    async fn test_state_visible_to_later_steps_and_cleanups() {
        let first = crate::pipeline::FnStep::new("first", |state| {
            state.put(TRAIL, vec!["first".to_string()]);
            Ok(StepAction::Continue)
        });
        let second = crate::pipeline::FnStep::new("second", |state| {
            state.get_mut(TRAIL)?.push("second".to_string());
            Ok(StepAction::Continue)
        })
        .with_cleanup(|state| {
            let trail = state.get(TRAIL)?;
            if trail.len() == 2 {
                Ok(())
            } else {
                Err(StepError::new("trail incomplete"))
            }
        });

        let mut state = StateBag::new();
        let outcome = StepRunner::new(vec![Arc::new(first), Arc::new(second)])
            .run(&mut state)
            .await;

        assert!(outcome.is_success());
        assert!(outcome.cleanup_failures.is_empty());
        assert_eq!(state.get(TRAIL).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_state_key_halts_loudly() {
        let reader = crate::pipeline::FnStep::new("reader", |state| {
            state.get(keys::ARTIFACT_IMAGES)?;
            Ok(StepAction::Continue)
        });

        let mut state = StateBag::new();
        let outcome = StepRunner::new(vec![Arc::new(reader)]).run(&mut state).await;

        assert_eq!(outcome.status, RunStatus::Halted);
        assert!(outcome
            .error
            .unwrap()
            .message
            .contains("artifact-images"));
    }

    #[tokio::test]
    async fn test_cancellation_between_steps() {
        let log = StepLog::default();
        let token = Arc::new(CancellationToken::new());
        let cancel_in_step = {
            let token = token.clone();
            let log = log.clone();
            crate::pipeline::FnStep::new("cancels", move |_| {
                log.push("run:cancels");
                token.cancel("user interrupt");
                Ok(StepAction::Continue)
            })
        };

        let runner = StepRunner::new(vec![
            recording("a", &log, StepAction::Continue),
            Arc::new(cancel_in_step),
            recording("never", &log, StepAction::Continue),
        ])
        .with_cancellation(token);

        let mut state = StateBag::new();
        let outcome = runner.run(&mut state).await;

        assert_eq!(outcome.status, RunStatus::Cancelled);
        assert_eq!(state.get(keys::CANCELLED), Ok(&true));
        assert_eq!(outcome.executed, vec!["a", "cancels"]);
        assert_eq!(log.entries(), vec!["run:a", "run:cancels", "cleanup:a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_timeout_halts() {
        let log = StepLog::default();
        let runner = StepRunner::new(vec![Arc::new(
            RecordingStep::new("slow", log.clone()).with_delay(Duration::from_secs(60)),
        )])
        .with_step_timeout(Duration::from_secs(1));

        let mut state = StateBag::new();
        let outcome = runner.run(&mut state).await;

        assert_eq!(outcome.status, RunStatus::Halted);
        assert!(outcome.error.unwrap().message.contains("timed out"));
        assert_eq!(log.entries(), vec!["cleanup:slow"]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_halt_cleans_up_prefix_in_reverse(len in 1usize..10, halt_seed in 0usize..10) {
            let halt_at = halt_seed % len;
            let log = StepLog::default();
            let names: Vec<String> = (0..len).map(|i| format!("s{i}")).collect();
            let steps: Vec<Arc<dyn Step>> = names
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    let action = if i == halt_at { StepAction::Halt } else { StepAction::Continue };
                    recording(name, &log, action)
                })
                .collect();

            let mut state = StateBag::new();
            let outcome = tokio_test::block_on(StepRunner::new(steps).run(&mut state));

            let expected_runs: Vec<String> = names[..=halt_at].to_vec();
            let expected_cleanups: Vec<String> = names[..=halt_at].iter().rev().cloned().collect();
            prop_assert_eq!(outcome.executed, expected_runs);
            prop_assert_eq!(outcome.cleaned_up, expected_cleanups);
            prop_assert_eq!(outcome.status, RunStatus::Halted);
            for name in &names[halt_at + 1..] {
                let run_entry = format!("run:{name}");
                prop_assert!(!log.entries().contains(&run_entry));
            }
        }
    }
}
