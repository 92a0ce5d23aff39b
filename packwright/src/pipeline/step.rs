//! Step trait and helpers.
//!
//! A step is one unit of build work. It reads and writes the run's
//! [`StateBag`] and may undo its side effects in `cleanup`.

use crate::errors::StepError;
use crate::state::StateBag;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// What the runner should do after a step's `run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepAction {
    /// Go on with the next step.
    Continue,
    /// Stop and clean up.
    Halt,
}

/// Trait for pipeline steps.
///
/// An `Err` from `run` is treated by the runner exactly like a `Halt`, with
/// the error stored in the state's error slot.
#[async_trait]
pub trait Step: Send + Sync + Debug {
    /// Returns the name of the step.
    fn name(&self) -> &str;

    /// Executes the step.
    async fn run(&self, state: &mut StateBag) -> Result<StepAction, StepError>;

    /// Undoes what `run` did, if anything. Called once per executed step
    /// at the end of the run, in reverse order.
    async fn cleanup(&self, _state: &mut StateBag) -> Result<(), StepError> {
        Ok(())
    }
}

type RunFn = Box<dyn Fn(&mut StateBag) -> Result<StepAction, StepError> + Send + Sync>;
type CleanupFn = Box<dyn Fn(&mut StateBag) -> Result<(), StepError> + Send + Sync>;

/// A simple function-based step.
pub struct FnStep {
    name: String,
    run: RunFn,
    cleanup: Option<CleanupFn>,
}

impl FnStep {
    /// Creates a new function-based step.
    pub fn new<F>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(&mut StateBag) -> Result<StepAction, StepError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            run: Box::new(run),
            cleanup: None,
        }
    }

    /// Adds a cleanup function.
    #[must_use]
    pub fn with_cleanup<G>(mut self, cleanup: G) -> Self
    where
        G: Fn(&mut StateBag) -> Result<(), StepError> + Send + Sync + 'static,
    {
        self.cleanup = Some(Box::new(cleanup));
        self
    }
}

impl Debug for FnStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStep")
            .field("name", &self.name)
            .field("has_cleanup", &self.cleanup.is_some())
            .finish()
    }
}

#[async_trait]
impl Step for FnStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, state: &mut StateBag) -> Result<StepAction, StepError> {
        (self.run)(state)
    }

    async fn cleanup(&self, state: &mut StateBag) -> Result<(), StepError> {
        match self.cleanup {
            Some(ref cleanup) => cleanup(state),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateKey;

    const TOUCHED: StateKey<bool> = StateKey::new("touched");

    #[tokio::test]
    async fn test_fn_step_runs_and_cleans_up() {
        let step = FnStep::new("touch", |state| {
            state.put(TOUCHED, true);
            Ok(StepAction::Continue)
        })
        .with_cleanup(|state| {
            state.remove(TOUCHED);
            Ok(())
        });

        let mut state = StateBag::new();
        assert_eq!(step.name(), "touch");
        assert_eq!(step.run(&mut state).await, Ok(StepAction::Continue));
        assert!(state.contains(TOUCHED));

        step.cleanup(&mut state).await.unwrap();
        assert!(!state.contains(TOUCHED));
    }

    #[tokio::test]
    async fn test_default_cleanup_is_noop() {
        let step = FnStep::new("halt", |_| Ok(StepAction::Halt));
        let mut state = StateBag::new();
        assert_eq!(step.run(&mut state).await, Ok(StepAction::Halt));
        assert!(step.cleanup(&mut state).await.is_ok());
    }
}
