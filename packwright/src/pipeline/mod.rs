//! Build pipeline: steps, the sequential runner, retries and the build
//! orchestration that ties datasource resolution to a run.

mod build;
mod retry;
mod runner;
mod step;

pub use build::{Build, BuildReport};
pub use retry::{retry, AttemptOutcome, JitterStrategy, RetryError, RetryPolicy, RetryState};
pub use runner::{CleanupFailure, RunOutcome, RunStatus, StepRunner};
pub use step::{FnStep, Step, StepAction};
