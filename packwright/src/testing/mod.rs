//! Test doubles for steps, providers and datasources.

mod datasources;
mod mocks;

pub use datasources::{echo_registry, register_echo, EchoDatasource, EvalLog};
pub use mocks::{RecordingStep, ScriptedTagProvider, StepLog, TagCall};
