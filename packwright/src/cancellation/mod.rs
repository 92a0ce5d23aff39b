//! Cooperative cancellation for builds.
//!
//! A `CancellationToken` is observed by the step runner between steps, by the
//! retrier between attempts and during backoff, and by the datasource
//! resolver between evaluations.

mod token;

pub use token::CancellationToken;
