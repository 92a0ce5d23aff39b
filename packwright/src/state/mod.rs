//! Run-scoped state shared between steps.
//!
//! Keys are typed: a [`StateKey<T>`] can only store and return a `T`.

mod bag;
pub mod keys;

pub use bag::{StateBag, StateKey};
pub use keys::SourceImage;
