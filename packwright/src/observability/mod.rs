//! Observability utilities.

mod logging;
mod spans;

pub use logging::{init_logging, LogFormat};
pub use spans::BuildSpanAttributes;
