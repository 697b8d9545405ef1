//! Observability utilities.

mod behavior;
mod logging;

pub use behavior::LoggingBehavior;
pub use logging::{init_logging, LogFormat};
