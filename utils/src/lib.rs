//! Shared utilities for the Accord services.

pub mod logging;

pub use logging::{init_logging, LogFormat, LoggingError};
