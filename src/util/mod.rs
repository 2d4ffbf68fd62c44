//! Utility modules for kiln
//!
//! - Structured logging setup and configuration

pub mod logging;

pub use logging::{init_default, init_from_env, parse_level, LoggingConfig};
