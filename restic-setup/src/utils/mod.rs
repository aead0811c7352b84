//! Utility modules for restic-setup.

pub mod errors;
pub mod logger;

pub use errors::{ConfigError, Result, RunnerStepError, SetupError};
