//! restic-setup library
//!
//! Installs restic, renders a config-driven backup runner and schedules it.

pub mod config;
pub mod generator;
pub mod install;
pub mod paths;
pub mod plan;
pub mod runner;
pub mod utils;

// Re-export commonly used types
pub use config::BackupConfiguration;
pub use utils::errors::SetupError;
pub type Result<T> = std::result::Result<T, SetupError>;
