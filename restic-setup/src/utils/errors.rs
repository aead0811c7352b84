//! Custom error types for the installer and the backup runner.

use std::path::PathBuf;
use thiserror::Error;

/// Failures while loading the configuration document. Always fatal, and
/// always raised before any artifact is written.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{} not found. Copy config.json.example to {} and set at least `repository` and `backup_password`.", .path.display(), .path.display())]
    NotFound { path: PathBuf },

    #[error("Cannot read {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed configuration in {}: {message} (`repository` and `backup_password` are required, every other key has a default)", .path.display())]
    Malformed { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Installer failures. All of them abort the run.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Missing dependency: {0}")]
    Dependency(String),

    #[error("Failed to install restic: {0}")]
    Install(String),

    #[error("Failed to write {}: {message}", .path.display())]
    Artifact { path: PathBuf, message: String },

    #[error("Failed to update crontab: {0}")]
    Schedule(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single failed step inside the backup runner. Whether it matters is
/// decided by the runner, not here.
#[derive(Error, Debug)]
pub enum RunnerStepError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("restic {operation} exited with {status}")]
    Exit { operation: &'static str, status: String },

    #[error("Healthcheck ping to {url} failed: {message}")]
    Ping { url: String, message: String },
}

pub type Result<T> = std::result::Result<T, SetupError>;
