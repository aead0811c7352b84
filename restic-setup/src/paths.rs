//! Fixed on-disk layout used by the installer and the generated runner.

use crate::utils::errors::{Result, SetupError};
use std::path::PathBuf;

pub const RESTIC_BINARY: &str = "/usr/local/bin/restic";
pub const RUNNER_LOG_FILE: &str = "/tmp/restic-backup.log";
pub const RUNNER_NAME: &str = "restic-custom-backup";

const PASSWORD_FILE_NAME: &str = ".restic_passwd";
const EXCLUDE_FILE_NAME: &str = ".restic_exclude";

/// Per-user directory pair (`~/.restic`, `~/bin`) plus the system-wide
/// restic binary and the runner's log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub home: PathBuf,
    pub restic_dir: PathBuf,
    pub bin_dir: PathBuf,
    pub restic_binary: PathBuf,
    pub log_file: PathBuf,
}

impl Layout {
    pub fn for_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            restic_dir: home.join(".restic"),
            bin_dir: home.join("bin"),
            restic_binary: PathBuf::from(RESTIC_BINARY),
            log_file: PathBuf::from(RUNNER_LOG_FILE),
            home,
        }
    }

    /// Layout for the current user. `$HOME` wins over the passwd entry so the
    /// runner's paths agree with what the user's shell sees.
    pub fn discover() -> Result<Self> {
        if let Some(home) = std::env::var_os("HOME").filter(|h| !h.is_empty()) {
            return Ok(Self::for_home(home));
        }

        dirs::home_dir()
            .map(Self::for_home)
            .ok_or_else(|| SetupError::Dependency("could not determine home directory".into()))
    }

    pub fn password_file(&self) -> PathBuf {
        self.restic_dir.join(PASSWORD_FILE_NAME)
    }

    pub fn exclude_file(&self) -> PathBuf {
        self.restic_dir.join(EXCLUDE_FILE_NAME)
    }

    pub fn runner_script(&self) -> PathBuf {
        self.bin_dir.join(RUNNER_NAME)
    }

    pub fn bashrc(&self) -> PathBuf {
        self.home.join(".bashrc")
    }
}
