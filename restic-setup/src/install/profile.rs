//! `~/bin` on the user's PATH via `~/.bashrc`.

use crate::utils::errors::{Result, SetupError};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::info;

pub const PATH_EXPORT_LINE: &str = "export PATH=$PATH:$HOME/bin";

/// Any mention of this means the user already manages `~/bin` themselves
const PATH_MARKER: &str = "$HOME/bin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileChange {
    Added,
    AlreadyPresent,
    /// No `.bashrc` to edit; left alone
    NoProfile,
}

pub fn ensure_path_entry(bashrc: &Path) -> Result<ProfileChange> {
    if !bashrc.exists() {
        return Ok(ProfileChange::NoProfile);
    }

    let content = fs::read_to_string(bashrc).map_err(|e| profile_error(bashrc, e))?;
    if content.contains(PATH_EXPORT_LINE) || content.contains(PATH_MARKER) {
        return Ok(ProfileChange::AlreadyPresent);
    }

    info!("Adding ~/bin to PATH in {}", bashrc.display());
    let mut file = OpenOptions::new()
        .append(true)
        .open(bashrc)
        .map_err(|e| profile_error(bashrc, e))?;

    // Keep the previous last line intact
    let separator = if content.is_empty() || content.ends_with('\n') { "" } else { "\n" };
    writeln!(file, "{}{}", separator, PATH_EXPORT_LINE).map_err(|e| profile_error(bashrc, e))?;

    Ok(ProfileChange::Added)
}

fn profile_error(path: &Path, e: std::io::Error) -> SetupError {
    SetupError::Artifact {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}
