//! Installer: makes the host match the configuration.
//!
//! Every step is an "ensure" so re-running only rewrites the generated files
//! and skips whatever is already in place.

pub mod artifacts;
pub mod binary;
pub mod profile;
pub mod schedule;

use crate::config::BackupConfiguration;
use crate::generator;
use crate::paths::Layout;
use crate::utils::errors::{Result, SetupError};
use schedule::SystemCrontab;
use tracing::info;

/// External tools the installer or the generated runner will call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requirements {
    pub crontab: bool,
    pub sudo: bool,
    pub curl: bool,
}

impl Requirements {
    pub fn for_host(config: &BackupConfiguration, layout: &Layout) -> Self {
        Self {
            crontab: true,
            sudo: binary::installed_path(layout).is_none() && !nix::unistd::Uid::effective().is_root(),
            curl: config.healthcheck_url.is_some(),
        }
    }

    /// Required tools for which `available` returns false
    pub fn missing(&self, available: impl Fn(&str) -> bool) -> Vec<&'static str> {
        [("crontab", self.crontab), ("sudo", self.sudo), ("curl", self.curl)]
            .into_iter()
            .filter(|(tool, needed)| *needed && !available(*tool))
            .map(|(tool, _)| tool)
            .collect()
    }
}

pub fn check_dependencies(config: &BackupConfiguration, layout: &Layout) -> Result<()> {
    let missing = Requirements::for_host(config, layout).missing(|tool| which::which(tool).is_ok());
    if missing.is_empty() {
        return Ok(());
    }
    Err(SetupError::Dependency(format!(
        "{} not found on PATH",
        missing.join(", ")
    )))
}

/// Full installer run. Stops at the first error.
pub async fn install(config: &BackupConfiguration, layout: &Layout) -> Result<()> {
    check_dependencies(config, layout)?;

    let restic = binary::ensure_restic(&config.restic_version, layout).await?;
    // The runner calls whichever restic is actually there
    let layout = &Layout {
        restic_binary: restic.path().to_path_buf(),
        ..layout.clone()
    };

    info!("Generating backup script...");
    let hostname = generator::current_hostname();
    let artifacts = generator::generate(config, &hostname, layout);
    artifacts::materialize(layout, &artifacts)?;

    match profile::ensure_path_entry(&layout.bashrc())? {
        profile::ProfileChange::Added => {}
        profile::ProfileChange::AlreadyPresent => info!("~/bin is already on PATH"),
        profile::ProfileChange::NoProfile => {
            info!("No {} found, not touching PATH", layout.bashrc().display())
        }
    }

    schedule::ensure_cron_entry(&SystemCrontab, &config.cron_schedule, &layout.runner_script())
        .await?;

    info!("Setup complete!");
    Ok(())
}
