//! restic binary installation.
//!
//! Downloads the official `.bz2` release, unpacks it and places it at
//! `/usr/local/bin/restic`, through sudo when not running as root.

use crate::paths::Layout;
use crate::utils::errors::{Result, SetupError};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::info;

const RELEASE_BASE_URL: &str = "https://github.com/restic/restic/releases/download";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinaryStatus {
    AlreadyInstalled(PathBuf),
    Installed(PathBuf),
}

impl BinaryStatus {
    /// The restic binary the runner should call
    pub fn path(&self) -> &Path {
        match self {
            BinaryStatus::AlreadyInstalled(path) | BinaryStatus::Installed(path) => path,
        }
    }
}

/// restic's name for the build target's architecture
pub fn release_arch() -> Option<&'static str> {
    match std::env::consts::ARCH {
        "x86_64" => Some("amd64"),
        "aarch64" => Some("arm64"),
        "x86" => Some("386"),
        "arm" => Some("arm"),
        _ => None,
    }
}

pub fn release_url(version: &str, arch: &str) -> String {
    format!(
        "{}/v{}/restic_{}_linux_{}.bz2",
        RELEASE_BASE_URL, version, version, arch
    )
}

/// An existing restic: the install location first, then `$PATH`.
pub fn installed_path(layout: &Layout) -> Option<PathBuf> {
    installed_path_in(layout, std::env::var_os("PATH"))
}

fn installed_path_in(layout: &Layout, search_path: Option<OsString>) -> Option<PathBuf> {
    if layout.restic_binary.exists() {
        return Some(layout.restic_binary.clone());
    }
    which::which_in("restic", search_path, &layout.home).ok()
}

/// Install restic `version` unless some restic is already available, and
/// return the binary to use either way.
pub async fn ensure_restic(version: &str, layout: &Layout) -> Result<BinaryStatus> {
    info!("Checking for restic...");
    if let Some(path) = installed_path(layout) {
        info!("restic is already installed at {}.", path.display());
        return Ok(BinaryStatus::AlreadyInstalled(path));
    }

    let arch = release_arch().ok_or_else(|| {
        SetupError::Install(format!(
            "no restic release for architecture {}",
            std::env::consts::ARCH
        ))
    })?;
    let url = release_url(version, arch);
    info!("Installing restic version {}...", version);

    let staging = staging_dir()?;
    let archive = staging.path().join("restic.bz2");
    let unpacked = staging.path().join("restic");

    info!("Downloading {}...", url);
    download(&url, &archive).await?;

    info!("Extracting...");
    let (src, dest) = (archive.clone(), unpacked.clone());
    tokio::task::spawn_blocking(move || decompress(&src, &dest))
        .await
        .map_err(|e| SetupError::Install(format!("extraction task failed: {}", e)))?
        .map_err(|e| SetupError::Install(format!("failed to extract {}: {}", archive.display(), e)))?;
    make_executable(&unpacked)?;

    place(&unpacked, &layout.restic_binary).await?;
    info!("Installed restic to {}", layout.restic_binary.display());

    Ok(BinaryStatus::Installed(layout.restic_binary.clone()))
}

/// Private scratch directory: created exclusively with mode 0700 under a
/// random name, removed on drop.
fn staging_dir() -> Result<tempfile::TempDir> {
    Ok(tempfile::Builder::new().prefix("restic-setup-").tempdir()?)
}

async fn download(url: &str, dest: &Path) -> Result<()> {
    let client = reqwest::Client::new();
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| SetupError::Install(format!("download failed: {}", e)))?;

    if !response.status().is_success() {
        return Err(SetupError::Install(format!(
            "HTTP {}: {}",
            response.status(),
            url
        )));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| SetupError::Install(format!("download failed: {}", e)))?;
    std::fs::write(dest, &bytes)?;

    Ok(())
}

/// Unpack a bzip2 stream from `archive` into `dest`.
pub fn decompress(archive: &Path, dest: &Path) -> std::io::Result<u64> {
    let mut decoder = bzip2::read::BzDecoder::new(std::fs::File::open(archive)?);
    let mut out = std::fs::File::create(dest)?;
    std::io::copy(&mut decoder, &mut out)
}

fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

async fn place(binary: &Path, install_path: &Path) -> Result<()> {
    if nix::unistd::Uid::effective().is_root() {
        if let Err(e) = std::fs::rename(binary, install_path) {
            // rename fails across filesystems, fall back to copy
            std::fs::copy(binary, install_path).map_err(|e2| {
                SetupError::Install(format!(
                    "failed to install binary: {} (rename: {})",
                    e2, e
                ))
            })?;
        }
        return Ok(());
    }

    info!("Installing to {} (requires sudo)...", install_path.display());
    let from = binary.to_string_lossy();
    let to = install_path.to_string_lossy();
    sudo(&["mv", &*from, &*to]).await?;
    sudo(&["chown", "root:root", &*to]).await
}

async fn sudo(args: &[&str]) -> Result<()> {
    let status = Command::new("sudo")
        .args(args)
        .status()
        .await
        .map_err(|e| SetupError::Install(format!("failed to run sudo: {}", e)))?;

    if !status.success() {
        return Err(SetupError::Install(format!(
            "`sudo {}` exited with {}",
            args.join(" "),
            status
        )));
    }
    Ok(())
}
