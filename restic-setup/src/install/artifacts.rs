//! Writes the generated files to their fixed locations.

use crate::generator::GeneratedArtifacts;
use crate::paths::Layout;
use crate::utils::errors::{Result, SetupError};
use std::fs::{self, OpenOptions, Permissions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;
use tracing::info;

const PASSWORD_FILE_MODE: u32 = 0o600;
const RUNNER_MODE: u32 = 0o755;

/// Write password file, exclude file and runner script, overwriting in
/// place and reapplying permissions every time.
pub fn materialize(layout: &Layout, artifacts: &GeneratedArtifacts) -> Result<()> {
    info!("Setting up directories and configuration files...");
    for dir in [&layout.restic_dir, &layout.bin_dir] {
        fs::create_dir_all(dir).map_err(|e| artifact_error(dir, e))?;
    }

    write_password_file(&layout.password_file(), &artifacts.password_file_content)?;

    let exclude_file = layout.exclude_file();
    fs::write(&exclude_file, &artifacts.exclude_file_content)
        .map_err(|e| artifact_error(&exclude_file, e))?;

    let runner = layout.runner_script();
    fs::write(&runner, &artifacts.runner_script).map_err(|e| artifact_error(&runner, e))?;
    fs::set_permissions(&runner, Permissions::from_mode(RUNNER_MODE))
        .map_err(|e| artifact_error(&runner, e))?;
    info!("Backup script written to {}", runner.display());

    Ok(())
}

/// Owner read/write only. The mode is forced even on an existing file and
/// checked after writing.
fn write_password_file(path: &Path, content: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(PASSWORD_FILE_MODE)
        .open(path)
        .map_err(|e| artifact_error(path, e))?;
    file.set_permissions(Permissions::from_mode(PASSWORD_FILE_MODE))
        .map_err(|e| artifact_error(path, e))?;
    file.write_all(content.as_bytes())
        .map_err(|e| artifact_error(path, e))?;

    verify_private(path)
}

fn verify_private(path: &Path) -> Result<()> {
    let mode = fs::metadata(path)
        .map_err(|e| artifact_error(path, e))?
        .permissions()
        .mode();

    if mode & 0o077 != 0 {
        return Err(SetupError::Artifact {
            path: path.to_path_buf(),
            message: format!("expected mode 600, found {:o}", mode & 0o777),
        });
    }
    Ok(())
}

fn artifact_error(path: &Path, e: std::io::Error) -> SetupError {
    SetupError::Artifact {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn artifacts() -> GeneratedArtifacts {
        GeneratedArtifacts {
            runner_script: "#!/bin/bash\nexit 0\n".into(),
            password_file_content: "s3cret".into(),
            exclude_file_content: "*.tmp\nnode_modules".into(),
        }
    }

    fn mode(path: &Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[test]
    fn test_materialize_writes_all_files() {
        let temp_dir = TempDir::new().unwrap();
        let layout = Layout::for_home(temp_dir.path());

        materialize(&layout, &artifacts()).unwrap();

        assert_eq!(fs::read_to_string(layout.password_file()).unwrap(), "s3cret");
        assert_eq!(
            fs::read_to_string(layout.exclude_file()).unwrap(),
            "*.tmp\nnode_modules"
        );
        assert_eq!(
            fs::read_to_string(layout.runner_script()).unwrap(),
            "#!/bin/bash\nexit 0\n"
        );
        assert_eq!(mode(&layout.password_file()), 0o600);
        assert_eq!(mode(&layout.runner_script()), 0o755);
    }

    #[test]
    fn test_rerun_tightens_loosened_password_file() {
        let temp_dir = TempDir::new().unwrap();
        let layout = Layout::for_home(temp_dir.path());
        materialize(&layout, &artifacts()).unwrap();

        fs::set_permissions(layout.password_file(), Permissions::from_mode(0o644)).unwrap();
        let mut updated = artifacts();
        updated.password_file_content = "new".into();
        materialize(&layout, &updated).unwrap();

        assert_eq!(mode(&layout.password_file()), 0o600);
        assert_eq!(fs::read_to_string(layout.password_file()).unwrap(), "new");
    }

    #[test]
    fn test_verify_private_rejects_group_access() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("secret");
        fs::write(&path, "x").unwrap();
        fs::set_permissions(&path, Permissions::from_mode(0o640)).unwrap();

        assert!(matches!(
            verify_private(&path),
            Err(SetupError::Artifact { .. })
        ));
    }
}
