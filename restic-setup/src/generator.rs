//! Script generation: everything the installer writes, as in-memory content.

use crate::config::BackupConfiguration;
use crate::paths::Layout;
use crate::plan::{render, Plan};
use chrono::{DateTime, Utc};

/// Contents of the three files the installer materializes.
#[derive(Clone, PartialEq, Eq)]
pub struct GeneratedArtifacts {
    pub runner_script: String,
    /// Exactly the password, no trailing newline
    pub password_file_content: String,
    pub exclude_file_content: String,
}

impl std::fmt::Debug for GeneratedArtifacts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedArtifacts")
            .field("runner_script", &format_args!("<{} bytes>", self.runner_script.len()))
            .field("password_file_content", &"***")
            .field("exclude_file_content", &self.exclude_file_content)
            .finish()
    }
}

pub fn generate(config: &BackupConfiguration, hostname: &str, layout: &Layout) -> GeneratedArtifacts {
    generate_at(config, hostname, layout, Utc::now())
}

pub fn generate_at(
    config: &BackupConfiguration,
    hostname: &str,
    layout: &Layout,
    generated_at: DateTime<Utc>,
) -> GeneratedArtifacts {
    let plan = Plan::build(config, hostname, layout);

    GeneratedArtifacts {
        runner_script: render::render(&plan, generated_at),
        password_file_content: config.backup_password.expose().to_string(),
        exclude_file_content: config.exclude_paths.join("\n"),
    }
}

/// Hostname frozen into the runner. Read once, at generation time.
pub fn current_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}
