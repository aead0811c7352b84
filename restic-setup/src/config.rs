//! Configuration loading for restic-setup.
//!
//! The configuration document is JSON (`config.json`) or, when the file has a
//! `.toml` extension, TOML with the same keys.

use crate::utils::errors::ConfigError;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Placeholder shipped in `config.json.example`.
pub const PASSWORD_PLACEHOLDER: &str = "CHANGE_ME";

pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Loaded once per invocation and never mutated afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct BackupConfiguration {
    /// Repository location understood by restic (local path or remote URI)
    pub repository: String,

    #[serde(default)]
    pub backup_password: Password,

    /// Service name to path, in document order
    #[serde(default, deserialize_with = "deserialize_sources")]
    pub source_paths: Vec<Source>,

    /// Patterns written verbatim to the exclude file
    #[serde(default)]
    pub exclude_paths: Vec<String>,

    #[serde(default, deserialize_with = "deserialize_healthcheck_url")]
    pub healthcheck_url: Option<String>,

    /// 5-field cron expression
    #[serde(default = "default_cron_schedule")]
    pub cron_schedule: String,

    /// restic release to install when the binary is missing
    #[serde(default = "default_restic_version")]
    pub restic_version: String,
}

/// One configured backup source. The name doubles as the snapshot tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub name: String,
    pub path: PathBuf,
}

/// Repository password. Its `Debug` output is redacted so it can't leak
/// through a log line.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Password(String);

impl Password {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Json,
        }
    }
}

// Default values
fn default_cron_schedule() -> String {
    "0 12 * * *".to_string()
}

fn default_restic_version() -> String {
    "0.18.1".to_string()
}

/// Load and validate the configuration at `path`.
pub fn load(path: &Path) -> Result<BackupConfiguration, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            })
        }
        Err(source) => {
            return Err(ConfigError::Unreadable {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let config = BackupConfiguration::parse(&content, ConfigFormat::from_path(path)).map_err(
        |message| ConfigError::Malformed {
            path: path.to_path_buf(),
            message,
        },
    )?;
    config.validate()?;

    tracing::debug!(
        path = %path.display(),
        sources = config.source_paths.len(),
        "Loaded configuration"
    );

    Ok(config)
}

impl BackupConfiguration {
    /// Parse without validating. The error is the parser's message.
    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self, String> {
        match format {
            ConfigFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
            ConfigFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let password = self.backup_password.expose();
        if password.is_empty() {
            return Err(ConfigError::Invalid("backup_password must be set".into()));
        }
        if password == PASSWORD_PLACEHOLDER {
            return Err(ConfigError::Invalid(format!(
                "backup_password is still the placeholder \"{}\"",
                PASSWORD_PLACEHOLDER
            )));
        }
        Ok(())
    }
}

fn deserialize_sources<'de, D>(deserializer: D) -> Result<Vec<Source>, D::Error>
where
    D: Deserializer<'de>,
{
    struct SourcesVisitor;

    impl<'de> Visitor<'de> for SourcesVisitor {
        type Value = Vec<Source>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of service names to paths")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut sources: Vec<Source> = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((name, path)) = map.next_entry::<String, PathBuf>()? {
                if sources.iter().any(|s| s.name == name) {
                    return Err(de::Error::custom(format!(
                        "duplicate source name `{}`",
                        name
                    )));
                }
                sources.push(Source { name, path });
            }
            Ok(sources)
        }
    }

    deserializer.deserialize_map(SourcesVisitor)
}

fn deserialize_healthcheck_url<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let url = Option::<String>::deserialize(deserializer)?;
    Ok(url
        .map(|u| u.trim().trim_end_matches('/').to_string())
        .filter(|u| !u.is_empty()))
}
