//! Backup runner plan.
//!
//! A `Plan` is the runner's state machine written down as data: four ordered
//! sections of steps (header, backups, retentions, footer) plus the settings
//! frozen at generation time. The same plan is rendered to a bash script by
//! [`render`] and executed in-process by [`crate::runner::Runner`].

pub mod render;

use crate::config::{BackupConfiguration, Source};
use crate::paths::Layout;
use std::path::PathBuf;

/// Snapshots kept per time bucket by `restic forget`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub hourly: u32,
    pub daily: u32,
    pub weekly: u32,
    pub monthly: u32,
}

impl RetentionPolicy {
    pub const DEFAULT: RetentionPolicy = RetentionPolicy {
        hourly: 2,
        daily: 6,
        weekly: 3,
        monthly: 1,
    };

    fn args(&self) -> Vec<Arg> {
        vec![
            Arg::lit("--keep-hourly"),
            Arg::lit(self.hourly.to_string()),
            Arg::lit("--keep-daily"),
            Arg::lit(self.daily.to_string()),
            Arg::lit("--keep-weekly"),
            Arg::lit(self.weekly.to_string()),
            Arg::lit("--keep-monthly"),
            Arg::lit(self.monthly.to_string()),
        ]
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Everything the runner needs besides the step list. Fixed when the plan is
/// built; the hostname in particular is never re-read at run time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerSettings {
    pub repository: String,
    pub hostname: String,
    pub restic_binary: PathBuf,
    pub password_file: PathBuf,
    pub exclude_file: PathBuf,
    pub log_file: PathBuf,
    pub healthcheck_url: Option<String>,
    pub retention: RetentionPolicy,
}

impl RunnerSettings {
    /// Concrete value of an argument for direct execution
    pub fn resolve(&self, arg: &Arg) -> String {
        match arg {
            Arg::Literal(value) => value.clone(),
            Arg::Host => self.hostname.clone(),
            Arg::ExcludeFile => self.exclude_file.to_string_lossy().into_owned(),
        }
    }

    pub fn ping_url(&self, ping: Ping) -> Option<String> {
        self.healthcheck_url.as_ref().map(|url| match ping {
            Ping::Start => format!("{}/start", url),
            Ping::Success => url.clone(),
        })
    }
}

/// One argument of a restic invocation. Settings are kept symbolic so the
/// rendered script can refer to its own variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Literal(String),
    Host,
    ExcludeFile,
}

impl Arg {
    fn lit(value: impl Into<String>) -> Self {
        Arg::Literal(value.into())
    }
}

/// restic operations the runner uses. Global flags (`-p`, `-r`) are added by
/// whoever executes the operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResticOp {
    CatConfig,
    Init,
    Unlock,
    Backup { tag: String, path: PathBuf },
    Stats { tag: String },
    Forget { tag: String, policy: RetentionPolicy },
}

impl ResticOp {
    pub fn name(&self) -> &'static str {
        match self {
            ResticOp::CatConfig => "cat config",
            ResticOp::Init => "init",
            ResticOp::Unlock => "unlock",
            ResticOp::Backup { .. } => "backup",
            ResticOp::Stats { .. } => "stats",
            ResticOp::Forget { .. } => "forget",
        }
    }

    pub fn args(&self) -> Vec<Arg> {
        match self {
            ResticOp::CatConfig => vec![Arg::lit("cat"), Arg::lit("config")],
            ResticOp::Init => vec![Arg::lit("init")],
            ResticOp::Unlock => vec![Arg::lit("unlock")],
            ResticOp::Backup { tag, path } => vec![
                Arg::lit("backup"),
                Arg::lit("--host"),
                Arg::Host,
                Arg::lit("--tag"),
                Arg::lit(tag.clone()),
                Arg::lit("--exclude-caches"),
                Arg::lit("--exclude-file"),
                Arg::ExcludeFile,
                Arg::lit(path.to_string_lossy()),
            ],
            ResticOp::Stats { tag } => vec![
                Arg::lit("stats"),
                Arg::lit("--host"),
                Arg::Host,
                Arg::lit("--tag"),
                Arg::lit(tag.clone()),
            ],
            ResticOp::Forget { tag, policy } => {
                let mut args = vec![
                    Arg::lit("forget"),
                    Arg::lit("--host"),
                    Arg::Host,
                    Arg::lit("--tag"),
                    Arg::lit(tag.clone()),
                    Arg::lit("--group-by"),
                    Arg::lit("host,tags"),
                ];
                args.extend(policy.args());
                args.push(Arg::lit("--cleanup-cache"));
                args
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Started,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ping {
    Start,
    /// Only sent when every backup succeeded
    Success,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Marker(Marker),
    Ping(Ping),
    /// `cat config`, then `init` once if that fails
    EnsureRepository,
    /// `unlock`, best effort
    ClearStaleLocks,
    /// `backup`, then `stats` on success. Failure is tracked.
    Backup(Source),
    /// `forget` with the retention policy, best effort
    Retain(Source),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub settings: RunnerSettings,
    pub header: Vec<Step>,
    pub backups: Vec<Step>,
    pub retentions: Vec<Step>,
    pub footer: Vec<Step>,
}

impl Plan {
    pub fn build(config: &BackupConfiguration, hostname: &str, layout: &Layout) -> Self {
        let settings = RunnerSettings {
            repository: config.repository.clone(),
            hostname: hostname.to_string(),
            restic_binary: layout.restic_binary.clone(),
            password_file: layout.password_file(),
            exclude_file: layout.exclude_file(),
            log_file: layout.log_file.clone(),
            healthcheck_url: config.healthcheck_url.clone(),
            retention: RetentionPolicy::DEFAULT,
        };
        let pings = settings.healthcheck_url.is_some();

        let mut header = vec![Step::Marker(Marker::Started)];
        if pings {
            header.push(Step::Ping(Ping::Start));
        }
        header.push(Step::EnsureRepository);
        header.push(Step::ClearStaleLocks);

        let backups = config.source_paths.iter().cloned().map(Step::Backup).collect();
        let retentions = config.source_paths.iter().cloned().map(Step::Retain).collect();

        let mut footer = Vec::new();
        if pings {
            footer.push(Step::Ping(Ping::Success));
        }
        footer.push(Step::Marker(Marker::Finished));

        Plan {
            settings,
            header,
            backups,
            retentions,
            footer,
        }
    }

    /// All steps in execution order
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.header
            .iter()
            .chain(&self.backups)
            .chain(&self.retentions)
            .chain(&self.footer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFormat;

    fn config(json: &str) -> BackupConfiguration {
        BackupConfiguration::parse(json, ConfigFormat::Json).unwrap()
    }

    #[test]
    fn test_plan_sections_follow_source_order() {
        let config = config(
            r#"{"repository": "/srv/repo", "backup_password": "x",
                "source_paths": {"docs": "/home/u/docs", "mail": "/var/mail"}}"#,
        );
        let plan = Plan::build(&config, "box", &Layout::for_home("/home/u"));

        let backup_tags: Vec<&str> = plan
            .backups
            .iter()
            .map(|s| match s {
                Step::Backup(src) => src.name.as_str(),
                other => panic!("unexpected step {:?}", other),
            })
            .collect();
        assert_eq!(backup_tags, vec!["docs", "mail"]);
        assert_eq!(plan.retentions.len(), 2);
        assert!(matches!(&plan.retentions[0], Step::Retain(src) if src.name == "docs"));

        // Every backup comes before every retention
        let steps: Vec<&Step> = plan.steps().collect();
        let last_backup = steps.iter().rposition(|s| matches!(s, Step::Backup(_))).unwrap();
        let first_retain = steps.iter().position(|s| matches!(s, Step::Retain(_))).unwrap();
        assert!(last_backup < first_retain);
    }

    #[test]
    fn test_plan_without_healthcheck_has_no_pings() {
        let config = config(r#"{"repository": "r", "backup_password": "x"}"#);
        let plan = Plan::build(&config, "box", &Layout::for_home("/home/u"));

        assert_eq!(
            plan.header,
            vec![
                Step::Marker(Marker::Started),
                Step::EnsureRepository,
                Step::ClearStaleLocks
            ]
        );
        assert!(plan.backups.is_empty());
        assert!(plan.retentions.is_empty());
        assert_eq!(plan.footer, vec![Step::Marker(Marker::Finished)]);
    }

    #[test]
    fn test_plan_with_healthcheck_pings_start_and_success() {
        let config = config(
            r#"{"repository": "r", "backup_password": "x", "healthcheck_url": "https://hc.example/id"}"#,
        );
        let plan = Plan::build(&config, "box", &Layout::for_home("/home/u"));

        assert_eq!(plan.header[1], Step::Ping(Ping::Start));
        assert_eq!(plan.footer[0], Step::Ping(Ping::Success));
        assert_eq!(
            plan.settings.ping_url(Ping::Start).as_deref(),
            Some("https://hc.example/id/start")
        );
        assert_eq!(
            plan.settings.ping_url(Ping::Success).as_deref(),
            Some("https://hc.example/id")
        );
    }

    #[test]
    fn test_forget_args_carry_policy() {
        let op = ResticOp::Forget {
            tag: "docs".into(),
            policy: RetentionPolicy::DEFAULT,
        };
        let settings = RunnerSettings {
            repository: "r".into(),
            hostname: "box".into(),
            restic_binary: PathBuf::from("/usr/local/bin/restic"),
            password_file: PathBuf::from("/p"),
            exclude_file: PathBuf::from("/e"),
            log_file: PathBuf::from("/l"),
            healthcheck_url: None,
            retention: RetentionPolicy::DEFAULT,
        };
        let args: Vec<String> = op.args().iter().map(|a| settings.resolve(a)).collect();

        assert_eq!(
            args.join(" "),
            "forget --host box --tag docs --group-by host,tags \
             --keep-hourly 2 --keep-daily 6 --keep-weekly 3 --keep-monthly 1 --cleanup-cache"
        );
    }
}
