//! In-process backup runner.
//!
//! Walks a [`Plan`] front to back, exactly like the rendered script does:
//! - unlock, retention and pings are best effort
//! - a failed backup is recorded and the run moves on to the next source
//! - the run fails if and only if a backup failed (or the repository could
//!   not be initialized, which ends the run early)

pub mod executor;

use crate::plan::{Marker, Ping, Plan, ResticOp, Step};
use executor::StepExecutor;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    /// `summary` is restic's backup output, `stats` the stats output
    Succeeded { summary: String, stats: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReport {
    pub name: String,
    pub backup: BackupOutcome,
    /// `None` until the retention step for this source has run
    pub retention_ok: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub repository_initialized: bool,
    /// Set when `init` failed and the run stopped before any backup
    pub aborted: bool,
    pub sources: Vec<SourceReport>,
}

impl RunReport {
    pub fn failed_backups(&self) -> usize {
        self.sources
            .iter()
            .filter(|s| matches!(s.backup, BackupOutcome::Failed { .. }))
            .count()
    }

    pub fn succeeded(&self) -> bool {
        !self.aborted && self.failed_backups() == 0
    }

    /// 0 on success, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.succeeded() {
            0
        } else {
            1
        }
    }
}

pub struct Runner<E> {
    executor: E,
}

impl<E: StepExecutor> Runner<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub async fn run(&self, plan: &Plan) -> RunReport {
        let settings = &plan.settings;
        let mut report = RunReport::default();

        for step in plan.steps() {
            match step {
                Step::Marker(Marker::Started) => {
                    info!(
                        "=== Backup started: {} on {} ===",
                        chrono::Local::now().to_rfc2822(),
                        settings.hostname
                    );
                }
                Step::Marker(Marker::Finished) => {
                    info!("=== Backup finished: {} ===", chrono::Local::now().to_rfc2822());
                }
                Step::Ping(ping) => {
                    if *ping == Ping::Success && !report.succeeded() {
                        continue;
                    }
                    if let Some(url) = settings.ping_url(*ping) {
                        if let Err(e) = self.executor.ping(&url).await {
                            warn!("{}", e);
                        }
                    }
                }
                Step::EnsureRepository => {
                    if let Err(e) = self.executor.restic(settings, &ResticOp::CatConfig).await {
                        debug!(error = %e, "Repository config not readable");
                        info!("Initializing restic repository at {}", settings.repository);

                        if let Err(e) = self.executor.restic(settings, &ResticOp::Init).await {
                            error!("Repository initialization failed: {}", e);
                            report.aborted = true;
                            info!("=== Backup finished: {} ===", chrono::Local::now().to_rfc2822());
                            return report;
                        }
                        report.repository_initialized = true;
                    }
                }
                Step::ClearStaleLocks => {
                    if let Err(e) = self.executor.restic(settings, &ResticOp::Unlock).await {
                        warn!("Failed to clear stale locks: {}", e);
                    }
                }
                Step::Backup(source) => {
                    info!("Backing up {}: {}", source.name, source.path.display());

                    let backup = ResticOp::Backup {
                        tag: source.name.clone(),
                        path: source.path.clone(),
                    };
                    let outcome = match self.executor.restic(settings, &backup).await {
                        Ok(output) => {
                            let summary = output.stdout.trim().to_string();
                            if !summary.is_empty() {
                                info!("{}", summary);
                            }

                            let stats = ResticOp::Stats {
                                tag: source.name.clone(),
                            };
                            let stats = match self.executor.restic(settings, &stats).await {
                                Ok(output) => output.stdout.trim().to_string(),
                                Err(e) => {
                                    warn!("Failed to read stats for {}: {}", source.name, e);
                                    String::new()
                                }
                            };
                            info!("{} backup complete: {}", source.name, stats);
                            BackupOutcome::Succeeded { summary, stats }
                        }
                        Err(e) => {
                            error!("{} backup FAILED: {}", source.name, e);
                            BackupOutcome::Failed {
                                error: e.to_string(),
                            }
                        }
                    };

                    report.sources.push(SourceReport {
                        name: source.name.clone(),
                        backup: outcome,
                        retention_ok: None,
                    });
                }
                Step::Retain(source) => {
                    let forget = ResticOp::Forget {
                        tag: source.name.clone(),
                        policy: settings.retention,
                    };
                    let result = self.executor.restic(settings, &forget).await;
                    if let Err(e) = &result {
                        warn!("Retention for {} failed: {}", source.name, e);
                    }

                    if let Some(entry) = report.sources.iter_mut().find(|s| s.name == source.name) {
                        entry.retention_ok = Some(result.is_ok());
                    }
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::executor::StepOutput;
    use super::*;
    use crate::config::{BackupConfiguration, ConfigFormat};
    use crate::paths::Layout;
    use crate::plan::RunnerSettings;
    use crate::utils::errors::RunnerStepError;
    use std::sync::Mutex;

    /// Records every call as "op tag" (or "ping url") and fails the ones
    /// listed in `failing`.
    #[derive(Default)]
    struct ScriptedExecutor {
        calls: Mutex<Vec<String>>,
        failing: Vec<String>,
    }

    impl ScriptedExecutor {
        fn failing(calls: &[&str]) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                failing: calls.iter().map(|c| c.to_string()).collect(),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) -> bool {
            let fails = self.failing.contains(&call);
            self.calls.lock().unwrap().push(call);
            fails
        }
    }

    fn describe(op: &ResticOp) -> String {
        match op {
            ResticOp::Backup { tag, .. } | ResticOp::Stats { tag } | ResticOp::Forget { tag, .. } => {
                format!("{} {}", op.name(), tag)
            }
            _ => op.name().to_string(),
        }
    }

    impl StepExecutor for &ScriptedExecutor {
        async fn restic(
            &self,
            _settings: &RunnerSettings,
            op: &ResticOp,
        ) -> Result<StepOutput, RunnerStepError> {
            let call = describe(op);
            if self.record(call) {
                return Err(RunnerStepError::Exit {
                    operation: op.name(),
                    status: "exit status: 1".into(),
                });
            }
            Ok(StepOutput {
                stdout: format!("{} ok\n", describe(op)),
            })
        }

        async fn ping(&self, url: &str) -> Result<(), RunnerStepError> {
            let call = format!("ping {}", url);
            if self.record(call) {
                return Err(RunnerStepError::Ping {
                    url: url.to_string(),
                    message: "connection refused".into(),
                });
            }
            Ok(())
        }
    }

    fn plan(json: &str) -> Plan {
        let config = BackupConfiguration::parse(json, ConfigFormat::Json).unwrap();
        Plan::build(&config, "box", &Layout::for_home("/home/u"))
    }

    const TWO_SOURCES: &str = r#"{"repository": "r", "backup_password": "x",
        "source_paths": {"docs": "/home/u/docs", "mail": "/var/mail"},
        "healthcheck_url": "https://hc.example/id"}"#;

    #[tokio::test]
    async fn test_docs_scenario() {
        let executor = ScriptedExecutor::default();
        let report = Runner::new(&executor)
            .run(&plan(
                r#"{"repository": "r", "backup_password": "x",
                    "source_paths": {"docs": "/home/u/docs"}, "exclude_paths": ["*.tmp"]}"#,
            ))
            .await;

        assert_eq!(
            executor.calls(),
            vec!["cat config", "unlock", "backup docs", "stats docs", "forget docs"]
        );
        assert_eq!(report.exit_code(), 0);
        assert!(!report.repository_initialized);
        assert_eq!(
            report.sources[0].backup,
            BackupOutcome::Succeeded {
                summary: "backup docs ok".into(),
                stats: "stats docs ok".into()
            }
        );
        assert_eq!(report.sources[0].retention_ok, Some(true));
    }

    #[tokio::test]
    async fn test_first_backup_fails_second_succeeds() {
        let executor = ScriptedExecutor::failing(&["backup docs"]);
        let report = Runner::new(&executor).run(&plan(TWO_SOURCES)).await;

        assert_eq!(
            executor.calls(),
            vec![
                "ping https://hc.example/id/start",
                "cat config",
                "unlock",
                "backup docs",
                "backup mail",
                "stats mail",
                "forget docs",
                "forget mail",
            ]
        );
        assert_eq!(report.failed_backups(), 1);
        assert_eq!(
            report.sources[1].backup,
            BackupOutcome::Succeeded {
                summary: "backup mail ok".into(),
                stats: "stats mail ok".into()
            }
        );
        assert_eq!(report.exit_code(), 1);
        // No success ping after a failed backup
        assert!(!executor.calls().contains(&"ping https://hc.example/id".to_string()));
    }

    #[tokio::test]
    async fn test_best_effort_steps_do_not_fail_the_run() {
        let executor = ScriptedExecutor::failing(&[
            "ping https://hc.example/id/start",
            "unlock",
            "forget docs",
            "forget mail",
            "stats docs",
        ]);
        let report = Runner::new(&executor).run(&plan(TWO_SOURCES)).await;

        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.sources[0].retention_ok, Some(false));
        assert_eq!(
            report.sources[0].backup,
            BackupOutcome::Succeeded {
                summary: "backup docs ok".into(),
                stats: String::new()
            }
        );
        assert_eq!(executor.calls().last().unwrap(), "ping https://hc.example/id");
    }

    #[tokio::test]
    async fn test_missing_repository_is_initialized_once() {
        let executor = ScriptedExecutor::failing(&["cat config"]);
        let report = Runner::new(&executor).run(&plan(TWO_SOURCES)).await;

        let calls = executor.calls();
        assert_eq!(calls.iter().filter(|c| *c == "init").count(), 1);
        assert_eq!(calls[1..4], ["cat config", "init", "unlock"]);
        assert!(report.repository_initialized);
        assert_eq!(report.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_failed_init_ends_the_run() {
        let executor = ScriptedExecutor::failing(&["cat config", "init"]);
        let report = Runner::new(&executor).run(&plan(TWO_SOURCES)).await;

        assert_eq!(
            executor.calls(),
            vec!["ping https://hc.example/id/start", "cat config", "init"]
        );
        assert!(report.aborted);
        assert!(report.sources.is_empty());
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_zero_sources_runs_header_and_footer() {
        let executor = ScriptedExecutor::default();
        let report = Runner::new(&executor)
            .run(&plan(
                r#"{"repository": "r", "backup_password": "x", "healthcheck_url": "https://hc.example/id"}"#,
            ))
            .await;

        assert_eq!(
            executor.calls(),
            vec![
                "ping https://hc.example/id/start",
                "cat config",
                "unlock",
                "ping https://hc.example/id",
            ]
        );
        assert_eq!(report.exit_code(), 0);
    }
}
