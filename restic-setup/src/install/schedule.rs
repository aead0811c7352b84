//! Crontab reconciliation for the generated runner.

use crate::utils::errors::{Result, SetupError};
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleChange {
    Added,
    AlreadyPresent,
}

/// Where the user's crontab lives.
pub trait CrontabStore {
    /// Current table; an absent crontab reads as empty
    fn read(&self) -> impl Future<Output = Result<String>> + Send;

    /// Replace the whole table
    fn write(&self, table: &str) -> impl Future<Output = Result<()>> + Send;
}

/// The invoking user's crontab, through the `crontab` command.
pub struct SystemCrontab;

impl CrontabStore for SystemCrontab {
    async fn read(&self) -> Result<String> {
        let output = Command::new("crontab")
            .arg("-l")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SetupError::Schedule(format!("failed to run crontab -l: {}", e)))?;

        listed_table(
            output.status.success(),
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        )
    }

    async fn write(&self, table: &str) -> Result<()> {
        let mut child = Command::new("crontab")
            .arg("-")
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| SetupError::Schedule(format!("failed to run crontab -: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(table.as_bytes()).await?;
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(SetupError::Schedule(format!("crontab - exited with {}", status)));
        }
        Ok(())
    }
}

/// Interpret `crontab -l`. Only a missing crontab reads as empty.
fn listed_table(success: bool, stdout: &str, stderr: &str) -> Result<String> {
    if success {
        return Ok(stdout.to_string());
    }
    if stderr.contains("no crontab for") {
        return Ok(String::new());
    }
    Err(SetupError::Schedule(format!(
        "crontab -l failed: {}",
        stderr.trim()
    )))
}

pub fn cron_line(schedule: &str, runner: &Path) -> String {
    format!("{} {}", schedule.trim(), runner.display())
}

/// Whether an active (uncommented) entry already runs `runner`.
pub fn references_runner(table: &str, runner: &Path) -> bool {
    let runner = runner.to_string_lossy();
    table
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .any(|line| line.split_whitespace().any(|word| word == runner))
}

/// New table with the runner scheduled, or `None` if it already is.
pub fn reconcile(table: &str, schedule: &str, runner: &Path) -> Option<String> {
    if references_runner(table, runner) {
        return None;
    }

    let mut updated = table.to_string();
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(&cron_line(schedule, runner));
    updated.push('\n');
    Some(updated)
}

pub async fn ensure_cron_entry<S: CrontabStore>(
    store: &S,
    schedule: &str,
    runner: &Path,
) -> Result<ScheduleChange> {
    info!("Setting up cron job...");
    let current = store.read().await?;

    match reconcile(&current, schedule, runner) {
        None => {
            info!("Cron job already exists.");
            Ok(ScheduleChange::AlreadyPresent)
        }
        Some(updated) => {
            store.write(&updated).await?;
            info!("Cron job added: {}", cron_line(schedule, runner));
            Ok(ScheduleChange::Added)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryCrontab {
        table: Mutex<String>,
        writes: Mutex<usize>,
    }

    impl CrontabStore for MemoryCrontab {
        async fn read(&self) -> Result<String> {
            Ok(self.table.lock().unwrap().clone())
        }

        async fn write(&self, table: &str) -> Result<()> {
            *self.table.lock().unwrap() = table.to_string();
            *self.writes.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn runner() -> PathBuf {
        PathBuf::from("/home/u/bin/restic-custom-backup")
    }

    #[test]
    fn test_listed_table() {
        assert_eq!(
            listed_table(true, "0 1 * * * /bin/a\n", "").unwrap(),
            "0 1 * * * /bin/a\n"
        );
        assert_eq!(listed_table(false, "", "no crontab for u\n").unwrap(), "");

        let err = listed_table(false, "", "crontab: cannot open /var/spool/cron: Permission denied\n")
            .unwrap_err();
        assert!(matches!(err, SetupError::Schedule(_)));
        assert!(err.to_string().contains("Permission denied"));
    }

    #[test]
    fn test_reconcile_appends_to_existing_table() {
        let updated = reconcile("30 2 * * * /usr/bin/other", "0 12 * * *", &runner()).unwrap();
        assert_eq!(
            updated,
            "30 2 * * * /usr/bin/other\n0 12 * * * /home/u/bin/restic-custom-backup\n"
        );
    }

    #[test]
    fn test_reconcile_skips_existing_entry_with_other_schedule() {
        let table = "15 3 * * * /home/u/bin/restic-custom-backup\n";
        assert_eq!(reconcile(table, "0 12 * * *", &runner()), None);
    }

    #[test]
    fn test_commented_or_similar_entries_do_not_count() {
        assert!(!references_runner("# 0 12 * * * /home/u/bin/restic-custom-backup\n", &runner()));
        assert!(!references_runner(
            "0 12 * * * /home/u/bin/restic-custom-backup-old\n",
            &runner()
        ));
    }

    #[tokio::test]
    async fn test_ensure_cron_entry_is_idempotent() {
        let store = MemoryCrontab::default();

        let first = ensure_cron_entry(&store, "0 12 * * *", &runner()).await.unwrap();
        let second = ensure_cron_entry(&store, "0 12 * * *", &runner()).await.unwrap();

        assert_eq!(first, ScheduleChange::Added);
        assert_eq!(second, ScheduleChange::AlreadyPresent);
        assert_eq!(*store.writes.lock().unwrap(), 1);
        assert_eq!(
            store.table.lock().unwrap().as_str(),
            "0 12 * * * /home/u/bin/restic-custom-backup\n"
        );
    }
}
