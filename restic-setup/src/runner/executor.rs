//! Side effects of the runner: restic processes and healthcheck pings.

use crate::plan::{ResticOp, RunnerSettings};
use crate::utils::errors::RunnerStepError;
use std::future::Future;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Ping attempts after the first, like `curl --retry 3`
const PING_RETRIES: u32 = 3;
const PING_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutput {
    pub stdout: String,
}

/// Executes individual runner operations. Each call blocks the run until it
/// completes; nothing is issued concurrently.
pub trait StepExecutor {
    fn restic(
        &self,
        settings: &RunnerSettings,
        op: &ResticOp,
    ) -> impl Future<Output = Result<StepOutput, RunnerStepError>> + Send;

    fn ping(&self, url: &str) -> impl Future<Output = Result<(), RunnerStepError>> + Send;
}

/// Runs the installed restic binary and pings over HTTP.
pub struct SystemExecutor {
    client: reqwest::Client,
}

impl SystemExecutor {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(PING_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

impl StepExecutor for SystemExecutor {
    async fn restic(
        &self,
        settings: &RunnerSettings,
        op: &ResticOp,
    ) -> Result<StepOutput, RunnerStepError> {
        let args: Vec<String> = op.args().iter().map(|arg| settings.resolve(arg)).collect();
        debug!(operation = op.name(), args = ?args, "Running restic");

        let output = Command::new(&settings.restic_binary)
            .arg("-p")
            .arg(&settings.password_file)
            .arg("-r")
            .arg(&settings.repository)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| RunnerStepError::Spawn {
                program: settings.restic_binary.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.trim().is_empty() {
                warn!(operation = op.name(), "{}", stderr.trim());
            }
            return Err(RunnerStepError::Exit {
                operation: op.name(),
                status: output.status.to_string(),
            });
        }

        Ok(StepOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }

    async fn ping(&self, url: &str) -> Result<(), RunnerStepError> {
        let mut last_error = String::new();

        for attempt in 0..=PING_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(1 << (attempt - 1))).await;
            }

            match self.client.get(url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => last_error = format!("HTTP {}", resp.status()),
                Err(e) => last_error = e.to_string(),
            }
            debug!(url, attempt, error = %last_error, "Healthcheck ping attempt failed");
        }

        Err(RunnerStepError::Ping {
            url: url.to_string(),
            message: last_error,
        })
    }
}
