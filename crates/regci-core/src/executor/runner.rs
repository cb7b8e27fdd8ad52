//! Job runners: the seam between the executor and whatever runs scripts.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::contract::ExecutionContract;
use crate::lifecycle::FailureKind;

/// Runs one attempt of a job.
///
/// Implementations report failures as a [`FailureKind`]; timeouts and
/// cancellation are enforced by the caller, which drops the future.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, contract: &ExecutionContract) -> Result<(), FailureKind>;
}

/// Runs each script line with `sh -c`, in order, stopping at the first
/// non-zero exit.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    workdir: PathBuf,
}

impl ShellRunner {
    /// Scripts run in `workdir`; artifact directories are created under it.
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }
}

#[async_trait]
impl JobRunner for ShellRunner {
    async fn run(&self, contract: &ExecutionContract) -> Result<(), FailureKind> {
        if let Some(dir) = contract.artifacts_dir() {
            tokio::fs::create_dir_all(self.workdir.join(dir))
                .await
                .map_err(|e| {
                    warn!(job_id = %contract.job_id, error = %e, "failed to create artifacts dir");
                    FailureKind::RunnerInfrastructureFailure
                })?;
        }

        for (line, command) in contract.script.iter().enumerate() {
            debug!(job_id = %contract.job_id, line = line, command = %command, "Running script line");
            let output = Command::new("sh")
                .arg("-c")
                .arg(command)
                .current_dir(&self.workdir)
                .envs(&contract.variables)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| {
                    warn!(job_id = %contract.job_id, error = %e, "failed to spawn shell");
                    FailureKind::RunnerInfrastructureFailure
                })?
                .wait_with_output()
                .await
                .map_err(|e| {
                    warn!(job_id = %contract.job_id, error = %e, "lost shell process");
                    FailureKind::RunnerInfrastructureFailure
                })?;

            if !output.status.success() {
                warn!(
                    job_id = %contract.job_id,
                    line = line,
                    exit_code = output.status.code().unwrap_or(-1),
                    stderr = %String::from_utf8_lossy(&output.stderr).trim_end(),
                    "script line failed"
                );
                return Err(FailureKind::ScriptFailure);
            }
        }
        Ok(())
    }
}

/// Logs each job and succeeds without running anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunRunner;

#[async_trait]
impl JobRunner for DryRunRunner {
    async fn run(&self, contract: &ExecutionContract) -> Result<(), FailureKind> {
        info!(
            job_id = %contract.job_id,
            phase = %contract.phase,
            commands = contract.script.len(),
            "dry run"
        );
        Ok(())
    }
}
