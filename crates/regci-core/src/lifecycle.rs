//! Per-job run state machine and retry policy.
//!
//! ```text
//! Pending -> Running -> Succeeded
//!               |
//!               +-> Failed (terminal)
//!               +-> Pending (retryable kind, retries left)
//! Pending | Running -> Cancelled
//! Pending -> Skipped
//! ```

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{RegciError, Result};
use crate::obs;

/// Runtime failure classification reported by a job runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A script command exited non-zero.
    ScriptFailure,
    /// The job exceeded its timeout.
    TimeoutFailure,
    /// The runner itself failed (spawn error, lost worker, disk).
    RunnerInfrastructureFailure,
    /// Logic or configuration error. Never retried.
    ConfigurationFailure,
}

impl FailureKind {
    pub fn name(&self) -> &'static str {
        match self {
            FailureKind::ScriptFailure => "script_failure",
            FailureKind::TimeoutFailure => "timeout_failure",
            FailureKind::RunnerInfrastructureFailure => "runner_infrastructure_failure",
            FailureKind::ConfigurationFailure => "configuration_failure",
        }
    }

    /// Whether this kind may ever appear in a retry policy.
    pub fn is_retryable_kind(&self) -> bool {
        !matches!(self, FailureKind::ConfigurationFailure)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How often, and for which failures, a job is re-queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Number of re-runs allowed after the first attempt.
    pub max_retries: u32,
    /// Failure kinds that consume a retry instead of failing the job.
    pub retryable: BTreeSet<FailureKind>,
}

impl RetryPolicy {
    /// Build a policy, rejecting kinds that must never be retried.
    pub fn new(max_retries: u32, retryable: impl IntoIterator<Item = FailureKind>) -> Result<Self> {
        let retryable: BTreeSet<FailureKind> = retryable.into_iter().collect();
        if let Some(kind) = retryable.iter().find(|k| !k.is_retryable_kind()) {
            return Err(RegciError::Config(format!(
                "retry policy cannot retry {kind}: logic and configuration errors are never retried"
            )));
        }
        Ok(Self {
            max_retries,
            retryable,
        })
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            retryable: BTreeSet::new(),
        }
    }

    pub fn allows(&self, kind: FailureKind) -> bool {
        self.retryable.contains(&kind)
    }
}

/// Observable state of one job within one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "failure", rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed(FailureKind),
    Cancelled,
    /// Never started because an upstream job did not succeed.
    Skipped,
}

impl JobState {
    pub fn name(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed(_) => "failed",
            JobState::Cancelled => "cancelled",
            JobState::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed(_) | JobState::Cancelled | JobState::Skipped
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Failed(kind) => write!(f, "failed({kind})"),
            other => f.write_str(other.name()),
        }
    }
}

/// State machine driving a single job through its attempts.
#[derive(Debug, Clone)]
pub struct JobRun {
    job_id: String,
    policy: RetryPolicy,
    state: JobState,
    attempts: u32,
    retries_used: u32,
    last_failure: Option<FailureKind>,
}

impl JobRun {
    pub fn new(job_id: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            job_id: job_id.into(),
            policy,
            state: JobState::Pending,
            attempts: 0,
            retries_used: 0,
            last_failure: None,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Number of times the job entered `Running`.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn retries_used(&self) -> u32 {
        self.retries_used
    }

    pub fn last_failure(&self) -> Option<FailureKind> {
        self.last_failure
    }

    /// `Pending -> Running`.
    pub fn start(&mut self) -> Result<()> {
        self.expect_state(JobState::Pending, JobState::Running)?;
        self.attempts += 1;
        self.transition(JobState::Running);
        Ok(())
    }

    /// `Running -> Succeeded`.
    pub fn succeed(&mut self) -> Result<()> {
        self.expect_state(JobState::Running, JobState::Succeeded)?;
        self.transition(JobState::Succeeded);
        Ok(())
    }

    /// `Running -> Pending` when `kind` is retryable and retries remain,
    /// otherwise `Running -> Failed`. Returns the resulting state.
    pub fn fail(&mut self, kind: FailureKind) -> Result<JobState> {
        self.expect_state(JobState::Running, JobState::Failed(kind))?;
        self.last_failure = Some(kind);
        if self.policy.allows(kind) && self.retries_used < self.policy.max_retries {
            self.retries_used += 1;
            obs::emit_job_retry(&self.job_id, kind, self.retries_used, self.policy.max_retries);
            self.transition(JobState::Pending);
        } else {
            self.transition(JobState::Failed(kind));
        }
        Ok(self.state)
    }

    /// Cancel a non-terminal job. Returns `false` when the job had already
    /// reached a terminal state, which is left untouched.
    pub fn cancel(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.transition(JobState::Cancelled);
        true
    }

    /// `Pending -> Skipped`.
    pub fn skip(&mut self) -> Result<()> {
        self.expect_state(JobState::Pending, JobState::Skipped)?;
        self.transition(JobState::Skipped);
        Ok(())
    }

    fn expect_state(&self, expected: JobState, to: JobState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(RegciError::InvalidTransition {
                job_id: self.job_id.clone(),
                from: self.state.to_string(),
                to: to.to_string(),
            })
        }
    }

    fn transition(&mut self, to: JobState) {
        obs::emit_job_transition(&self.job_id, self.state, to);
        self.state = to;
    }
}
