//! Local pipeline execution.
//!
//! Stages run strictly in order; the jobs of one stage run concurrently and
//! the next stage starts once every job of the current one is terminal. A job
//! whose `needs` did not all succeed is skipped, while independent jobs keep
//! running. Cancellation moves every non-terminal job to `Cancelled`.

pub mod runner;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::Instrument;
use uuid::Uuid;

use crate::contract::{ExecutionContract, PipelinePlan};
use crate::error::Result;
use crate::lifecycle::{FailureKind, JobRun, JobState};
use crate::obs;

pub use runner::{DryRunRunner, JobRunner, ShellRunner};

/// Outcome of one job within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: String,
    pub stage: String,
    pub state: JobState,
    pub attempts: u32,
}

/// Outcome of a whole pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub run_id: Uuid,
    pub action: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// In execution order.
    pub jobs: Vec<JobReport>,
    pub success: bool,
}

impl ExecutionReport {
    pub fn job(&self, job_id: &str) -> Option<&JobReport> {
        self.jobs.iter().find(|j| j.job_id == job_id)
    }

    pub fn state_of(&self, job_id: &str) -> Option<JobState> {
        self.job(job_id).map(|j| j.state)
    }

    pub fn passed(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.state == JobState::Succeeded)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| matches!(j.state, JobState::Failed(_)))
            .count()
    }
}

/// Cancels the run it was taken from.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Runs a rendered pipeline with a [`JobRunner`].
pub struct PipelineExecutor {
    runner: Arc<dyn JobRunner>,
    cancel: Arc<watch::Sender<bool>>,
}

impl PipelineExecutor {
    pub fn new(runner: Arc<dyn JobRunner>) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            runner,
            cancel: Arc::new(tx),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel),
        }
    }

    /// Execute every stage of `plan`.
    ///
    /// Job failures are reported in the returned [`ExecutionReport`]; an
    /// `Err` means the executor itself misbehaved.
    pub async fn execute(&self, plan: &PipelinePlan) -> Result<ExecutionReport> {
        let run_id = Uuid::new_v4();
        let span = obs::run_span(&run_id.to_string(), &plan.action);
        self.run_stages(run_id, plan).instrument(span).await
    }

    async fn run_stages(&self, run_id: Uuid, plan: &PipelinePlan) -> Result<ExecutionReport> {
        let run_label = run_id.to_string();
        let started_at = Utc::now();
        let clock = Instant::now();
        obs::emit_run_started(&run_label, &plan.action, plan.stages.len());

        let mut states: HashMap<&str, JobState> = HashMap::new();
        let mut reports = Vec::new();
        let mut announced_cancel = false;

        for stage in &plan.stages {
            let mut runnable: Vec<&ExecutionContract> = Vec::new();
            for contract in &stage.jobs {
                let mut run = JobRun::new(contract.job_id.clone(), contract.retry.clone());
                if *self.cancel.borrow() {
                    run.cancel();
                } else if contract
                    .needs
                    .iter()
                    .any(|need| states.get(need.as_str()) != Some(&JobState::Succeeded))
                {
                    run.skip()?;
                } else {
                    runnable.push(contract);
                    continue;
                }
                states.insert(contract.job_id.as_str(), run.state());
                reports.push(report(&stage.name, &run));
            }

            let finished = join_all(runnable.iter().map(|c| self.run_job(c))).await;
            for (contract, run) in runnable.into_iter().zip(finished) {
                let run = run?;
                states.insert(contract.job_id.as_str(), run.state());
                reports.push(report(&stage.name, &run));
            }

            if *self.cancel.borrow() && !announced_cancel {
                obs::emit_run_cancelled(&run_label);
                announced_cancel = true;
            }
        }

        let success = reports.iter().all(|r| r.state == JobState::Succeeded);
        let report = ExecutionReport {
            run_id,
            action: plan.action.clone(),
            started_at,
            finished_at: Utc::now(),
            jobs: reports,
            success,
        };
        obs::emit_run_finished(
            &run_label,
            clock.elapsed().as_millis() as u64,
            report.failed(),
            success,
        );
        Ok(report)
    }

    /// Drive one job through its attempts until it is terminal.
    async fn run_job(&self, contract: &ExecutionContract) -> Result<JobRun> {
        let mut run = JobRun::new(contract.job_id.clone(), contract.retry.clone());
        let mut cancel_rx = self.cancel.subscribe();

        loop {
            if *cancel_rx.borrow_and_update() {
                run.cancel();
                break;
            }
            run.start()?;

            let outcome = tokio::select! {
                res = tokio::time::timeout(contract.timeout(), self.runner.run(contract)) => {
                    Some(res.unwrap_or(Err(FailureKind::TimeoutFailure)))
                }
                _ = cancelled(&mut cancel_rx) => None,
            };

            match outcome {
                None => {
                    run.cancel();
                    break;
                }
                Some(Ok(())) => {
                    run.succeed()?;
                    break;
                }
                Some(Err(kind)) => {
                    if run.fail(kind)? != JobState::Pending {
                        break;
                    }
                }
            }
        }
        Ok(run)
    }
}

fn report(stage: &str, run: &JobRun) -> JobReport {
    JobReport {
        job_id: run.job_id().to_string(),
        stage: stage.to_string(),
        state: run.state(),
        attempts: run.attempts(),
    }
}

/// Resolves once the flag flips to `true`; never if the sender goes away.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::resolve;
    use crate::contract::emit_pipeline;
    use crate::graph::compile;
    use crate::sequencer::sequence;
    use crate::testing::scenario_config;
    use crate::topology::Topology;

    fn plan(token: &str) -> PipelinePlan {
        let g = compile(&Topology::load(&scenario_config()).unwrap()).unwrap();
        let pipeline = sequence(&g, &resolve(&g, token).unwrap()).unwrap();
        emit_pipeline(&g, &pipeline).unwrap()
    }

    #[tokio::test]
    async fn test_dry_run_succeeds_every_job() {
        let plan = plan("regression");
        let executor = PipelineExecutor::new(Arc::new(DryRunRunner));
        let report = executor.execute(&plan).await.unwrap();
        assert!(report.success);
        assert_eq!(report.passed(), plan.contracts().count());
        assert!(report.jobs.iter().all(|j| j.attempts == 1));
    }

    #[tokio::test]
    async fn test_cancel_before_start_cancels_everything() {
        let plan = plan("deploy");
        let executor = PipelineExecutor::new(Arc::new(DryRunRunner));
        executor.cancel_handle().cancel();
        let report = executor.execute(&plan).await.unwrap();
        assert!(!report.success);
        assert!(report
            .jobs
            .iter()
            .all(|j| j.state == JobState::Cancelled && j.attempts == 0));
    }
}
