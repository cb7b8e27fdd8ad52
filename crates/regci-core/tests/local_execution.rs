//! Local executor behaviour against a scripted runner.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use regci_core::{
    compile, emit_pipeline, resolve, sequence, ExecutionContract, FailureKind, JobRunner,
    JobState, PipelineExecutor, PipelinePlan, Topology, TopologyConfig,
};
use serde_json::json;

const SITE: &str = "s8-eut-edge-site1-deploy";
const SHARE: &str = "s8-rte-myrte-share-nfs-deploy";
const WEB: &str = "s8-rte-myrte-web-deploy";

#[derive(Debug, Clone, Copy)]
enum Step {
    Fail(FailureKind),
    Sleep(Duration),
}

/// Plays back per-job steps; a job with no steps left succeeds.
#[derive(Default)]
struct ScriptedRunner {
    steps: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    fn with(mut self, job_id: &str, steps: &[Step]) -> Self {
        self.steps
            .get_mut()
            .unwrap()
            .insert(job_id.to_string(), steps.iter().copied().collect());
        self
    }

    fn calls_for(&self, job_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == job_id)
            .count()
    }
}

#[async_trait]
impl JobRunner for ScriptedRunner {
    async fn run(&self, contract: &ExecutionContract) -> Result<(), FailureKind> {
        self.calls.lock().unwrap().push(contract.job_id.clone());
        let step = self
            .steps
            .lock()
            .unwrap()
            .get_mut(&contract.job_id)
            .and_then(VecDeque::pop_front);
        match step {
            None => Ok(()),
            Some(Step::Fail(kind)) => Err(kind),
            Some(Step::Sleep(d)) => {
                tokio::time::sleep(d).await;
                Ok(())
            }
        }
    }
}

fn deploy_plan() -> PipelinePlan {
    let doc = json!({
        "project": { "name": "sense8", "module": "s8" },
        "defaults": {
            "timeout_secs": 60,
            "retry": { "max": 1, "when": ["script_failure", "timeout_failure"] }
        },
        "eut": {
            "name": "edge",
            "sites": [{ "name": "site1", "scripts": { "deploy": ["up site"] } }]
        },
        "rtes": [{
            "name": "myrte",
            "shares": [{
                "name": "nfs",
                "scripts": { "deploy": ["up nfs"], "artifacts": ["export nfs"] }
            }],
            "components": [{
                "name": "web",
                "needs": ["share/myrte/nfs"],
                "scripts": { "deploy": ["up web"] }
            }]
        }]
    });
    let config = TopologyConfig::from_json_str(&doc.to_string()).unwrap();
    let graph = compile(&Topology::load(&config).unwrap()).unwrap();
    let pipeline = sequence(&graph, &resolve(&graph, "deploy").unwrap()).unwrap();
    emit_pipeline(&graph, &pipeline).unwrap()
}

#[tokio::test(start_paused = true)]
async fn retryable_failure_is_retried_once() {
    let runner = Arc::new(ScriptedRunner::default().with(SHARE, &[Step::Fail(FailureKind::ScriptFailure)]));
    let executor = PipelineExecutor::new(runner.clone());
    let report = executor.execute(&deploy_plan()).await.unwrap();

    assert!(report.success);
    assert_eq!(report.job(SHARE).unwrap().attempts, 2);
    assert_eq!(runner.calls_for(SHARE), 2);
    assert_eq!(report.state_of(WEB), Some(JobState::Succeeded));
}

#[tokio::test(start_paused = true)]
async fn non_retryable_failure_skips_dependents_only() {
    let runner = Arc::new(
        ScriptedRunner::default()
            .with(SHARE, &[Step::Fail(FailureKind::RunnerInfrastructureFailure)]),
    );
    let executor = PipelineExecutor::new(runner.clone());
    let report = executor.execute(&deploy_plan()).await.unwrap();

    assert!(!report.success);
    assert_eq!(
        report.state_of(SHARE),
        Some(JobState::Failed(FailureKind::RunnerInfrastructureFailure))
    );
    assert_eq!(report.job(SHARE).unwrap().attempts, 1);
    assert_eq!(report.state_of(SITE), Some(JobState::Succeeded));
    assert_eq!(report.state_of(WEB), Some(JobState::Skipped));
    assert_eq!(runner.calls_for(WEB), 0);
    assert_eq!(report.failed(), 1);
}

#[tokio::test(start_paused = true)]
async fn timeouts_consume_retries_then_fail() {
    let long = Step::Sleep(Duration::from_secs(3600));
    let runner = Arc::new(ScriptedRunner::default().with(SITE, &[long, long]));
    let executor = PipelineExecutor::new(runner.clone());
    let report = executor.execute(&deploy_plan()).await.unwrap();

    assert_eq!(
        report.state_of(SITE),
        Some(JobState::Failed(FailureKind::TimeoutFailure))
    );
    assert_eq!(report.job(SITE).unwrap().attempts, 2);
    // web does not need the site in this topology.
    assert_eq!(report.state_of(WEB), Some(JobState::Succeeded));
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_running_and_pending_jobs() {
    let runner = Arc::new(
        ScriptedRunner::default().with(SHARE, &[Step::Sleep(Duration::from_secs(50))]),
    );
    let executor = PipelineExecutor::new(runner.clone());
    let handle = executor.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        handle.cancel();
    });

    let report = executor.execute(&deploy_plan()).await.unwrap();

    assert!(!report.success);
    assert_eq!(report.state_of(SITE), Some(JobState::Succeeded));
    assert_eq!(report.state_of(SHARE), Some(JobState::Cancelled));
    assert_eq!(report.state_of(WEB), Some(JobState::Cancelled));
    assert_eq!(runner.calls_for(WEB), 0);
    assert!(executor.cancel_handle().is_cancelled());
}

#[tokio::test]
async fn report_lists_jobs_in_stage_order() {
    let plan = deploy_plan();
    let executor = PipelineExecutor::new(Arc::new(ScriptedRunner::default()));
    let report = executor.execute(&plan).await.unwrap();

    let order: Vec<&str> = report.jobs.iter().map(|j| j.job_id.as_str()).collect();
    assert_eq!(order, vec![SITE, SHARE, WEB]);
    assert_eq!(report.jobs[0].stage, "stage-01");
    assert_eq!(report.jobs[2].stage, "stage-02");
    assert!(report.finished_at >= report.started_at);
}
