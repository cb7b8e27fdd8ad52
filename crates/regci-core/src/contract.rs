//! Execution contracts: what a CI backend needs to run one job.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RegciError, Result};
use crate::graph::{Job, JobGraph};
use crate::lifecycle::RetryPolicy;
use crate::sequencer::Pipeline;
use crate::topology::{Node, Phase};

pub const VAR_JOB_ID: &str = "REGCI_JOB_ID";
pub const VAR_PHASE: &str = "REGCI_PHASE";
pub const VAR_NODE: &str = "REGCI_NODE";
pub const VAR_ARTIFACTS_DIR: &str = "REGCI_ARTIFACTS_DIR";
pub const VAR_PROVIDER: &str = "REGCI_PROVIDER";

/// Runnable description of a single job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContract {
    pub job_id: String,
    pub node: String,
    pub phase: Phase,
    /// Opaque commands, run in order.
    pub script: Vec<String>,
    /// Files the job publishes, namespaced by job id.
    pub artifact_paths: Vec<String>,
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
    pub variables: BTreeMap<String, String>,
    /// Job ids that must succeed first.
    pub needs: Vec<String>,
    /// Waits for a manual start.
    pub manual: bool,
}

impl ExecutionContract {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Directory the job writes its artifacts under.
    pub fn artifacts_dir(&self) -> Option<&str> {
        self.variables.get(VAR_ARTIFACTS_DIR).map(String::as_str)
    }
}

/// Build the contract for `job`, with its direct graph dependencies as
/// `needs`.
pub fn emit(graph: &JobGraph, job: &Job) -> Result<ExecutionContract> {
    let node = graph.node_of(job).ok_or_else(|| {
        RegciError::Config(format!("job '{}' refers to unknown node '{}'", job.job_id, job.node))
    })?;
    let script = node
        .scripts
        .get(&job.phase)
        .filter(|cmds| cmds.iter().any(|c| !c.trim().is_empty()))
        .cloned()
        .ok_or_else(|| RegciError::IncompleteJob {
            job_id: job.job_id.clone(),
            phase: job.phase.to_string(),
        })?;

    let root = graph.topology().artifacts_root();
    let namespace = format!("{root}/{}", job.job_id);

    let artifact_paths = if job.phase == Phase::Artifacts && node.artifacts.is_empty() {
        vec![namespace.clone()]
    } else if publishes(node, job.phase) {
        node.artifacts
            .iter()
            .map(|rel| format!("{namespace}/{}", rel.trim_start_matches("./")))
            .collect()
    } else {
        Vec::new()
    };

    let mut variables = graph.topology().variables().clone();
    variables.extend(node.variables.clone());
    variables.insert(VAR_JOB_ID.to_string(), job.job_id.clone());
    variables.insert(VAR_PHASE.to_string(), job.phase.to_string());
    variables.insert(VAR_NODE.to_string(), node.key.clone());
    variables.insert(VAR_ARTIFACTS_DIR.to_string(), namespace);
    if let Some(provider) = &node.provider {
        variables.insert(VAR_PROVIDER.to_string(), provider.clone());
    }

    Ok(ExecutionContract {
        job_id: job.job_id.clone(),
        node: node.key.clone(),
        phase: job.phase,
        script,
        artifact_paths,
        timeout_secs: node.timeout_secs,
        retry: node.retry.clone(),
        variables,
        needs: graph
            .dependencies(&job.job_id)
            .into_iter()
            .map(|j| j.job_id.clone())
            .collect(),
        manual: false,
    })
}

/// Producing and artifacts jobs publish the node's declared files.
fn publishes(node: &Node, phase: Phase) -> bool {
    phase == Phase::Artifacts || node.kind.producing_phase() == Some(phase)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedStage {
    pub name: String,
    pub jobs: Vec<ExecutionContract>,
}

/// A whole pipeline, rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelinePlan {
    pub action: String,
    pub manual: bool,
    /// Digest of the graph the plan was rendered from.
    pub digest: String,
    pub stages: Vec<PlannedStage>,
}

impl PipelinePlan {
    pub fn contracts(&self) -> impl Iterator<Item = &ExecutionContract> {
        self.stages.iter().flat_map(|s| s.jobs.iter())
    }

    pub fn contract(&self, job_id: &str) -> Option<&ExecutionContract> {
        self.contracts().find(|c| c.job_id == job_id)
    }
}

/// Render every job of a sequenced pipeline. `needs` are restricted to the
/// pipeline's own jobs and the manual gate follows the selection.
pub fn emit_pipeline(graph: &JobGraph, pipeline: &Pipeline) -> Result<PipelinePlan> {
    let mut stages = Vec::with_capacity(pipeline.stages.len());
    for stage in &pipeline.stages {
        let mut jobs = Vec::with_capacity(stage.jobs.len());
        for job_id in &stage.jobs {
            let job = graph.job(job_id).ok_or_else(|| {
                RegciError::Config(format!("pipeline job '{job_id}' is not in the compiled graph"))
            })?;
            let mut contract = emit(graph, job)?;
            contract.needs = pipeline.needs_of(job_id).map(str::to_string).collect();
            contract.manual = pipeline.manual;
            jobs.push(contract);
        }
        stages.push(PlannedStage {
            name: stage.name(),
            jobs,
        });
    }
    Ok(PipelinePlan {
        action: pipeline.action.clone(),
        manual: pipeline.manual,
        digest: graph.digest(),
        stages,
    })
}
