//! Structured observability hooks for compilation and pipeline run events.
//!
//! Events are emitted at `info!` level with an `event` field naming the
//! lifecycle step; filter with `RUST_LOG` (see [`crate::telemetry`]).

use tracing::{info, warn, Span};

use crate::lifecycle::{FailureKind, JobState};

/// Span covering one pipeline run. Attach it to the run future with
/// [`tracing::Instrument::instrument`].
///
/// ```ignore
/// run.instrument(run_span(&run_id, "deploy")).await
/// ```
pub fn run_span(run_id: &str, action: &str) -> Span {
    tracing::info_span!("regci.run", run_id = %run_id, action = %action)
}

/// Emit event: a topology document was loaded and validated.
pub fn emit_topology_loaded(nodes: usize, edges: usize) {
    info!(event = "topology.loaded", nodes = nodes, edges = edges);
}

/// Emit event: the job graph was compiled.
pub fn emit_graph_compiled(jobs: usize, edges: usize, digest: &str) {
    info!(event = "graph.compiled", jobs = jobs, edges = edges, digest = %digest);
}

/// Emit event: an action token resolved to a job selection.
pub fn emit_action_resolved(action: &str, selected: usize, manual: bool) {
    info!(
        event = "action.resolved",
        action = %action,
        selected = selected,
        manual = manual,
    );
}

/// Emit event: a selection was ordered into stages.
pub fn emit_pipeline_sequenced(action: &str, stages: usize, jobs: usize) {
    info!(event = "pipeline.sequenced", action = %action, stages = stages, jobs = jobs);
}

/// Emit event: a job moved between lifecycle states.
pub fn emit_job_transition(job_id: &str, from: JobState, to: JobState) {
    info!(event = "job.transition", job_id = %job_id, from = %from, to = %to);
}

/// Emit event: a retryable failure consumed one retry (warning level).
pub fn emit_job_retry(job_id: &str, kind: FailureKind, retries_used: u32, max_retries: u32) {
    warn!(
        event = "job.retry",
        job_id = %job_id,
        failure = %kind,
        retries_used = retries_used,
        max_retries = max_retries,
    );
}

/// Emit event: a local pipeline run started.
pub fn emit_run_started(run_id: &str, action: &str, stages: usize) {
    info!(event = "run.started", run_id = %run_id, action = %action, stages = stages);
}

/// Emit event: a local pipeline run finished.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, failed: usize, success: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        failed = failed,
        success = success,
    );
}

/// Emit event: a run was cancelled (warning level).
pub fn emit_run_cancelled(run_id: &str) {
    warn!(event = "run.cancelled", run_id = %run_id);
}
