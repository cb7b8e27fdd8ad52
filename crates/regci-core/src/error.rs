//! Error taxonomy for topology loading, graph compilation and action resolution.

use thiserror::Error;

/// Errors produced while building, compiling or querying a pipeline graph.
///
/// Every variant except [`RegciError::InvalidTransition`] is fatal for the
/// operation that raised it: no partial graph or selection is ever returned.
#[derive(Debug, Error)]
pub enum RegciError {
    /// The topology document is malformed or internally inconsistent.
    #[error("config error: {0}")]
    Config(String),

    /// A node references another node that was never declared.
    #[error("unresolved reference from {from}: no node named '{reference}'")]
    UnresolvedReference { from: String, reference: String },

    /// The dependency edges form a cycle.
    #[error("dependency cycle detected between nodes: {}", nodes.join(" -> "))]
    Cycle {
        /// Distinct node keys along the cycle, in traversal order.
        nodes: Vec<String>,
        /// Job ids along the cycle, in traversal order.
        jobs: Vec<String>,
    },

    /// Two jobs normalise to the same identifier.
    #[error("duplicate job id '{job_id}' produced by {first} and {second}")]
    DuplicateJobId {
        job_id: String,
        first: String,
        second: String,
    },

    /// The trigger token does not match the grammar or any compiled job.
    #[error("unknown action '{action}': {reason}")]
    UnknownAction { action: String, reason: String },

    /// The trigger target matches more than one node equally well.
    #[error("ambiguous action '{action}': target matches {}", candidates.join(", "))]
    AmbiguousAction {
        action: String,
        candidates: Vec<String>,
    },

    /// A phase was declared without any script body.
    #[error("incomplete job '{job_id}': phase {phase} declares no script")]
    IncompleteJob { job_id: String, phase: String },

    /// A job state machine was driven through an illegal transition.
    #[error("invalid transition for job '{job_id}': {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: String,
        to: String,
    },
}

impl RegciError {
    /// Process exit code for the CLI wrapper.
    pub fn exit_code(&self) -> i32 {
        match self {
            RegciError::Config(_) => 2,
            RegciError::UnresolvedReference { .. } => 3,
            RegciError::Cycle { .. } => 4,
            RegciError::DuplicateJobId { .. } => 5,
            RegciError::UnknownAction { .. } | RegciError::AmbiguousAction { .. } => 6,
            RegciError::IncompleteJob { .. } => 7,
            RegciError::InvalidTransition { .. } => 1,
        }
    }

    pub(crate) fn unknown_action(action: &str, reason: impl Into<String>) -> Self {
        RegciError::UnknownAction {
            action: action.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for RegciError {
    fn from(err: serde_json::Error) -> Self {
        RegciError::Config(format!("invalid topology document: {err}"))
    }
}

impl From<std::io::Error> for RegciError {
    fn from(err: std::io::Error) -> Self {
        RegciError::Config(format!("cannot read topology document: {err}"))
    }
}

/// Result type for regci operations.
pub type Result<T> = std::result::Result<T, RegciError>;
