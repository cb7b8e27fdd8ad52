//! regci core library
//!
//! Compiles a declarative regression-CI topology into a dependency-ordered
//! job graph, resolves trigger actions against it and renders the selected
//! jobs as staged execution contracts.
//!
//! ```ignore
//! let config = TopologyConfig::load_from_path(Path::new("topology.json"))?;
//! let graph = compile(&Topology::load(&config)?)?;
//! let selection = resolve(&graph, "test-myrte-mytest")?;
//! let plan = emit_pipeline(&graph, &sequence(&graph, &selection)?)?;
//! ```

pub mod action;
pub mod config;
pub mod contract;
pub mod error;
pub mod executor;
pub mod export;
pub mod graph;
pub mod lifecycle;
pub mod obs;
pub mod sequencer;
pub mod telemetry;
pub mod topology;

#[cfg(test)]
pub(crate) mod testing;

pub use action::{resolve, resolve_action, resolve_trigger, Action, Selection, Trigger, Verb};
pub use config::TopologyConfig;
pub use contract::{emit, emit_pipeline, ExecutionContract, PipelinePlan, PlannedStage};
pub use error::{RegciError, Result};
pub use executor::{
    CancelHandle, DryRunRunner, ExecutionReport, JobReport, JobRunner, PipelineExecutor,
    ShellRunner,
};
pub use export::{to_dot, to_json, ActionCatalog, GraphExport};
pub use graph::{compile, Job, JobGraph};
pub use lifecycle::{FailureKind, JobRun, JobState, RetryPolicy};
pub use sequencer::{sequence, Pipeline, Stage};
pub use topology::{DependencyEdge, EdgeKind, Node, NodeKind, Phase, Topology};
