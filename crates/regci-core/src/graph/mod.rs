//! Compiled job graph.
//!
//! [`compile`] expands every declared phase of every node into a [`Job`] and
//! wires the dependencies between them. The result is frozen: actions are
//! resolved against it and never mutate it.

mod compile;
pub(crate) mod cycle;

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::topology::{Node, Phase, Topology};

pub use compile::compile;

/// One `(node, phase)` unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    /// Key of the owning topology node.
    pub node: String,
    pub phase: Phase,
}

/// Immutable DAG of jobs, ordered by `job_id`.
#[derive(Debug, Clone)]
pub struct JobGraph {
    topology: Topology,
    jobs: Vec<Job>,
    index: HashMap<String, usize>,
    /// `deps[i]`: jobs that must finish before job `i`.
    deps: Vec<BTreeSet<usize>>,
    /// `dependents[i]`: jobs waiting on job `i`.
    dependents: Vec<BTreeSet<usize>>,
}

impl JobGraph {
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn job(&self, job_id: &str) -> Option<&Job> {
        self.index.get(job_id).map(|&i| &self.jobs[i])
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn edge_count(&self) -> usize {
        self.deps.iter().map(BTreeSet::len).sum()
    }

    /// Node owning `job`.
    pub fn node_of(&self, job: &Job) -> Option<&Node> {
        self.topology.node(&job.node)
    }

    /// The job for `phase` of the node `node_key`, if declared.
    pub fn job_for(&self, node_key: &str, phase: Phase) -> Option<&Job> {
        let node = self.topology.node(node_key)?;
        self.job(&node.phase_job_id(phase))
    }

    /// Direct dependencies of `job_id`, sorted by id.
    pub fn dependencies(&self, job_id: &str) -> Vec<&Job> {
        self.index
            .get(job_id)
            .map(|&i| self.deps[i].iter().map(|&d| &self.jobs[d]).collect())
            .unwrap_or_default()
    }

    /// Direct dependents of `job_id`, sorted by id.
    pub fn dependents(&self, job_id: &str) -> Vec<&Job> {
        self.index
            .get(job_id)
            .map(|&i| self.dependents[i].iter().map(|&d| &self.jobs[d]).collect())
            .unwrap_or_default()
    }

    /// Every `(dependency, dependent)` pair, sorted.
    pub fn edges(&self) -> Vec<(&str, &str)> {
        let mut edges: Vec<(&str, &str)> = self
            .deps
            .iter()
            .enumerate()
            .flat_map(|(job, deps)| {
                deps.iter()
                    .map(move |&d| (self.jobs[d].job_id.as_str(), self.jobs[job].job_id.as_str()))
            })
            .collect();
        edges.sort_unstable();
        edges
    }

    /// All jobs `job_id` transitively depends on, excluding itself.
    pub fn transitive_dependencies(&self, job_id: &str) -> BTreeSet<String> {
        let Some(&start) = self.index.get(job_id) else {
            return BTreeSet::new();
        };
        self.closure([start])
            .into_iter()
            .filter(|&i| i != start)
            .map(|i| self.jobs[i].job_id.clone())
            .collect()
    }

    /// SHA-256 over the canonical job and edge listing.
    ///
    /// Compiling the same topology twice yields the same digest.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for job in &self.jobs {
            hasher.update(format!("job {} {} {}\n", job.job_id, job.node, job.phase));
        }
        for (from, to) in self.edges() {
            hasher.update(format!("edge {from} {to}\n"));
        }
        hex::encode(hasher.finalize())
    }

    pub(crate) fn index_of(&self, job_id: &str) -> Option<usize> {
        self.index.get(job_id).copied()
    }

    pub(crate) fn job_at(&self, index: usize) -> &Job {
        &self.jobs[index]
    }

    pub(crate) fn deps_at(&self, index: usize) -> &BTreeSet<usize> {
        &self.deps[index]
    }

    /// `roots` plus everything they transitively depend on.
    pub(crate) fn closure(&self, roots: impl IntoIterator<Item = usize>) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<usize> = roots.into_iter().collect();
        while let Some(i) = stack.pop() {
            if seen.insert(i) {
                stack.extend(self.deps[i].iter().copied());
            }
        }
        seen
    }
}
