//! Selection to ordered stages.
//!
//! Stages are computed with Kahn's algorithm, extracting every ready job at
//! once so that each stage is as wide as the dependencies allow. Ties are
//! ordered by `job_id`, making the output deterministic.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::action::Selection;
use crate::error::{RegciError, Result};
use crate::graph::{cycle, JobGraph};
use crate::obs;
use crate::topology::Phase;

/// A set of mutually independent jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// 0-based position in the pipeline.
    pub index: usize,
    /// Job ids, sorted.
    pub jobs: Vec<String>,
}

impl Stage {
    /// CI stage name, e.g. `stage-01` for the first stage.
    pub fn name(&self) -> String {
        format!("stage-{:02}", self.index + 1)
    }
}

/// Ordered stages for one selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub action: String,
    pub manual: bool,
    pub stages: Vec<Stage>,
    /// Selected jobs each job waits on, including dependencies carried
    /// through jobs left out of the selection.
    pub needs: BTreeMap<String, BTreeSet<String>>,
}

impl Pipeline {
    /// Job ids in execution order.
    pub fn flatten(&self) -> Vec<&str> {
        self.stages
            .iter()
            .flat_map(|s| s.jobs.iter().map(String::as_str))
            .collect()
    }

    pub fn job_count(&self) -> usize {
        self.stages.iter().map(|s| s.jobs.len()).sum()
    }

    pub fn stage_of(&self, job_id: &str) -> Option<usize> {
        self.stages
            .iter()
            .find(|s| s.jobs.iter().any(|j| j == job_id))
            .map(|s| s.index)
    }

    pub fn needs_of(&self, job_id: &str) -> impl Iterator<Item = &str> {
        self.needs
            .get(job_id)
            .into_iter()
            .flat_map(|n| n.iter().map(String::as_str))
    }
}

/// Order the selected jobs into stages.
///
/// A selected job waits on every selected job it reaches through the graph,
/// even when the path runs through unselected jobs. Destroy jobs also wait
/// for every selected non-destroy job, so teardown never overlaps the work
/// it would pull the infrastructure from under. That barrier orders stages
/// only and is not part of `needs`.
pub fn sequence(graph: &JobGraph, selection: &Selection) -> Result<Pipeline> {
    let mut selected: Vec<usize> = Vec::with_capacity(selection.len());
    for job_id in &selection.jobs {
        let index = graph.index_of(job_id).ok_or_else(|| {
            RegciError::unknown_action(
                &selection.label(),
                format!("selected job '{job_id}' is not in the compiled graph"),
            )
        })?;
        selected.push(index);
    }
    selected.sort_unstable();
    let local: HashMap<usize, usize> = selected
        .iter()
        .enumerate()
        .map(|(pos, &global)| (global, pos))
        .collect();

    let mut deps: Vec<BTreeSet<usize>> = selected
        .iter()
        .map(|&global| effective_deps(graph, global, &local))
        .collect();

    let needs: BTreeMap<String, BTreeSet<String>> = selected
        .iter()
        .zip(&deps)
        .map(|(&global, job_deps)| {
            (
                graph.job_at(global).job_id.clone(),
                job_deps
                    .iter()
                    .map(|&d| graph.job_at(selected[d]).job_id.clone())
                    .collect(),
            )
        })
        .collect();

    let is_destroy = |pos: usize| graph.job_at(selected[pos]).phase == Phase::Destroy;
    let builders: Vec<usize> = (0..selected.len()).filter(|&p| !is_destroy(p)).collect();
    for (pos, job_deps) in deps.iter_mut().enumerate() {
        if is_destroy(pos) {
            job_deps.extend(builders.iter().copied());
        }
    }

    if let Some(found) = cycle::find_cycle(&deps) {
        return Err(cycle::cycle_error(
            found.iter().map(|&pos| graph.job_at(selected[pos])),
        ));
    }

    let stages = kahn_stages(&deps)
        .into_iter()
        .enumerate()
        .map(|(index, members)| Stage {
            index,
            jobs: members
                .into_iter()
                .map(|pos| graph.job_at(selected[pos]).job_id.clone())
                .collect(),
        })
        .collect::<Vec<_>>();

    let pipeline = Pipeline {
        action: selection.label(),
        manual: selection.manual,
        stages,
        needs,
    };
    obs::emit_pipeline_sequenced(&pipeline.action, pipeline.stages.len(), pipeline.job_count());
    Ok(pipeline)
}

/// Selected jobs reachable from `global` through unselected ones.
fn effective_deps(graph: &JobGraph, global: usize, local: &HashMap<usize, usize>) -> BTreeSet<usize> {
    let mut out = BTreeSet::new();
    let mut seen = BTreeSet::new();
    let mut stack: Vec<usize> = graph.deps_at(global).iter().copied().collect();
    while let Some(dep) = stack.pop() {
        if !seen.insert(dep) {
            continue;
        }
        match local.get(&dep) {
            Some(&pos) => {
                out.insert(pos);
            }
            None => stack.extend(graph.deps_at(dep).iter().copied()),
        }
    }
    out
}

/// Level-by-level Kahn. Callers guarantee `deps` is acyclic.
fn kahn_stages(deps: &[BTreeSet<usize>]) -> Vec<Vec<usize>> {
    let mut in_degree: Vec<usize> = deps.iter().map(BTreeSet::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); deps.len()];
    for (job, job_deps) in deps.iter().enumerate() {
        for &d in job_deps {
            dependents[d].push(job);
        }
    }

    let mut ready: Vec<usize> = (0..deps.len()).filter(|&j| in_degree[j] == 0).collect();
    let mut stages = Vec::new();
    while !ready.is_empty() {
        let mut next = Vec::new();
        for &job in &ready {
            for &dependent in &dependents[job] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    next.push(dependent);
                }
            }
        }
        // Positions follow job id order.
        next.sort_unstable();
        stages.push(std::mem::replace(&mut ready, next));
    }
    stages
}
