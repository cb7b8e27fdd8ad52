//! Graph exports: the action catalog, Graphviz DOT and JSON.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::action::{self, Action, Verb};
use crate::error::Result;
use crate::graph::JobGraph;
use crate::topology::{DependencyEdge, Node, NodeKind, Phase};

const CATALOG_VERBS: [Verb; 7] = [
    Verb::Deploy,
    Verb::Artifacts,
    Verb::Destroy,
    Verb::Test,
    Verb::Verify,
    Verb::TestAndVerify,
    Verb::Regression,
];

/// Every action token that resolves against a graph, grouped by what it
/// targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCatalog {
    /// Untargeted verbs.
    pub verbs: Vec<String>,
    pub sites: Vec<String>,
    pub features: Vec<String>,
    pub applications: Vec<String>,
    /// RTEs and their shares and components.
    pub rtes: Vec<String>,
    pub tests: Vec<String>,
    pub verifications: Vec<String>,
}

impl ActionCatalog {
    pub fn build(graph: &JobGraph) -> Self {
        let mut catalog = Self {
            verbs: CATALOG_VERBS
                .iter()
                .map(|&verb| Action { verb, target: None })
                .filter(|a| action::select(graph, a).is_ok())
                .map(|a| a.to_string())
                .collect(),
            ..Self::default()
        };

        for node in graph.topology().nodes() {
            let Some(bucket) = catalog.bucket(node.kind) else {
                continue;
            };
            for verb in CATALOG_VERBS {
                if let Some(target) = catalog_target(graph, node, verb) {
                    let action = Action {
                        verb,
                        target: Some(target),
                    };
                    bucket.push(action.to_string());
                }
            }
        }
        catalog
    }

    fn bucket(&mut self, kind: NodeKind) -> Option<&mut Vec<String>> {
        match kind {
            NodeKind::EutSite => Some(&mut self.sites),
            NodeKind::Feature => Some(&mut self.features),
            NodeKind::Application => Some(&mut self.applications),
            NodeKind::Rte | NodeKind::RteShare | NodeKind::RteComponent => Some(&mut self.rtes),
            NodeKind::Test => Some(&mut self.tests),
            NodeKind::Verification => Some(&mut self.verifications),
            NodeKind::Project | NodeKind::Collector | NodeKind::Report | NodeKind::Dashboard => {
                None
            }
        }
    }

    /// All tokens, untargeted verbs first.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.verbs
            .iter()
            .chain(&self.sites)
            .chain(&self.features)
            .chain(&self.applications)
            .chain(&self.rtes)
            .chain(&self.tests)
            .chain(&self.verifications)
            .map(String::as_str)
    }
}

/// Target naming `node` for `verb`: its path id, or failing that the
/// shortest job id suffix that resolves to it alone.
fn catalog_target(graph: &JobGraph, node: &Node, verb: Verb) -> Option<String> {
    let segments: Vec<&str> = node.job_id.split('-').collect();
    let suffixes = (1..segments.len()).map(|k| segments[segments.len() - k..].join("-"));
    std::iter::once(node.path_id())
        .chain(suffixes)
        .find(|target| {
            let action = Action {
                verb,
                target: Some(target.clone()),
            };
            matches!(
                action::match_target(graph, &action, target),
                Ok(found) if found.key == node.key
            )
        })
}

fn dot_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn phase_colour(phase: Phase) -> &'static str {
    match phase {
        Phase::Deploy => "lightblue",
        Phase::Artifacts => "khaki",
        Phase::Test => "palegreen",
        Phase::Verify => "plum",
        Phase::Destroy => "lightsalmon",
    }
}

/// Graphviz DOT of the job graph; edges point from dependency to dependent.
pub fn to_dot(graph: &JobGraph) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph \"{}\" {{", dot_escape(graph.topology().module()));
    out.push_str("  rankdir=LR;\n");
    out.push_str("  node [shape=box, style=filled];\n");
    for job in graph.jobs() {
        let _ = writeln!(
            out,
            "  \"{id}\" [label=\"{node}\\n{phase}\", fillcolor={colour}];",
            id = dot_escape(&job.job_id),
            node = dot_escape(&job.node),
            phase = job.phase,
            colour = phase_colour(job.phase),
        );
    }
    for (from, to) in graph.edges() {
        let _ = writeln!(out, "  \"{}\" -> \"{}\";", dot_escape(from), dot_escape(to));
    }
    out.push_str("}\n");
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobExport {
    pub job_id: String,
    pub node: String,
    pub phase: Phase,
    pub needs: Vec<String>,
}

/// Serializable snapshot of a compiled graph and its topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphExport {
    pub module: String,
    pub digest: String,
    pub nodes: Vec<Node>,
    pub edges: Vec<DependencyEdge>,
    pub jobs: Vec<JobExport>,
}

impl GraphExport {
    pub fn from_graph(graph: &JobGraph) -> Self {
        let topology = graph.topology();
        Self {
            module: topology.module().to_string(),
            digest: graph.digest(),
            nodes: topology.nodes().to_vec(),
            edges: topology.edges().to_vec(),
            jobs: graph
                .jobs()
                .iter()
                .map(|job| JobExport {
                    job_id: job.job_id.clone(),
                    node: job.node.clone(),
                    phase: job.phase,
                    needs: graph
                        .dependencies(&job.job_id)
                        .into_iter()
                        .map(|d| d.job_id.clone())
                        .collect(),
                })
                .collect(),
        }
    }
}

pub fn to_json(graph: &JobGraph) -> Result<String> {
    Ok(serde_json::to_string_pretty(&GraphExport::from_graph(graph))?)
}
