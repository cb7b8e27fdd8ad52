//! Configuration tree to [`Topology`] construction.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::config::{JobSpecConfig, TopologyConfig};
use crate::error::{RegciError, Result};
use crate::graph::cycle;
use crate::lifecycle::RetryPolicy;
use crate::obs;

use super::naming;
use super::node::{DependencyEdge, EdgeKind, Node, NodeKind, Phase};
use super::Topology;

/// Describes one node to be added; `words` are the kind words placed between
/// the module prefix and the path in the job id.
struct NodeDecl<'a> {
    kind: NodeKind,
    key_names: Vec<&'a str>,
    words: Vec<&'a str>,
    path: Vec<&'a str>,
    parent: Option<String>,
    inherited_provider: Option<&'a str>,
}

struct Builder {
    module: String,
    default_timeout: u64,
    default_retry: RetryPolicy,
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    edges: Vec<DependencyEdge>,
    seen_edges: HashSet<DependencyEdge>,
    /// `(consumer key, referenced key)` resolved once every node exists.
    pending_needs: Vec<(String, String)>,
}

pub(super) fn build(config: &TopologyConfig) -> Result<Topology> {
    naming::validate_name("module", &config.project.module)?;
    if config.defaults.timeout_secs == 0 {
        return Err(RegciError::Config(
            "defaults.timeout_secs must be greater than zero".to_string(),
        ));
    }
    let default_retry =
        RetryPolicy::new(config.defaults.retry.max, config.defaults.retry.when.iter().copied())?;
    validate_relative_path("defaults.artifacts_root", &config.defaults.artifacts_root)?;

    let mut b = Builder {
        module: config.project.module.clone(),
        default_timeout: config.defaults.timeout_secs,
        default_retry,
        nodes: Vec::new(),
        index: HashMap::new(),
        edges: Vec::new(),
        seen_edges: HashSet::new(),
        pending_needs: Vec::new(),
    };

    let project = &config.project;
    let project_key = b.add(
        NodeDecl {
            kind: NodeKind::Project,
            key_names: vec![project.name.as_str()],
            words: vec!["project"],
            path: vec![project.name.as_str()],
            parent: None,
            inherited_provider: None,
        },
        &project.spec,
    )?;

    let eut = &config.eut;
    naming::validate_name("eut", &eut.name)?;
    for site in &eut.sites {
        b.add(
            NodeDecl {
                kind: NodeKind::EutSite,
                key_names: vec![site.name.as_str()],
                words: vec!["eut", eut.name.as_str()],
                path: vec![site.name.as_str()],
                parent: Some(project_key.clone()),
                inherited_provider: None,
            },
            &site.spec,
        )?;
    }

    for (kind, objects) in [
        (NodeKind::Feature, &config.features),
        (NodeKind::Application, &config.applications),
    ] {
        for object in objects {
            b.add_flat(kind, &object.name, &project_key, &object.spec)?;
        }
    }

    for rte in &config.rtes {
        let rte_key = b.add(
            NodeDecl {
                kind: NodeKind::Rte,
                key_names: vec![rte.name.as_str()],
                words: vec!["rte"],
                path: vec![rte.name.as_str()],
                parent: Some(project_key.clone()),
                inherited_provider: None,
            },
            &rte.spec,
        )?;
        let rte_provider = rte.spec.provider.as_deref();

        for share in &rte.shares {
            b.add(
                NodeDecl {
                    kind: NodeKind::RteShare,
                    key_names: vec![rte.name.as_str(), share.name.as_str()],
                    words: vec!["rte"],
                    path: vec![rte.name.as_str(), "share", share.name.as_str()],
                    parent: Some(rte_key.clone()),
                    inherited_provider: rte_provider,
                },
                &share.spec,
            )?;
        }

        for component in &rte.components {
            let key = b.add(
                NodeDecl {
                    kind: NodeKind::RteComponent,
                    key_names: vec![rte.name.as_str(), component.name.as_str()],
                    words: vec!["rte"],
                    path: vec![rte.name.as_str(), component.name.as_str()],
                    parent: Some(rte_key.clone()),
                    inherited_provider: rte_provider,
                },
                &component.spec,
            )?;
            if let Some(site) = &component.site {
                let reference = if site.contains('/') {
                    site.clone()
                } else {
                    format!("{}/{}", NodeKind::EutSite.tag(), site)
                };
                b.pending_needs.push((key, reference));
            }
        }

        for test in &rte.tests {
            let test_key = b.add(
                NodeDecl {
                    kind: NodeKind::Test,
                    key_names: vec![rte.name.as_str(), test.name.as_str()],
                    words: vec!["test"],
                    path: vec![rte.name.as_str(), test.name.as_str()],
                    parent: Some(rte_key.clone()),
                    inherited_provider: rte_provider,
                },
                &test.spec,
            )?;
            for verification in &test.verifications {
                b.add(
                    NodeDecl {
                        kind: NodeKind::Verification,
                        key_names: vec![rte.name.as_str(), test.name.as_str(), verification.name.as_str()],
                        words: vec!["verification"],
                        path: vec![rte.name.as_str(), test.name.as_str(), verification.name.as_str()],
                        parent: Some(test_key.clone()),
                        inherited_provider: rte_provider,
                    },
                    &verification.spec,
                )?;
            }
        }
    }

    for (kind, objects) in [
        (NodeKind::Collector, &config.collectors),
        (NodeKind::Report, &config.reports),
    ] {
        for object in objects {
            b.add_flat(kind, &object.name, &project_key, &object.spec)?;
        }
    }
    if let Some(dashboard) = &config.dashboard {
        b.add_flat(NodeKind::Dashboard, &dashboard.name, &project_key, &dashboard.spec)?;
    }

    b.resolve_needs()?;
    b.check_acyclic()?;

    let topology = Topology {
        module: b.module,
        artifacts_root: config.defaults.artifacts_root.trim_end_matches('/').to_string(),
        variables: project.spec.variables.clone(),
        nodes: b.nodes,
        index: b.index,
        edges: b.edges,
    };
    obs::emit_topology_loaded(topology.nodes.len(), topology.edges.len());
    Ok(topology)
}

impl Builder {
    /// Project-level object named only by itself.
    fn add_flat(
        &mut self,
        kind: NodeKind,
        name: &str,
        project_key: &str,
        spec: &JobSpecConfig,
    ) -> Result<String> {
        self.add(
            NodeDecl {
                kind,
                key_names: vec![name],
                words: vec![kind.tag()],
                path: vec![name],
                parent: Some(project_key.to_string()),
                inherited_provider: None,
            },
            spec,
        )
    }

    fn add(&mut self, decl: NodeDecl<'_>, spec: &JobSpecConfig) -> Result<String> {
        let kind = decl.kind;
        let name = decl.key_names.last().copied().unwrap_or_default();
        naming::validate_name(kind.tag(), name)?;

        let key = format!("{}/{}", kind.tag(), decl.key_names.join("/"));
        if self.index.contains_key(&key) {
            return Err(RegciError::Config(format!("duplicate {kind} declared: {key}")));
        }
        if !spec.unknown.is_empty() {
            let fields: Vec<&str> = spec.unknown.keys().map(String::as_str).collect();
            return Err(RegciError::Config(format!(
                "{key}: unknown field(s): {}",
                fields.join(", ")
            )));
        }

        let scripts = parse_scripts(kind, &key, &spec.scripts)?;

        for artifact in &spec.artifacts {
            validate_relative_path(&key, artifact)?;
        }

        let timeout_secs = spec.timeout_secs.unwrap_or(self.default_timeout);
        if timeout_secs == 0 {
            return Err(RegciError::Config(format!(
                "{key}: timeout_secs must be greater than zero"
            )));
        }

        let retry = match &spec.retry {
            Some(r) => RetryPolicy::new(r.max, r.when.iter().copied())?,
            None => self.default_retry.clone(),
        };

        let mut id_segments: Vec<&str> = vec![self.module.as_str()];
        id_segments.extend(decl.words.iter().copied());
        id_segments.extend(decl.path.iter().copied());

        let node = Node {
            key: key.clone(),
            kind,
            name: name.to_string(),
            path: decl.path.iter().map(|s| s.to_string()).collect(),
            job_id: naming::job_id(&id_segments),
            provider: spec
                .provider
                .clone()
                .or_else(|| decl.inherited_provider.map(str::to_string)),
            parent: decl.parent.clone(),
            scripts,
            artifacts: spec.artifacts.clone(),
            variables: spec.variables.clone(),
            timeout_secs,
            retry,
        };

        if let Some(parent) = decl.parent {
            self.push_edge(DependencyEdge {
                from: parent,
                to: key.clone(),
                kind: EdgeKind::Structural,
            });
        }
        for reference in &spec.needs {
            self.pending_needs.push((key.clone(), reference.clone()));
        }

        self.index.insert(key.clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(key)
    }

    fn resolve_needs(&mut self) -> Result<()> {
        for (consumer, reference) in std::mem::take(&mut self.pending_needs) {
            if !self.index.contains_key(&reference) {
                return Err(RegciError::UnresolvedReference {
                    from: consumer,
                    reference,
                });
            }
            self.push_edge(DependencyEdge {
                from: reference,
                to: consumer,
                kind: EdgeKind::Artifact,
            });
        }
        Ok(())
    }

    /// Containment and artifact edges together must form a DAG.
    fn check_acyclic(&self) -> Result<()> {
        let mut deps = vec![BTreeSet::new(); self.nodes.len()];
        for edge in &self.edges {
            if let (Some(&from), Some(&to)) = (self.index.get(&edge.from), self.index.get(&edge.to)) {
                deps[to].insert(from);
            }
        }
        let Some(found) = cycle::find_cycle(&deps) else {
            return Ok(());
        };
        let nodes: Vec<&Node> = found.iter().map(|&i| &self.nodes[i]).collect();
        Err(RegciError::Cycle {
            nodes: nodes.iter().map(|n| n.key.clone()).collect(),
            jobs: nodes
                .iter()
                .flat_map(|n| n.phases().map(move |p| n.phase_job_id(p)))
                .collect(),
        })
    }

    fn push_edge(&mut self, edge: DependencyEdge) {
        if self.seen_edges.insert(edge.clone()) {
            self.edges.push(edge);
        }
    }
}

fn parse_scripts(
    kind: NodeKind,
    key: &str,
    raw: &BTreeMap<String, Vec<String>>,
) -> Result<BTreeMap<Phase, Vec<String>>> {
    let mut scripts = BTreeMap::new();
    for (script_key, commands) in raw {
        let phase = Phase::from_script_key(kind, script_key).ok_or_else(|| {
            RegciError::Config(format!("{key}: unknown script '{script_key}'"))
        })?;
        if !kind.supports(phase) {
            return Err(RegciError::Config(format!(
                "{key}: a {kind} cannot declare a {phase} script"
            )));
        }
        if scripts.insert(phase, commands.clone()).is_some() {
            return Err(RegciError::Config(format!(
                "{key}: phase {phase} declared more than once"
            )));
        }
    }

    if scripts.contains_key(&Phase::Artifacts) {
        if let Some(producer) = kind.producing_phase() {
            if !scripts.contains_key(&producer) {
                return Err(RegciError::Config(format!(
                    "{key}: artifacts script requires a {producer} script"
                )));
            }
        }
    }
    Ok(scripts)
}

/// Artifact paths are namespaced per job, so they must stay inside the namespace.
fn validate_relative_path(owner: &str, path: &str) -> Result<()> {
    let escapes = path.split('/').any(|segment| segment == "..");
    if path.trim().is_empty() || path.starts_with('/') || escapes {
        return Err(RegciError::Config(format!(
            "{owner}: artifact path '{path}' must be relative and stay inside its namespace"
        )));
    }
    Ok(())
}
