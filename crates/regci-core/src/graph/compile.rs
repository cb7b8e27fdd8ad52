use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::{RegciError, Result};
use crate::obs;
use crate::topology::{Node, NodeKind, Phase, Topology};

use super::{cycle, Job, JobGraph};

/// Compile a topology into a job graph.
///
/// Wiring, for a node `C` that requires a node `P`:
///
/// * `C`'s producing job waits on `P`'s terminal job (its artifacts job when
///   present, else its producing job; for an RTE, the terminals of its
///   infrastructure).
/// * a node's artifacts job waits on its own producing job.
/// * when both are infrastructure, `P`'s destroy waits on `C`'s destroy.
///
/// Fails with [`RegciError::IncompleteJob`] for a phase with no commands,
/// [`RegciError::DuplicateJobId`] when two jobs normalise to the same id and
/// [`RegciError::Cycle`] when the wiring is not acyclic.
pub fn compile(topology: &Topology) -> Result<JobGraph> {
    let jobs = expand_jobs(topology)?;
    let index: HashMap<String, usize> = jobs
        .iter()
        .enumerate()
        .map(|(i, job)| (job.job_id.clone(), i))
        .collect();

    let mut wiring = Wiring {
        topology,
        index: &index,
        deps: vec![BTreeSet::new(); jobs.len()],
    };
    wiring.wire_producers();
    wiring.wire_destroy_mirror();
    let deps = wiring.deps;

    if let Some(cycle) = cycle::find_cycle(&deps) {
        return Err(cycle::cycle_error(cycle.iter().map(|&i| &jobs[i])));
    }

    let mut dependents = vec![BTreeSet::new(); jobs.len()];
    for (job, job_deps) in deps.iter().enumerate() {
        for &d in job_deps {
            dependents[d].insert(job);
        }
    }

    let graph = JobGraph {
        topology: topology.clone(),
        jobs,
        index,
        deps,
        dependents,
    };
    obs::emit_graph_compiled(graph.job_count(), graph.edge_count(), &graph.digest());
    Ok(graph)
}

/// One job per declared phase, sorted by id, with uniqueness enforced.
fn expand_jobs(topology: &Topology) -> Result<Vec<Job>> {
    let mut owners: HashMap<String, &str> = HashMap::new();
    let mut jobs = Vec::new();

    for node in topology.nodes() {
        for (&phase, commands) in &node.scripts {
            let job_id = node.phase_job_id(phase);
            if commands.iter().all(|c| c.trim().is_empty()) {
                return Err(RegciError::IncompleteJob {
                    job_id,
                    phase: phase.to_string(),
                });
            }
            if let Some(first) = owners.insert(job_id.clone(), node.key.as_str()) {
                return Err(RegciError::DuplicateJobId {
                    job_id,
                    first: first.to_string(),
                    second: node.key.clone(),
                });
            }
            jobs.push(Job {
                job_id,
                node: node.key.clone(),
                phase,
            });
        }
    }

    jobs.sort_by(|a, b| a.job_id.cmp(&b.job_id));
    Ok(jobs)
}

struct Wiring<'a> {
    topology: &'a Topology,
    index: &'a HashMap<String, usize>,
    deps: Vec<BTreeSet<usize>>,
}

impl Wiring<'_> {
    fn job(&self, node: &Node, phase: Phase) -> Option<usize> {
        if !node.has_phase(phase) {
            return None;
        }
        self.index.get(&node.phase_job_id(phase)).copied()
    }

    fn producing_job(&self, node: &Node) -> Option<usize> {
        node.kind.producing_phase().and_then(|p| self.job(node, p))
    }

    /// Jobs whose completion makes `node`'s output available. A node
    /// without jobs stands in for its own requirements.
    fn terminal(&self, node: &Node) -> BTreeSet<usize> {
        self.terminal_from(node, &mut HashSet::new())
    }

    fn terminal_from(&self, node: &Node, seen: &mut HashSet<String>) -> BTreeSet<usize> {
        if let Some(artifacts) = self.job(node, Phase::Artifacts) {
            return BTreeSet::from([artifacts]);
        }
        if let Some(producer) = self.producing_job(node) {
            return BTreeSet::from([producer]);
        }
        if !seen.insert(node.key.clone()) {
            return BTreeSet::new();
        }
        if node.kind == NodeKind::Rte {
            let mut infra = BTreeSet::new();
            for child in self.topology.infrastructure_of(node) {
                infra.extend(self.terminal_from(child, seen));
            }
            if !infra.is_empty() {
                return infra;
            }
        }
        let mut upstream = BTreeSet::new();
        for required in self.topology.requirements(node) {
            upstream.extend(self.terminal_from(required, seen));
        }
        upstream
    }

    fn wire_producers(&mut self) {
        let topology = self.topology;
        for node in topology.nodes() {
            let Some(producer) = self.producing_job(node) else {
                continue;
            };
            if let Some(artifacts) = self.job(node, Phase::Artifacts) {
                self.deps[artifacts].insert(producer);
            }
            for required in topology.requirements(node) {
                let upstream = self.terminal(required);
                self.deps[producer].extend(upstream);
            }
        }
    }

    /// Teardown runs in reverse of bring-up: infrastructure is destroyed
    /// only after everything built on top of it.
    fn wire_destroy_mirror(&mut self) {
        let topology = self.topology;
        let mut consumers: HashMap<&str, Vec<&Node>> = HashMap::new();
        for consumer in topology.nodes().iter().filter(|n| n.kind.is_infrastructure()) {
            for required in topology.requirements(consumer) {
                for provider in topology.infrastructure_of(required) {
                    if provider.key != consumer.key {
                        consumers.entry(provider.key.as_str()).or_default().push(consumer);
                    }
                }
            }
        }

        for provider in topology.nodes() {
            let Some(destroy) = self.job(provider, Phase::Destroy) else {
                continue;
            };
            let mut seen: BTreeSet<&str> = BTreeSet::new();
            let mut stack: Vec<&Node> = consumers
                .get(provider.key.as_str())
                .cloned()
                .unwrap_or_default();
            while let Some(consumer) = stack.pop() {
                if !seen.insert(consumer.key.as_str()) {
                    continue;
                }
                match self.job(consumer, Phase::Destroy) {
                    Some(consumer_destroy) => {
                        self.deps[destroy].insert(consumer_destroy);
                    }
                    None => {
                        if let Some(next) = consumers.get(consumer.key.as_str()) {
                            stack.extend(next.iter().copied());
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ComponentConfig, ObjectConfig, RteConfig};
    use crate::testing::{scenario_config, scripts};

    fn deps_of(graph: &JobGraph, job_id: &str) -> Vec<String> {
        graph
            .dependencies(job_id)
            .into_iter()
            .map(|j| j.job_id.clone())
            .collect()
    }

    #[test]
    fn test_artifacts_job_depends_only_on_its_producer() {
        let g = compile(&Topology::load(&scenario_config()).unwrap()).unwrap();
        assert_eq!(
            deps_of(&g, "s8-rte-myrte-share-nfs-artifacts"),
            vec!["s8-rte-myrte-share-nfs-deploy"]
        );
    }

    #[test]
    fn test_consumer_waits_on_upstream_artifacts_not_deploy() {
        let g = compile(&Topology::load(&scenario_config()).unwrap()).unwrap();
        let deps = deps_of(&g, "s8-rte-myrte-web-deploy");
        assert_eq!(
            deps,
            vec![
                "s8-eut-edge-site1-artifacts",
                "s8-rte-myrte-share-nfs-artifacts"
            ]
        );
    }

    #[test]
    fn test_test_waits_on_all_rte_infrastructure() {
        let g = compile(&Topology::load(&scenario_config()).unwrap()).unwrap();
        assert_eq!(
            deps_of(&g, "s8-test-myrte-mytest-test"),
            vec![
                "s8-rte-myrte-share-nfs-artifacts",
                "s8-rte-myrte-web-artifacts"
            ]
        );
    }

    #[test]
    fn test_destroy_mirrors_deploy() {
        let g = compile(&Topology::load(&scenario_config()).unwrap()).unwrap();
        assert_eq!(
            deps_of(&g, "s8-rte-myrte-share-nfs-destroy"),
            vec!["s8-rte-myrte-web-destroy"]
        );
        assert_eq!(
            deps_of(&g, "s8-eut-edge-site1-destroy"),
            vec!["s8-rte-myrte-web-destroy"]
        );
        assert!(deps_of(&g, "s8-rte-myrte-web-destroy").is_empty());
    }

    #[test]
    fn test_destroy_mirror_walks_past_nodes_without_destroy() {
        let mut cfg = scenario_config();
        // middle has no destroy script; web sits on top of it.
        cfg.rtes[0].components.insert(
            0,
            ComponentConfig {
                name: "middle".to_string(),
                site: None,
                spec: {
                    let mut s = scripts(&[("deploy", &["make middle"])]);
                    s.needs.push("share/myrte/nfs".to_string());
                    s
                },
            },
        );
        cfg.rtes[0].components[1].spec.needs = vec!["component/myrte/middle".to_string()];
        let g = compile(&Topology::load(&cfg).unwrap()).unwrap();
        assert_eq!(
            deps_of(&g, "s8-rte-myrte-share-nfs-destroy"),
            vec!["s8-rte-myrte-web-destroy"]
        );
    }

    #[test]
    fn test_empty_script_is_incomplete() {
        let mut cfg = scenario_config();
        cfg.eut.sites[0]
            .spec
            .scripts
            .insert("destroy".to_string(), Vec::new());
        let err = compile(&Topology::load(&cfg).unwrap()).unwrap_err();
        match err {
            RegciError::IncompleteJob { job_id, phase } => {
                assert_eq!(job_id, "s8-eut-edge-site1-destroy");
                assert_eq!(phase, "destroy");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_normalised_name_collision_is_duplicate() {
        let mut cfg = scenario_config();
        cfg.rtes.push(RteConfig {
            name: "a_b".to_string(),
            shares: Vec::new(),
            components: vec![ComponentConfig {
                name: "c".to_string(),
                site: None,
                spec: scripts(&[("deploy", &["x"])]),
            }],
            tests: Vec::new(),
            spec: Default::default(),
        });
        cfg.rtes.push(RteConfig {
            name: "a".to_string(),
            shares: Vec::new(),
            components: vec![ComponentConfig {
                name: "b.c".to_string(),
                site: None,
                spec: scripts(&[("deploy", &["y"])]),
            }],
            tests: Vec::new(),
            spec: Default::default(),
        });
        let err = compile(&Topology::load(&cfg).unwrap()).unwrap_err();
        match err {
            RegciError::DuplicateJobId {
                job_id,
                first,
                second,
            } => {
                assert_eq!(job_id, "s8-rte-a-b-c-deploy");
                assert_eq!(first, "component/a_b/c");
                assert_eq!(second, "component/a/b.c");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_jobless_rte_passes_its_needs_to_tests() {
        let mut cfg = scenario_config();
        cfg.rtes[0].shares.clear();
        cfg.rtes[0].components.clear();
        cfg.rtes[0].spec.needs.push("site/site1".to_string());
        let g = compile(&Topology::load(&cfg).unwrap()).unwrap();
        assert_eq!(
            deps_of(&g, "s8-test-myrte-mytest-test"),
            vec!["s8-eut-edge-site1-artifacts"]
        );
    }

    #[test]
    fn test_jobless_link_in_needs_chain_is_bridged() {
        let mut cfg = scenario_config();
        cfg.features.push(ObjectConfig {
            name: "placeholder".to_string(),
            spec: {
                let mut s = crate::config::JobSpecConfig::default();
                s.needs.push("site/site1".to_string());
                s
            },
        });
        cfg.applications.push(ObjectConfig {
            name: "portal".to_string(),
            spec: {
                let mut s = scripts(&[("deploy", &["helm install"])]);
                s.needs.push("feature/placeholder".to_string());
                s
            },
        });
        let g = compile(&Topology::load(&cfg).unwrap()).unwrap();
        assert_eq!(
            deps_of(&g, "s8-application-portal-deploy"),
            vec!["s8-eut-edge-site1-artifacts"]
        );
    }

    #[test]
    fn test_jobless_nodes_referring_back_to_their_rte_terminate() {
        let mut cfg = scenario_config();
        cfg.rtes[0].tests.push(crate::config::TestConfig {
            name: "pending".to_string(),
            verifications: Vec::new(),
            spec: Default::default(),
        });
        cfg.rtes[0].components.push(ComponentConfig {
            name: "idle".to_string(),
            site: None,
            spec: {
                let mut s = crate::config::JobSpecConfig::default();
                s.needs.push("test/myrte/pending".to_string());
                s
            },
        });
        let g = compile(&Topology::load(&cfg).unwrap()).unwrap();
        assert_eq!(
            deps_of(&g, "s8-test-myrte-mytest-test"),
            vec![
                "s8-rte-myrte-share-nfs-artifacts",
                "s8-rte-myrte-web-artifacts"
            ]
        );
    }

    #[test]
    fn test_project_deploy_precedes_everything() {
        let mut cfg = scenario_config();
        cfg.project.spec.scripts = scripts(&[("deploy", &["init"]), ("destroy", &["fini"])]).scripts;
        cfg.features.push(ObjectConfig {
            name: "flag".to_string(),
            spec: scripts(&[("deploy", &["enable"])]),
        });
        let g = compile(&Topology::load(&cfg).unwrap()).unwrap();
        assert_eq!(
            deps_of(&g, "s8-feature-flag-deploy"),
            vec!["s8-project-sense8-deploy"]
        );
        assert!(deps_of(&g, "s8-project-sense8-destroy").contains(&"s8-eut-edge-site1-destroy".to_string()));
    }
}
