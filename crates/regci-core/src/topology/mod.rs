//! In-memory topology model.
//!
//! A [`Topology`] is built once from a [`TopologyConfig`](crate::config::TopologyConfig)
//! and never mutated. Containment and artifact relations are explicit
//! [`DependencyEdge`]s rather than positional nesting, so the compiler can
//! check cycles and identifier uniqueness over a single structure.

mod load;
pub mod naming;
pub mod node;

use std::collections::{BTreeMap, BTreeSet, HashMap};

pub use node::{DependencyEdge, EdgeKind, Node, NodeKind, Phase};

use crate::config::TopologyConfig;
use crate::error::Result;

/// Declared infrastructure objects and their relations.
#[derive(Debug, Clone)]
pub struct Topology {
    module: String,
    artifacts_root: String,
    variables: BTreeMap<String, String>,
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    edges: Vec<DependencyEdge>,
}

impl Topology {
    /// Build and validate a topology from a resolved configuration tree.
    ///
    /// Fails with [`RegciError::Config`](crate::RegciError::Config) for
    /// malformed objects and
    /// [`RegciError::UnresolvedReference`](crate::RegciError::UnresolvedReference)
    /// when a `needs` entry or component site names an undeclared node.
    pub fn load(config: &TopologyConfig) -> Result<Self> {
        load::build(config)
    }

    /// Job identifier prefix.
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn artifacts_root(&self) -> &str {
        &self.artifacts_root
    }

    /// Project-wide variables exported to every job.
    pub fn variables(&self) -> &BTreeMap<String, String> {
        &self.variables
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, key: &str) -> Option<&Node> {
        self.index.get(key).map(|&i| &self.nodes[i])
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    pub fn parent_of(&self, node: &Node) -> Option<&Node> {
        node.parent.as_deref().and_then(|key| self.node(key))
    }

    /// Direct structural children of `key`.
    pub fn children<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a Node> + 'a {
        let key = key.to_string();
        self.edges
            .iter()
            .filter(move |e| e.kind == EdgeKind::Structural && e.from == key)
            .filter_map(move |e| self.node(&e.to))
    }

    /// All structural descendants of `key`, depth first.
    pub fn descendants(&self, key: &str) -> Vec<&Node> {
        let mut out = Vec::new();
        let mut stack: Vec<&Node> = self.children(key).collect();
        stack.reverse();
        while let Some(node) = stack.pop() {
            out.push(node);
            let mut kids: Vec<&Node> = self.children(&node.key).collect();
            kids.reverse();
            stack.extend(kids);
        }
        out
    }

    /// Nodes whose output `node` needs before its producing phase may run.
    ///
    /// Covers declared artifact edges plus the structural requirement on the
    /// nearest owner: tests need their RTE, verifications their test, and
    /// every object its project. Infrastructure inside an RTE skips the RTE
    /// container, which would otherwise point back at itself, and inherits
    /// the container's own `needs` instead.
    pub fn requirements(&self, node: &Node) -> Vec<&Node> {
        let mut keys = self.artifact_sources(&node.key);

        let mut owner = self.parent_of(node);
        while let Some(current) = owner {
            if current.kind == NodeKind::Rte && node.kind.is_infrastructure() {
                keys.extend(self.artifact_sources(&current.key));
                owner = self.parent_of(current);
            } else {
                keys.insert(current.key.as_str());
                break;
            }
        }

        keys.into_iter()
            .filter(|k| *k != node.key)
            .filter_map(|k| self.node(k))
            .collect()
    }

    fn artifact_sources(&self, key: &str) -> BTreeSet<&str> {
        self.edges
            .iter()
            .filter(|e| e.kind == EdgeKind::Artifact && e.to == key)
            .map(|e| e.from.as_str())
            .collect()
    }

    /// Infrastructure nodes standing in for `node` when it is consumed:
    /// the node itself, or every infrastructure descendant of a container.
    pub fn infrastructure_of<'a>(&'a self, node: &'a Node) -> Vec<&'a Node> {
        if node.kind == NodeKind::Rte {
            self.descendants(&node.key)
                .into_iter()
                .filter(|n| n.kind.is_infrastructure())
                .collect()
        } else if node.kind.is_infrastructure() {
            vec![node]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::scenario_config;

    #[test]
    fn test_descendants_of_rte_include_tests_and_verifications() {
        let topo = Topology::load(&scenario_config()).unwrap();
        let keys: Vec<&str> = topo
            .descendants("rte/myrte")
            .into_iter()
            .map(|n| n.key.as_str())
            .collect();
        assert!(keys.contains(&"share/myrte/nfs"));
        assert!(keys.contains(&"component/myrte/web"));
        assert!(keys.contains(&"test/myrte/mytest"));
        assert!(keys.contains(&"verification/myrte/mytest/logs"));
    }

    #[test]
    fn test_test_requires_its_rte() {
        let topo = Topology::load(&scenario_config()).unwrap();
        let test = topo.node("test/myrte/mytest").unwrap();
        let reqs: Vec<&str> = topo
            .requirements(test)
            .into_iter()
            .map(|n| n.key.as_str())
            .collect();
        assert_eq!(reqs, vec!["rte/myrte"]);
    }

    #[test]
    fn test_component_requirements_skip_rte_container() {
        let topo = Topology::load(&scenario_config()).unwrap();
        let web = topo.node("component/myrte/web").unwrap();
        let reqs: Vec<&str> = topo
            .requirements(web)
            .into_iter()
            .map(|n| n.key.as_str())
            .collect();
        assert!(reqs.contains(&"share/myrte/nfs"));
        assert!(reqs.contains(&"site/site1"));
        assert!(reqs.contains(&"project/sense8"));
        assert!(!reqs.contains(&"rte/myrte"));
    }

    #[test]
    fn test_infrastructure_of_rte_expands_to_shares_and_components() {
        let topo = Topology::load(&scenario_config()).unwrap();
        let rte = topo.node("rte/myrte").unwrap();
        let infra: Vec<&str> = topo
            .infrastructure_of(rte)
            .into_iter()
            .map(|n| n.key.as_str())
            .collect();
        assert_eq!(infra, vec!["share/myrte/nfs", "component/myrte/web"]);
    }
}
