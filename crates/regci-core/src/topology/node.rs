//! Topology node kinds, phases and dependency edges.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::lifecycle::RetryPolicy;

/// Lifecycle phase of a compiled job.
///
/// Declaration order is the phase precedence used when listing a node's jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Deploy,
    Artifacts,
    Test,
    Verify,
    Destroy,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Deploy,
        Phase::Artifacts,
        Phase::Test,
        Phase::Verify,
        Phase::Destroy,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Deploy => "deploy",
            Phase::Artifacts => "artifacts",
            Phase::Test => "test",
            Phase::Verify => "verify",
            Phase::Destroy => "destroy",
        }
    }

    /// Map a script key from the topology document onto a phase.
    ///
    /// `apply` is the producing script of tests and verifications.
    pub fn from_script_key(kind: NodeKind, key: &str) -> Option<Phase> {
        match key {
            "deploy" => Some(Phase::Deploy),
            "artifacts" => Some(Phase::Artifacts),
            "destroy" => Some(Phase::Destroy),
            "test" => Some(Phase::Test),
            "verify" => Some(Phase::Verify),
            "apply" => match kind {
                NodeKind::Test => Some(Phase::Test),
                NodeKind::Verification => Some(Phase::Verify),
                _ => Some(Phase::Deploy),
            },
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of declared topology object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Project,
    EutSite,
    Feature,
    Rte,
    RteShare,
    RteComponent,
    Test,
    Verification,
    Application,
    Collector,
    Report,
    Dashboard,
}

impl NodeKind {
    /// Prefix used in node keys, e.g. `share` in `share/myrte/nfs`.
    pub fn tag(&self) -> &'static str {
        match self {
            NodeKind::Project => "project",
            NodeKind::EutSite => "site",
            NodeKind::Feature => "feature",
            NodeKind::Rte => "rte",
            NodeKind::RteShare => "share",
            NodeKind::RteComponent => "component",
            NodeKind::Test => "test",
            NodeKind::Verification => "verification",
            NodeKind::Application => "application",
            NodeKind::Collector => "collector",
            NodeKind::Report => "report",
            NodeKind::Dashboard => "dashboard",
        }
    }

    /// Phases a node of this kind may declare scripts for.
    pub fn capabilities(&self) -> &'static [Phase] {
        match self {
            NodeKind::Project | NodeKind::Feature | NodeKind::Application | NodeKind::Dashboard => {
                &[Phase::Deploy, Phase::Destroy]
            }
            NodeKind::EutSite | NodeKind::RteShare | NodeKind::RteComponent | NodeKind::Collector => {
                &[Phase::Deploy, Phase::Artifacts, Phase::Destroy]
            }
            NodeKind::Report => &[Phase::Deploy, Phase::Artifacts],
            NodeKind::Rte => &[],
            NodeKind::Test => &[Phase::Test, Phase::Artifacts],
            NodeKind::Verification => &[Phase::Verify, Phase::Artifacts],
        }
    }

    /// The phase whose output an `artifacts` job collects.
    pub fn producing_phase(&self) -> Option<Phase> {
        match self {
            NodeKind::Rte => None,
            NodeKind::Test => Some(Phase::Test),
            NodeKind::Verification => Some(Phase::Verify),
            _ => Some(Phase::Deploy),
        }
    }

    /// Infrastructure is built by `deploy` and torn down by `destroy`.
    pub fn is_infrastructure(&self) -> bool {
        !matches!(
            self,
            NodeKind::Rte | NodeKind::Test | NodeKind::Verification
        )
    }

    pub fn supports(&self, phase: Phase) -> bool {
        self.capabilities().contains(&phase)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Relation carried by a [`DependencyEdge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// `from` owns `to`.
    Structural,
    /// `to` consumes an artifact produced by `from`.
    Artifact,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
}

/// A declared topology object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Canonical reference, e.g. `test/myrte/smoke`.
    pub key: String,
    pub kind: NodeKind,
    pub name: String,
    /// Identifying segments used for action targets, e.g. `[myrte, smoke]`.
    pub path: Vec<String>,
    /// Kebab-case identifier; job ids append the phase.
    pub job_id: String,
    pub provider: Option<String>,
    /// Key of the owning node.
    pub parent: Option<String>,
    pub scripts: BTreeMap<Phase, Vec<String>>,
    pub artifacts: Vec<String>,
    pub variables: BTreeMap<String, String>,
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Node {
    /// Hyphen-joined `path`, the exact-match form of an action target.
    pub fn path_id(&self) -> String {
        super::naming::job_id(&self.path)
    }

    /// Declared phases, in phase precedence order.
    pub fn phases(&self) -> impl Iterator<Item = Phase> + '_ {
        self.scripts.keys().copied()
    }

    pub fn has_phase(&self, phase: Phase) -> bool {
        self.scripts.contains_key(&phase)
    }

    pub fn has_jobs(&self) -> bool {
        !self.scripts.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Job id for one of this node's phases.
    pub fn phase_job_id(&self, phase: Phase) -> String {
        format!("{}-{}", self.job_id, phase.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_verifications_verify() {
        let verifying: Vec<NodeKind> = [
            NodeKind::Project,
            NodeKind::EutSite,
            NodeKind::Feature,
            NodeKind::Rte,
            NodeKind::RteShare,
            NodeKind::RteComponent,
            NodeKind::Test,
            NodeKind::Verification,
            NodeKind::Application,
            NodeKind::Collector,
            NodeKind::Report,
            NodeKind::Dashboard,
        ]
        .into_iter()
        .filter(|k| k.supports(Phase::Verify))
        .collect();
        assert_eq!(verifying, vec![NodeKind::Verification]);
    }

    #[test]
    fn test_apply_maps_by_kind() {
        assert_eq!(Phase::from_script_key(NodeKind::Test, "apply"), Some(Phase::Test));
        assert_eq!(
            Phase::from_script_key(NodeKind::Verification, "apply"),
            Some(Phase::Verify)
        );
        assert_eq!(
            Phase::from_script_key(NodeKind::RteShare, "apply"),
            Some(Phase::Deploy)
        );
        assert_eq!(Phase::from_script_key(NodeKind::RteShare, "plan"), None);
    }

    #[test]
    fn test_rte_is_a_pure_container() {
        assert!(NodeKind::Rte.capabilities().is_empty());
        assert!(NodeKind::Rte.producing_phase().is_none());
        assert!(!NodeKind::Rte.is_infrastructure());
    }

    #[test]
    fn test_phase_order_is_precedence() {
        let mut phases = vec![Phase::Destroy, Phase::Verify, Phase::Deploy, Phase::Test];
        phases.sort();
        assert_eq!(
            phases,
            vec![Phase::Deploy, Phase::Test, Phase::Verify, Phase::Destroy]
        );
    }
}
