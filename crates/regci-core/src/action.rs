//! Action grammar and resolution.
//!
//! An action token is `verb ["-" target]`, lowercase kebab-case. Verbs are
//! matched longest first, so `test-and-verify-myrte` is the verb
//! `test-and-verify` with target `myrte`, never `test` with target
//! `and-verify-myrte`.
//!
//! ```text
//! deploy                 every deploy job
//! test-myrte-mytest      the test job of test/myrte/mytest plus its upstream closure
//! regression             every job
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{RegciError, Result};
use crate::graph::JobGraph;
use crate::obs;
use crate::topology::{Node, Phase};

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("static action pattern is valid")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verb {
    Deploy,
    Artifacts,
    Destroy,
    Test,
    Verify,
    TestAndVerify,
    Regression,
}

impl Verb {
    /// All verbs, longest token first.
    pub const BY_LENGTH: [Verb; 7] = [
        Verb::TestAndVerify,
        Verb::Regression,
        Verb::Artifacts,
        Verb::Destroy,
        Verb::Deploy,
        Verb::Verify,
        Verb::Test,
    ];

    pub fn token(&self) -> &'static str {
        match self {
            Verb::Deploy => "deploy",
            Verb::Artifacts => "artifacts",
            Verb::Destroy => "destroy",
            Verb::Test => "test",
            Verb::Verify => "verify",
            Verb::TestAndVerify => "test-and-verify",
            Verb::Regression => "regression",
        }
    }

    /// Phases whose jobs this verb selects.
    pub fn phases(&self) -> &'static [Phase] {
        match self {
            Verb::Deploy => &[Phase::Deploy],
            Verb::Artifacts => &[Phase::Artifacts],
            Verb::Destroy => &[Phase::Destroy],
            Verb::Test => &[Phase::Test],
            Verb::Verify => &[Phase::Verify],
            Verb::TestAndVerify => &[Phase::Test, Phase::Verify],
            Verb::Regression => &Phase::ALL,
        }
    }

    pub fn selects(&self, phase: Phase) -> bool {
        self.phases().contains(&phase)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// A parsed action token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub verb: Verb,
    /// Kebab-case target path, e.g. `myrte-mytest`.
    pub target: Option<String>,
}

impl Action {
    /// Parse a raw token. Surrounding whitespace and case are ignored.
    pub fn parse(raw: &str) -> Result<Self> {
        let token = raw.trim().to_ascii_lowercase();
        if token.is_empty() {
            return Err(RegciError::unknown_action(raw, "empty action"));
        }
        if !token_pattern().is_match(&token) {
            return Err(RegciError::unknown_action(
                raw,
                "expected lowercase words separated by single '-'",
            ));
        }

        for verb in Verb::BY_LENGTH {
            if token == verb.token() {
                return Ok(Self { verb, target: None });
            }
            if let Some(target) = token
                .strip_prefix(verb.token())
                .and_then(|rest| rest.strip_prefix('-'))
            {
                return Ok(Self {
                    verb,
                    target: Some(target.to_string()),
                });
            }
        }
        Err(RegciError::unknown_action(raw, "unknown verb"))
    }
}

impl FromStr for Action {
    type Err = RegciError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "{}-{}", self.verb, target),
            None => write!(f, "{}", self.verb),
        }
    }
}

/// The subset of a compiled graph an action runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    /// `None` for a manual run without an action.
    pub action: Option<Action>,
    pub jobs: BTreeSet<String>,
    /// Every job waits for a manual start.
    pub manual: bool,
}

impl Selection {
    pub fn contains(&self, job_id: &str) -> bool {
        self.jobs.contains(job_id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Display label: the action token, or `manual`.
    pub fn label(&self) -> String {
        self.action
            .as_ref()
            .map(Action::to_string)
            .unwrap_or_else(|| "manual".to_string())
    }
}

/// Resolve an action token against a compiled graph.
pub fn resolve(graph: &JobGraph, token: &str) -> Result<Selection> {
    let action = Action::parse(token)?;
    resolve_action(graph, action)
}

/// Resolve an already parsed action.
pub fn resolve_action(graph: &JobGraph, action: Action) -> Result<Selection> {
    let jobs = select(graph, &action)?;
    let selection = Selection {
        action: Some(action),
        jobs,
        manual: false,
    };
    obs::emit_action_resolved(&selection.label(), selection.len(), selection.manual);
    Ok(selection)
}

/// Job ids an action selects, without emitting events.
pub(crate) fn select(graph: &JobGraph, action: &Action) -> Result<BTreeSet<String>> {
    let verb = action.verb;
    match &action.target {
        None => {
            let jobs: BTreeSet<String> = graph
                .jobs()
                .iter()
                .filter(|j| verb.selects(j.phase))
                .map(|j| j.job_id.clone())
                .collect();
            if jobs.is_empty() {
                return Err(RegciError::unknown_action(
                    &action.to_string(),
                    format!("no {verb} jobs in the compiled graph"),
                ));
            }
            Ok(jobs)
        }
        Some(target) => {
            let node = match_target(graph, action, target)?;
            let seeds = scope_jobs(graph, node, verb);
            Ok(graph
                .closure(seeds)
                .into_iter()
                .map(|i| graph.job_at(i).job_id.clone())
                .collect())
        }
    }
}

/// Indices of the verb's jobs on `node` and its descendants.
fn scope_jobs(graph: &JobGraph, node: &Node, verb: Verb) -> Vec<usize> {
    let topology = graph.topology();
    std::iter::once(node)
        .chain(topology.descendants(&node.key))
        .flat_map(|n| {
            n.phases()
                .filter(|&p| verb.selects(p))
                .map(|p| n.phase_job_id(p))
                .collect::<Vec<_>>()
        })
        .filter_map(|id| graph.index_of(&id))
        .collect()
}

/// Find the single node a target names. Exact path matches win over
/// job-id suffix matches.
pub(crate) fn match_target<'g>(graph: &'g JobGraph, action: &Action, target: &str) -> Result<&'g Node> {
    let verb = action.verb;
    let nodes = graph.topology().nodes();
    let suffix = format!("-{target}");
    let exact = |n: &&Node| n.path_id() == target;
    let by_suffix = |n: &&Node| n.job_id.ends_with(&suffix);

    let in_scope: Vec<&Node> = nodes
        .iter()
        .filter(|n| !scope_jobs(graph, n, verb).is_empty())
        .collect();

    let mut matches: Vec<&Node> = in_scope.iter().copied().filter(exact).collect();
    if matches.is_empty() {
        matches = in_scope.iter().copied().filter(by_suffix).collect();
    }

    match matches.as_slice() {
        [node] => Ok(*node),
        [] => {
            let named = nodes.iter().any(|n| exact(&n) || by_suffix(&n));
            let reason = if named {
                format!("target '{target}' has no {verb} jobs")
            } else {
                format!("no node matches target '{target}'")
            };
            Err(RegciError::unknown_action(&action.to_string(), reason))
        }
        many => Err(RegciError::AmbiguousAction {
            action: action.to_string(),
            candidates: many.iter().map(|n| n.key.clone()).collect(),
        }),
    }
}

/// Raw trigger inputs: the `ACTION` variable and the triggered flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub action: Option<String>,
    /// The pipeline was started by an API trigger rather than by hand.
    pub triggered: bool,
}

impl Trigger {
    /// Build a trigger from environment-style values. Blank actions count as
    /// absent; the flag accepts `1/true/yes/on` and `0/false/no/off`.
    pub fn from_values(action: Option<&str>, triggered: Option<&str>) -> Result<Self> {
        let action = action
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string);
        let triggered = match triggered.map(|t| t.trim().to_ascii_lowercase()) {
            None => false,
            Some(flag) => match flag.as_str() {
                "" | "0" | "false" | "no" | "off" => false,
                "1" | "true" | "yes" | "on" => true,
                other => {
                    return Err(RegciError::Config(format!(
                        "invalid triggered flag '{other}'"
                    )))
                }
            },
        };
        Ok(Self { action, triggered })
    }
}

/// Resolve a trigger.
///
/// With an action, resolves it normally. A triggered run without an action
/// is rejected; a manual run without one offers the whole graph with every
/// job gated behind a manual start.
pub fn resolve_trigger(graph: &JobGraph, trigger: &Trigger) -> Result<Selection> {
    match (&trigger.action, trigger.triggered) {
        (Some(action), _) => resolve(graph, action),
        (None, true) => Err(RegciError::unknown_action(
            "",
            "triggered pipeline requires an action",
        )),
        (None, false) => {
            let selection = Selection {
                action: None,
                jobs: graph.jobs().iter().map(|j| j.job_id.clone()).collect(),
                manual: true,
            };
            obs::emit_action_resolved(&selection.label(), selection.len(), true);
            Ok(selection)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ObjectConfig;
    use crate::graph::compile;
    use crate::testing::{scenario_config, scripts};
    use crate::topology::Topology;

    fn graph() -> JobGraph {
        compile(&Topology::load(&scenario_config()).unwrap()).unwrap()
    }

    #[test]
    fn test_verbs_match_longest_first() {
        let a = Action::parse("test-and-verify-myrte").unwrap();
        assert_eq!(a.verb, Verb::TestAndVerify);
        assert_eq!(a.target.as_deref(), Some("myrte"));

        let b = Action::parse("  Test-MyRte-MyTest ").unwrap();
        assert_eq!(b.verb, Verb::Test);
        assert_eq!(b.target.as_deref(), Some("myrte-mytest"));
        assert_eq!(b.to_string(), "test-myrte-mytest");
    }

    #[test]
    fn test_malformed_tokens_are_unknown() {
        for raw in ["", "deploy--x", "-deploy", "deploy_x", "launch", "deployx"] {
            let err = Action::parse(raw).unwrap_err();
            assert!(matches!(err, RegciError::UnknownAction { .. }), "{raw}");
        }
    }

    #[test]
    fn test_untargeted_deploy_excludes_artifacts() {
        let sel = resolve(&graph(), "deploy").unwrap();
        assert!(sel.jobs.iter().all(|j| j.ends_with("-deploy")));
        assert_eq!(sel.len(), 3);
    }

    #[test]
    fn test_exact_path_beats_suffix() {
        // "myrte-mytest" is the test's path; the verification's job id also
        // contains it but does not end with it.
        let sel = resolve(&graph(), "test-and-verify-myrte-mytest").unwrap();
        assert!(sel.contains("s8-test-myrte-mytest-test"));
        assert!(sel.contains("s8-verification-myrte-mytest-logs-verify"));
    }

    #[test]
    fn test_suffix_match_on_segment_boundary() {
        let sel = resolve(&graph(), "verify-logs").unwrap();
        assert!(sel.contains("s8-verification-myrte-mytest-logs-verify"));
        assert!(resolve(&graph(), "verify-ogs").is_err());
    }

    #[test]
    fn test_target_without_verb_phase_is_unknown() {
        let err = resolve(&graph(), "verify-myrte-web").unwrap_err();
        assert!(err.to_string().contains("has no verify jobs"));
    }

    #[test]
    fn test_equally_specific_targets_are_ambiguous() {
        let mut cfg = scenario_config();
        cfg.features.push(ObjectConfig {
            name: "site1".to_string(),
            spec: scripts(&[("deploy", &["enable"])]),
        });
        let g = compile(&Topology::load(&cfg).unwrap()).unwrap();
        match resolve(&g, "deploy-site1").unwrap_err() {
            RegciError::AmbiguousAction { candidates, .. } => {
                assert_eq!(candidates, vec!["site/site1", "feature/site1"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        // The full job id suffix still singles out the site.
        let sel = resolve(&g, "deploy-eut-edge-site1").unwrap();
        assert!(sel.contains("s8-eut-edge-site1-deploy"));
        assert!(!sel.contains("s8-feature-site1-deploy"));
    }

    #[test]
    fn test_trigger_flags() {
        let t = Trigger::from_values(Some(" deploy "), Some("YES")).unwrap();
        assert_eq!(t.action.as_deref(), Some("deploy"));
        assert!(t.triggered);
        assert!(!Trigger::from_values(None, Some("off")).unwrap().triggered);
        assert!(!Trigger::from_values(Some("  "), None).unwrap().triggered);
        assert!(Trigger::from_values(None, Some("maybe")).is_err());
    }

    #[test]
    fn test_manual_run_without_action_selects_everything() {
        let g = graph();
        let sel = resolve_trigger(&g, &Trigger::from_values(None, None).unwrap()).unwrap();
        assert!(sel.manual);
        assert_eq!(sel.len(), g.job_count());
        assert_eq!(sel.label(), "manual");
    }

    #[test]
    fn test_triggered_run_without_action_is_rejected() {
        let trigger = Trigger::from_values(None, Some("true")).unwrap();
        assert!(matches!(
            resolve_trigger(&graph(), &trigger),
            Err(RegciError::UnknownAction { .. })
        ));
    }
}
