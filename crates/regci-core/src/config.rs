//! Topology document model and loader.
//!
//! The document is delivered fully resolved: no includes or templates reach
//! this layer. Every object accepts the same job fields (see [`JobSpecConfig`]).

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::lifecycle::FailureKind;

/// Root of a topology document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TopologyConfig {
    pub project: ProjectConfig,

    /// Explicit timeout and retry defaults; there is no built-in fallback.
    pub defaults: DefaultsConfig,

    pub eut: EutConfig,

    #[serde(default)]
    pub features: Vec<ObjectConfig>,

    #[serde(default)]
    pub applications: Vec<ObjectConfig>,

    #[serde(default)]
    pub rtes: Vec<RteConfig>,

    #[serde(default)]
    pub collectors: Vec<ObjectConfig>,

    #[serde(default)]
    pub reports: Vec<ObjectConfig>,

    #[serde(default)]
    pub dashboard: Option<ObjectConfig>,
}

/// Fields shared by every object that can own jobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobSpecConfig {
    /// Script key (`deploy`, `artifacts`, `destroy`, `apply`) to commands.
    pub scripts: BTreeMap<String, Vec<String>>,

    /// Keys of nodes whose artifacts this object consumes.
    pub needs: Vec<String>,

    /// Artifact paths relative to the job's artifact namespace.
    pub artifacts: Vec<String>,

    pub variables: BTreeMap<String, String>,

    pub provider: Option<String>,

    pub timeout_secs: Option<u64>,

    pub retry: Option<RetryConfig>,

    /// Keys matching no known field. The topology loader rejects them.
    #[serde(flatten)]
    pub unknown: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectConfig {
    pub name: String,

    /// Prefix for every job identifier.
    pub module: String,

    #[serde(flatten)]
    pub spec: JobSpecConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DefaultsConfig {
    pub timeout_secs: u64,

    pub retry: RetryConfig,

    #[serde(default = "default_artifacts_root")]
    pub artifacts_root: String,
}

fn default_artifacts_root() -> String {
    "artifacts".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Re-runs allowed after the first attempt.
    pub max: u32,

    #[serde(default)]
    pub when: Vec<FailureKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EutConfig {
    pub name: String,

    #[serde(default)]
    pub sites: Vec<ObjectConfig>,
}

/// A named object with no nested children.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectConfig {
    pub name: String,

    #[serde(flatten)]
    pub spec: JobSpecConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RteConfig {
    pub name: String,

    #[serde(default)]
    pub shares: Vec<ObjectConfig>,

    #[serde(default)]
    pub components: Vec<ComponentConfig>,

    #[serde(default)]
    pub tests: Vec<TestConfig>,

    #[serde(flatten)]
    pub spec: JobSpecConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentConfig {
    pub name: String,

    /// EUT site the component is placed on; implies an artifact dependency.
    #[serde(default)]
    pub site: Option<String>,

    #[serde(flatten)]
    pub spec: JobSpecConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestConfig {
    pub name: String,

    #[serde(default)]
    pub verifications: Vec<ObjectConfig>,

    #[serde(flatten)]
    pub spec: JobSpecConfig,
}

impl TopologyConfig {
    /// Parse a topology document from a JSON string.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Read and parse a topology document from disk.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Loading topology document");
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}
