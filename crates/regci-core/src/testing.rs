//! Shared fixtures for unit tests.

use crate::config::{
    ComponentConfig, DefaultsConfig, EutConfig, JobSpecConfig, ObjectConfig, ProjectConfig,
    RetryConfig, RteConfig, TestConfig, TopologyConfig,
};
use crate::lifecycle::FailureKind;

/// Job fields with the given scripts and nothing else.
pub(crate) fn scripts(entries: &[(&str, &[&str])]) -> JobSpecConfig {
    JobSpecConfig {
        scripts: entries
            .iter()
            .map(|(key, cmds)| {
                (
                    key.to_string(),
                    cmds.iter().map(|c| c.to_string()).collect(),
                )
            })
            .collect(),
        ..JobSpecConfig::default()
    }
}

fn infra() -> JobSpecConfig {
    scripts(&[
        ("deploy", &["terraform apply"]),
        ("artifacts", &["terraform output -json > out.json"]),
        ("destroy", &["terraform destroy"]),
    ])
}

/// One site, one RTE with a share and a component placed on the site, one
/// test with one verification.
pub(crate) fn scenario_config() -> TopologyConfig {
    let mut component = infra();
    component.needs.push("share/myrte/nfs".to_string());
    component.artifacts.push("out.json".to_string());

    let mut test = scripts(&[("apply", &["pytest"]), ("artifacts", &["cp report.xml ."])]);
    test.artifacts.push("report.xml".to_string());

    TopologyConfig {
        project: ProjectConfig {
            name: "sense8".to_string(),
            module: "s8".to_string(),
            spec: JobSpecConfig {
                variables: [("REGION".to_string(), "eu-west-1".to_string())]
                    .into_iter()
                    .collect(),
                ..JobSpecConfig::default()
            },
        },
        defaults: DefaultsConfig {
            timeout_secs: 600,
            retry: RetryConfig {
                max: 1,
                when: vec![FailureKind::ScriptFailure, FailureKind::TimeoutFailure],
            },
            artifacts_root: "artifacts".to_string(),
        },
        eut: EutConfig {
            name: "edge".to_string(),
            sites: vec![ObjectConfig {
                name: "site1".to_string(),
                spec: infra(),
            }],
        },
        features: Vec::new(),
        applications: Vec::new(),
        rtes: vec![RteConfig {
            name: "myrte".to_string(),
            shares: vec![ObjectConfig {
                name: "nfs".to_string(),
                spec: infra(),
            }],
            components: vec![ComponentConfig {
                name: "web".to_string(),
                site: Some("site1".to_string()),
                spec: component,
            }],
            tests: vec![TestConfig {
                name: "mytest".to_string(),
                verifications: vec![ObjectConfig {
                    name: "logs".to_string(),
                    spec: scripts(&[("apply", &["grep -q PASS report.xml"])]),
                }],
                spec: test,
            }],
            spec: JobSpecConfig::default(),
        }],
        collectors: Vec::new(),
        reports: Vec::new(),
        dashboard: None,
    }
}
