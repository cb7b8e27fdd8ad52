//! Job identifier derivation and node name validation.
//!
//! Every identifier in a compiled graph goes through [`job_id`] exactly once,
//! when the owning node is constructed. Nothing downstream rewrites names.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{RegciError, Result};

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("static name pattern is valid")
    })
}

/// Normalise a single segment to kebab-case.
///
/// Lowercases, maps `_`, `/`, `.` and whitespace to `-`, collapses runs of
/// `-` and trims leading/trailing separators.
pub fn kebab(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for ch in segment.chars() {
        let mapped = match ch {
            '_' | '/' | '.' => '-',
            c if c.is_whitespace() => '-',
            c => c.to_ascii_lowercase(),
        };
        if mapped == '-' && (out.is_empty() || out.ends_with('-')) {
            continue;
        }
        out.push(mapped);
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Join segments into a kebab-case identifier.
///
/// `job_id(&["s8", "rte", "my_rte", "web"])` yields `s8-rte-my-rte-web`.
pub fn job_id<S: AsRef<str>>(segments: &[S]) -> String {
    segments
        .iter()
        .map(|s| kebab(s.as_ref()))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Validate a user-supplied object name.
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(RegciError::Config(format!(
            "invalid {kind} name '{name}': names must start with an alphanumeric character \
             and contain only alphanumerics, '_', '.' or '-'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kebab_replaces_separators() {
        assert_eq!(kebab("My_RTE.v2"), "my-rte-v2");
        assert_eq!(kebab("a__b"), "a-b");
        assert_eq!(kebab("-edge-"), "edge");
    }

    #[test]
    fn test_job_id_joins_segments() {
        assert_eq!(job_id(&["s8", "test", "my_rte", "smoke"]), "s8-test-my-rte-smoke");
    }

    #[test]
    fn test_job_id_skips_empty_segments() {
        assert_eq!(job_id(&["s8", "", "site1"]), "s8-site1");
    }

    #[test]
    fn test_underscore_and_hyphen_names_collide() {
        assert_eq!(job_id(&["web_1"]), job_id(&["web-1"]));
    }

    #[test]
    fn test_validate_name_rejects_slashes_and_spaces() {
        assert!(validate_name("site", "site1").is_ok());
        assert!(validate_name("site", "eu_west.1").is_ok());
        assert!(validate_name("site", "a/b").is_err());
        assert!(validate_name("site", "has space").is_err());
        assert!(validate_name("site", "").is_err());
        assert!(validate_name("site", "-lead").is_err());
    }
}
