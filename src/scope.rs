//! Active scope of an API gate: the Kubernetes namespace requests are made in.

use crate::error::ConfigError;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Longest namespace name Kubernetes accepts (DNS-1123 label).
const MAX_NAMESPACE_LEN: usize = 63;

fn namespace_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("namespace pattern compiles"))
}

/// Namespace a gate is scoped to. `None` means cluster-wide requests.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Scope {
    namespace: Option<String>,
}

impl Scope {
    pub fn cluster() -> Self {
        Scope { namespace: None }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}

impl std::str::FromStr for Scope {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        if name.is_empty() {
            return Ok(Scope::cluster());
        }
        if name.len() > MAX_NAMESPACE_LEN || !namespace_pattern().is_match(name) {
            return Err(ConfigError::InvalidNamespace(name.to_string()));
        }
        Ok(Scope {
            namespace: Some(name.to_string()),
        })
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "namespace {}", ns),
            None => f.write_str("cluster"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_namespaces() {
        let scope: Scope = "kubeflow".parse().unwrap();
        assert_eq!(scope.namespace(), Some("kubeflow"));
        let scope: Scope = " team-a1 ".parse().unwrap();
        assert_eq!(scope.namespace(), Some("team-a1"));
    }

    #[test]
    fn blank_means_cluster_scope() {
        let scope: Scope = "".parse().unwrap();
        assert_eq!(scope, Scope::cluster());
        assert_eq!(scope.to_string(), "cluster");
    }

    #[test]
    fn rejects_invalid_names() {
        for bad in ["Kubeflow", "-lead", "trail-", "under_score", &"a".repeat(64)] {
            assert_eq!(
                bad.parse::<Scope>(),
                Err(ConfigError::InvalidNamespace(bad.to_string())),
                "{bad}"
            );
        }
    }
}
