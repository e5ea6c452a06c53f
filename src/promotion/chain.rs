// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! Lifecycle environment chains

use serde::Serialize;

use crate::resources::LIBRARY;

/// The ordered promotion path of one organization, rooted at Library
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleChain {
    organization: String,
    /// Declared environments in promotion order, Library excluded
    environments: Vec<String>,
}

impl LifecycleChain {
    pub fn new(organization: &str, environments: Vec<String>) -> Self {
        Self {
            organization: organization.to_string(),
            environments,
        }
    }

    /// A chain with nothing beyond Library
    pub fn library_only(organization: &str) -> Self {
        Self::new(organization, Vec::new())
    }

    pub fn organization(&self) -> &str {
        &self.organization
    }

    /// Declared environments after Library
    pub fn environments(&self) -> &[String] {
        &self.environments
    }

    /// First environment after Library, the target of automatic promotion
    pub fn first(&self) -> Option<&str> {
        self.environments.first().map(String::as_str)
    }

    /// Position along the chain; Library is 0
    pub fn position(&self, environment: &str) -> Option<usize> {
        if environment == LIBRARY {
            return Some(0);
        }
        self.environments
            .iter()
            .position(|e| e == environment)
            .map(|i| i + 1)
    }

    /// Environment immediately after `environment`
    pub fn successor(&self, environment: &str) -> Option<&str> {
        let position = self.position(environment)?;
        self.environments.get(position).map(String::as_str)
    }

    /// Whole path including Library
    pub fn path(&self) -> Vec<&str> {
        std::iter::once(LIBRARY)
            .chain(self.environments.iter().map(String::as_str))
            .collect()
    }
}

impl std::fmt::Display for LifecycleChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path().join(" → "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> LifecycleChain {
        LifecycleChain::new(
            "ACME",
            vec!["Development".into(), "QA".into(), "Production".into()],
        )
    }

    #[test]
    fn test_positions_and_successors() {
        let chain = chain();
        assert_eq!(chain.position(LIBRARY), Some(0));
        assert_eq!(chain.position("QA"), Some(2));
        assert_eq!(chain.position("Staging"), None);
        assert_eq!(chain.successor(LIBRARY), Some("Development"));
        assert_eq!(chain.successor("QA"), Some("Production"));
        assert_eq!(chain.successor("Production"), None);
        assert_eq!(chain.first(), Some("Development"));
    }

    #[test]
    fn test_library_only_chain() {
        let chain = LifecycleChain::library_only("ACME");
        assert_eq!(chain.first(), None);
        assert_eq!(chain.successor(LIBRARY), None);
        assert_eq!(chain.to_string(), "Library");
    }
}
