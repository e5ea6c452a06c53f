// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! Published versions of a content view

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::LifecycleChain;
use crate::remote::{ENVIRONMENTS_KEY, LATEST_VERSION_KEY};
use crate::resources::LIBRARY;

/// Which version of a content view sits in which environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublishState {
    /// Latest published version; 0 when never published
    latest: u32,
    environments: BTreeMap<String, u32>,
}

/// Where a content view stands on its chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ContentViewState {
    Unpublished,
    /// Latest version is only in Library
    Published { version: u32 },
    /// Latest version has reached `environment`
    Promoted { version: u32, environment: String },
}

fn as_version(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.split('.').next()?.parse().ok(),
        _ => None,
    }
}

impl PublishState {
    /// Read the state from a content view as the server reports it
    pub fn from_attributes(attributes: &Map<String, Value>) -> Self {
        let latest = attributes
            .get(LATEST_VERSION_KEY)
            .and_then(as_version)
            .unwrap_or(0);
        let mut environments: BTreeMap<String, u32> = attributes
            .get(ENVIRONMENTS_KEY)
            .and_then(Value::as_object)
            .map(|envs| {
                envs.iter()
                    .filter_map(|(env, v)| Some((env.clone(), as_version(v)?)))
                    .collect()
            })
            .unwrap_or_default();
        if latest > 0 {
            environments.insert(LIBRARY.to_string(), latest);
        }
        Self {
            latest,
            environments,
        }
    }

    pub fn latest(&self) -> Option<u32> {
        (self.latest > 0).then_some(self.latest)
    }

    pub fn is_published(&self) -> bool {
        self.latest > 0
    }

    /// Version currently in an environment
    pub fn version_in(&self, environment: &str) -> Option<u32> {
        self.environments.get(environment).copied()
    }

    /// A new version was published; Library always holds the latest
    pub fn record_publish(&mut self, version: u32) {
        self.latest = self.latest.max(version);
        self.environments.insert(LIBRARY.to_string(), self.latest);
    }

    pub fn record_promotion(&mut self, environment: &str, version: u32) {
        self.environments.insert(environment.to_string(), version);
    }

    /// Furthest environment along the chain that holds `version`
    pub fn frontier<'a>(&self, version: u32, chain: &'a LifecycleChain) -> Option<&'a str> {
        chain
            .path()
            .into_iter()
            .rev()
            .find(|env| self.version_in(env) == Some(version))
    }

    pub fn status(&self, chain: &LifecycleChain) -> ContentViewState {
        let Some(latest) = self.latest() else {
            return ContentViewState::Unpublished;
        };
        match self.frontier(latest, chain) {
            Some(env) if env != LIBRARY => ContentViewState::Promoted {
                version: latest,
                environment: env.to_string(),
            },
            _ => ContentViewState::Published { version: latest },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chain() -> LifecycleChain {
        LifecycleChain::new(
            "ACME",
            vec!["Development".into(), "QA".into(), "Production".into()],
        )
    }

    #[test]
    fn test_from_attributes() {
        let attrs = json!({
            "latest_version": "3.0",
            "environments": {"Development": 2, "QA": "1.0"}
        });
        let state = PublishState::from_attributes(attrs.as_object().unwrap());
        assert_eq!(state.latest(), Some(3));
        assert_eq!(state.version_in(LIBRARY), Some(3));
        assert_eq!(state.version_in("QA"), Some(1));
    }

    #[test]
    fn test_never_published() {
        let state = PublishState::from_attributes(&Map::new());
        assert!(!state.is_published());
        assert_eq!(state.status(&chain()), ContentViewState::Unpublished);
    }

    #[test]
    fn test_frontier_moves_with_promotions() {
        let chain = chain();
        let mut state = PublishState::default();
        state.record_publish(1);
        assert_eq!(state.frontier(1, &chain), Some(LIBRARY));

        state.record_promotion("Development", 1);
        state.record_promotion("QA", 1);
        assert_eq!(state.frontier(1, &chain), Some("QA"));
        assert_eq!(
            state.status(&chain),
            ContentViewState::Promoted {
                version: 1,
                environment: "QA".into()
            }
        );

        state.record_publish(2);
        assert_eq!(state.status(&chain), ContentViewState::Published { version: 2 });
        assert_eq!(state.version_in("QA"), Some(1));
    }
}
