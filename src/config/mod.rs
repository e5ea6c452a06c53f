// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! Run configuration
//!
//! Loaded from `.contentflow.toml` in the working directory, or from
//! `config.toml` in the user config directory. Every section is optional.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{ContentflowError, ContentflowResult};
use crate::pipeline::{RunOptions, Stage, StagePolicies};
use crate::promotion::PromotionPolicy;
use crate::reconcile::{CallSettings, FailurePolicy, PollSettings};

/// File name looked up in the working directory
pub const CONFIG_FILE: &str = ".contentflow.toml";

/// Settings file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Organization for records that do not name one
    pub organization: Option<String>,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub promotion: PromotionConfig,
}

/// Server endpoint and where its credentials come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    pub url: Option<String>,

    /// Environment variable holding the user name
    #[serde(default = "default_username_env")]
    pub username_env: String,

    /// Environment variable holding the password
    #[serde(default = "default_password_env")]
    pub password_env: String,

    #[serde(default = "default_true")]
    pub verify_tls: bool,
}

fn default_username_env() -> String {
    "CONTENTFLOW_USERNAME".to_string()
}

fn default_password_env() -> String {
    "CONTENTFLOW_PASSWORD".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: None,
            username_env: default_username_env(),
            password_env: default_password_env(),
            verify_tls: true,
        }
    }
}

/// Concurrency, timeouts and retries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionConfig {
    pub concurrency: usize,
    pub call_timeout_secs: u64,
    pub retries: u32,
    pub retry_backoff_ms: u64,
    pub poll_interval_secs: u64,
    pub max_poll_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            call_timeout_secs: 60,
            retries: 3,
            retry_backoff_ms: 500,
            poll_interval_secs: 5,
            max_poll_secs: 3600,
        }
    }
}

/// Failure policy per stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    pub default: FailurePolicy,

    /// Stages that abort the run on the first failure
    pub fail_fast: Vec<Stage>,

    /// Stages that keep going whatever the default
    #[serde(rename = "continue")]
    pub continue_on_failure: Vec<Stage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PromotionConfig {
    pub auto_publish: bool,
    pub auto_promote: bool,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            auto_publish: false,
            auto_promote: true,
        }
    }
}

impl RunConfig {
    /// Load from an explicit path
    pub fn from_file(path: &Path) -> ContentflowResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ContentflowError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        let config = Self::from_toml(&content)?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> ContentflowResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.check()?;
        Ok(config)
    }

    /// Find and load the configuration; defaults when no file exists.
    ///
    /// An explicit path must exist.
    pub fn discover(explicit: Option<&Path>, cwd: &Path) -> ContentflowResult<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(ContentflowError::FileNotFound {
                    path: path.to_path_buf(),
                    help: Some("Pass an existing file to --config".into()),
                });
            }
            return Self::from_file(path);
        }

        match Self::candidates(cwd).into_iter().find(|p| p.is_file()) {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    fn candidates(cwd: &Path) -> Vec<PathBuf> {
        let mut paths = vec![cwd.join(CONFIG_FILE)];
        if let Some(dirs) = ProjectDirs::from("", "", "contentflow") {
            paths.push(dirs.config_dir().join("config.toml"));
        }
        paths
    }

    fn check(&self) -> ContentflowResult<()> {
        if self.execution.concurrency == 0 {
            return Err(ContentflowError::Config {
                message: "execution.concurrency must be at least 1".into(),
                help: None,
            });
        }
        if let Some(stage) = self
            .policy
            .fail_fast
            .iter()
            .find(|s| self.policy.continue_on_failure.contains(s))
        {
            return Err(ContentflowError::Config {
                message: format!("stage '{}' is listed as both fail_fast and continue", stage),
                help: Some("Keep the stage in one of the two lists".into()),
            });
        }
        Ok(())
    }

    pub fn call_settings(&self) -> CallSettings {
        CallSettings {
            timeout: Duration::from_secs(self.execution.call_timeout_secs),
            retries: self.execution.retries,
            backoff: Duration::from_millis(self.execution.retry_backoff_ms),
        }
    }

    pub fn stage_policies(&self) -> StagePolicies {
        let mut overrides = BTreeMap::new();
        for stage in &self.policy.fail_fast {
            overrides.insert(*stage, FailurePolicy::FailFast);
        }
        for stage in &self.policy.continue_on_failure {
            overrides.insert(*stage, FailurePolicy::Continue);
        }
        StagePolicies {
            default: self.policy.default,
            overrides,
        }
    }

    /// Options for a full run; callers narrow the stage selection
    pub fn to_run_options(&self) -> RunOptions {
        RunOptions {
            policies: self.stage_policies(),
            call: self.call_settings(),
            concurrency: self.execution.concurrency,
            promotion: PromotionPolicy {
                auto_publish: self.promotion.auto_publish,
                auto_promote: self.promotion.auto_promote,
                poll: PollSettings {
                    interval: Duration::from_secs(self.execution.poll_interval_secs),
                    deadline: Duration::from_secs(self.execution.max_poll_secs),
                },
            },
            ..RunOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = RunConfig::from_toml("").unwrap();
        assert_eq!(config, RunConfig::default());
        assert_eq!(config.execution.concurrency, 4);
        assert!(config.promotion.auto_promote);
        assert_eq!(config.remote.username_env, "CONTENTFLOW_USERNAME");
    }

    #[test]
    fn test_full_file() {
        let config = RunConfig::from_toml(
            r#"
organization = "ACME"

[remote]
url = "https://satellite.example.com"
verify_tls = false

[execution]
concurrency = 8
retries = 1

[policy]
default = "fail_fast"
continue = ["sync_plans"]

[promotion]
auto_publish = true
"#,
        )
        .unwrap();

        assert_eq!(config.organization.as_deref(), Some("ACME"));
        assert!(!config.remote.verify_tls);
        assert_eq!(config.execution.call_timeout_secs, 60);

        let options = config.to_run_options();
        assert_eq!(options.concurrency, 8);
        assert_eq!(options.call.retries, 1);
        assert!(options.promotion.auto_publish);
        assert_eq!(options.policies.for_stage(Stage::Products), FailurePolicy::FailFast);
        assert_eq!(options.policies.for_stage(Stage::SyncPlans), FailurePolicy::Continue);
        assert_eq!(options.selections.len(), Stage::ALL.len());
    }

    #[test]
    fn test_rejects_unknown_keys() {
        assert!(RunConfig::from_toml("[execution]\nthreads = 2\n").is_err());
    }

    #[test]
    fn test_rejects_conflicting_policies() {
        let result = RunConfig::from_toml(
            "[policy]\nfail_fast = [\"products\"]\ncontinue = [\"products\"]\n",
        );
        assert!(matches!(result, Err(ContentflowError::Config { .. })));
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        assert!(RunConfig::from_toml("[execution]\nconcurrency = 0\n").is_err());
    }

    #[test]
    fn test_discover_in_working_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "organization = \"Lab\"\n").unwrap();

        let config = RunConfig::discover(None, dir.path()).unwrap();
        assert_eq!(config.organization.as_deref(), Some("Lab"));
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            RunConfig::discover(Some(&missing), dir.path()),
            Err(ContentflowError::FileNotFound { .. })
        ));
    }
}
