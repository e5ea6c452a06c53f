// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! Error recovery suggestions
//!
//! Provides actionable suggestions for recovering from errors.

use crate::resources::ResourceKind;

/// A recovery suggestion with concrete steps
#[derive(Debug, Clone)]
pub struct RecoverySuggestion {
    /// Brief description of what to do
    pub action: String,
    /// Detailed steps
    pub steps: Vec<String>,
    /// Commands to run
    pub commands: Vec<String>,
}

impl RecoverySuggestion {
    /// Suggest declaring a record that something references
    pub fn declare_missing(kind: ResourceKind, name: &str, referencing: &str) -> Self {
        Self {
            action: format!("Declare {} '{}'", kind, name),
            steps: vec![
                format!("{} points at {} '{}', which is not declared", referencing, kind, name),
                format!(
                    "Add it under '{}:' or fix the spelling of the reference",
                    kind.document_key()
                ),
                "Nothing was sent to the server; the run stopped before any remote call".into(),
            ],
            commands: vec![
                "# Re-check the declarations:".into(),
                "contentflow validate".into(),
            ],
        }
    }

    /// Suggest fixing a reference cycle
    pub fn fix_cyclic_reference(records: &[String]) -> Self {
        Self {
            action: "Remove the reference cycle".into(),
            steps: vec![
                format!("Detected cycle: {}", records.join(" → ")),
                "Composite content views may only include plain content views".into(),
                "Lifecycle environments must chain back to Library without loops".into(),
            ],
            commands: vec![
                "# Visualize the reference graph:".into(),
                "contentflow plan --format mermaid".into(),
            ],
        }
    }

    /// Suggest promoting through the skipped environment first
    pub fn promote_in_order(content_view: &str, expected: &str) -> Self {
        Self {
            action: format!("Promote '{}' to '{}' first", content_view, expected),
            steps: vec![
                "Promotions move one lifecycle environment at a time".into(),
                "Skipping environments requires an explicit override".into(),
            ],
            commands: vec![
                format!("contentflow promote '{}' '{}'", content_view, expected),
                "".into(),
                "# Or skip environments deliberately:".into(),
                format!("contentflow promote '{}' <environment> --force", content_view),
            ],
        }
    }

    /// Suggest checking connectivity to the server
    pub fn check_remote() -> Self {
        Self {
            action: "Check the connection to the content server".into(),
            steps: vec![
                "Verify 'remote.url' in .contentflow.toml".into(),
                "Verify the credential environment variables are set".into(),
                "Re-running is safe: records that already exist are left unchanged".into(),
            ],
            commands: vec![
                "# Preview the run without contacting the server:".into(),
                "contentflow apply --simulate".into(),
            ],
        }
    }

    /// Suggest inspecting a long-running task on the server
    pub fn inspect_task(task: &str) -> Self {
        Self {
            action: format!("Inspect task '{}' on the server", task),
            steps: vec![
                "The task was still running when the poll deadline passed".into(),
                "Wait for it to finish, then re-run; finished work is detected as unchanged".into(),
                "Raise 'execution.max_poll_secs' for large repositories".into(),
            ],
            commands: vec![],
        }
    }

    /// Suggest creating a configuration file
    pub fn create_config() -> Self {
        Self {
            action: "Create a configuration file".into(),
            steps: vec![
                "No .contentflow.toml found in the current or user config directory".into(),
                "Defaults are used; set at least 'organization' and 'remote.url'".into(),
            ],
            commands: vec![
                "# Minimal configuration:".into(),
                "organization = \"ACME\"".into(),
                "[remote]".into(),
                "url = \"https://content.example.com\"".into(),
            ],
        }
    }
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "→ {}", self.action)?;

        for step in &self.steps {
            writeln!(f, "  {}", step)?;
        }

        if !self.commands.is_empty() {
            writeln!(f)?;
            for cmd in &self.commands {
                writeln!(f, "  {}", cmd)?;
            }
        }

        Ok(())
    }
}
