// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! Error types with actionable messages
//!
//! Structural errors (validation, resolution) abort a run before any remote
//! call is made. Remote errors are normally captured into per-resource
//! outcomes, but they share this type so the reconciler and the promotion
//! engine can propagate them with `?` internally.

mod recovery;

pub use recovery::RecoverySuggestion;

use miette::Diagnostic;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::resources::ResourceKind;

/// Result type for contentflow operations
pub type ContentflowResult<T> = Result<T, ContentflowError>;

/// Main error type for contentflow
#[derive(Error, Debug, Diagnostic)]
pub enum ContentflowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Declaration Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Resource declarations are invalid: {}", .errors.join("; "))]
    #[diagnostic(
        code(contentflow::validation),
        help("Fix the listed declarations and re-run 'contentflow validate'")
    )]
    Validation { errors: Vec<String> },

    #[error("{referencing} references unknown {kind} '{name}'")]
    #[diagnostic(
        code(contentflow::unresolved_reference),
        help("Declare {kind} '{name}' in the same organization or correct the reference")
    )]
    UnresolvedReference {
        kind: ResourceKind,
        name: String,
        referencing: String,
    },

    #[error("Cyclic reference detected: {}", .records.join(" -> "))]
    #[diagnostic(
        code(contentflow::cyclic_reference),
        help("Composite content views and lifecycle environments must not reference each other in a loop")
    )]
    CyclicReference { records: Vec<String> },

    #[error("{referencing} reference '{name}' matches more than one kind: {kinds}")]
    #[diagnostic(
        code(contentflow::ambiguous_reference),
        help("Rename one of the declarations so the reference is unambiguous")
    )]
    AmbiguousReference {
        referencing: String,
        name: String,
        kinds: String,
    },

    #[error("{referencing} references {target}, which is applied in a later stage")]
    #[diagnostic(
        code(contentflow::reference_order),
        help("A record may only reference records of its own or an earlier stage")
    )]
    ReferenceOrder { referencing: String, target: String },

    #[error("Invalid lifecycle environment chain in organization '{organization}': {reason}")]
    #[diagnostic(
        code(contentflow::invalid_lifecycle_chain),
        help("Lifecycle environments must form a single chain starting at Library")
    )]
    InvalidLifecycleChain { organization: String, reason: String },

    #[error("Unknown stage tag '{tag}'")]
    #[diagnostic(
        code(contentflow::unknown_tag),
        help("Run 'contentflow stages' to list the available tags")
    )]
    UnknownTag { tag: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Remote Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Remote call '{operation}' failed: {message}")]
    #[diagnostic(code(contentflow::remote_call))]
    RemoteCall {
        operation: String,
        message: String,
        /// Whether retrying the same call may succeed
        retryable: bool,
    },

    #[error("Remote call '{operation}' timed out after {after:?}")]
    #[diagnostic(
        code(contentflow::timeout),
        help("Raise 'execution.call_timeout_secs' if the server is slow to answer")
    )]
    Timeout { operation: String, after: Duration },

    #[error("Task '{task}' did not finish within {after:?}")]
    #[diagnostic(
        code(contentflow::poll_timeout),
        help("The task may still be running on the server; check it there before re-running")
    )]
    PollTimeout { task: String, after: Duration },

    #[error("Task '{task}' failed: {message}")]
    #[diagnostic(code(contentflow::task_failed))]
    TaskFailed { task: String, message: String },

    #[error("{target} does not exist on the server")]
    #[diagnostic(
        code(contentflow::missing_dependency),
        help("Apply the stage that creates it first, or run without --tags")
    )]
    MissingDependency { target: String },

    #[error("Run was cancelled")]
    #[diagnostic(code(contentflow::cancelled))]
    Cancelled,

    // ─────────────────────────────────────────────────────────────────────────
    // Promotion Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error(
        "Cannot promote content view '{content_view}' to '{requested}': next environment is '{expected}'"
    )]
    #[diagnostic(
        code(contentflow::promotion_order),
        help("Promote through '{expected}' first, or pass --force to skip environments")
    )]
    PromotionOrder {
        content_view: String,
        requested: String,
        expected: String,
    },

    #[error("Cannot {operation} content view '{content_view}': {reason}")]
    #[diagnostic(code(contentflow::promotion_precondition))]
    PromotionPrecondition {
        content_view: String,
        operation: String,
        reason: String,
    },

    #[error("Content view '{name}' is not declared")]
    #[diagnostic(code(contentflow::unknown_content_view))]
    UnknownContentView { name: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(contentflow::config))]
    Config {
        message: String,
        #[help]
        help: Option<String>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // File Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("File not found: {path}")]
    #[diagnostic(code(contentflow::file_not_found))]
    FileNotFound {
        path: PathBuf,
        #[help]
        help: Option<String>,
    },

    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(contentflow::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("No declaration files matched: {pattern}")]
    #[diagnostic(
        code(contentflow::no_input_files),
        help("Check that files matching '{pattern}' exist")
    )]
    NoInputFiles { pattern: String },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("IO error: {message}")]
    #[diagnostic(code(contentflow::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(contentflow::yaml_error))]
    Yaml { message: String },

    #[error("JSON parsing error: {message}")]
    #[diagnostic(code(contentflow::json_error))]
    Json { message: String },

    #[error("TOML parsing error: {message}")]
    #[diagnostic(code(contentflow::toml_error))]
    Toml { message: String },

    #[error("Glob pattern error: {message}")]
    #[diagnostic(code(contentflow::glob_error))]
    GlobPattern { message: String },
}

impl From<std::io::Error> for ContentflowError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for ContentflowError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for ContentflowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl From<toml::de::Error> for ContentflowError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml { message: e.to_string() }
    }
}

impl From<glob::PatternError> for ContentflowError {
    fn from(e: glob::PatternError) -> Self {
        Self::GlobPattern { message: e.to_string() }
    }
}

impl From<reqwest::Error> for ContentflowError {
    fn from(e: reqwest::Error) -> Self {
        let operation = e
            .url()
            .map(|u| u.path().to_string())
            .unwrap_or_else(|| "http".to_string());
        Self::RemoteCall {
            operation,
            retryable: e.is_timeout() || e.is_connect(),
            message: e.to_string(),
        }
    }
}

impl ContentflowError {
    /// Create a remote call error that is worth retrying
    pub fn remote(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RemoteCall {
            operation: operation.into(),
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a remote call error that will fail the same way on retry
    pub fn remote_permanent(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RemoteCall {
            operation: operation.into(),
            message: message.into(),
            retryable: false,
        }
    }

    /// Errors raised while loading or resolving declarations
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::UnresolvedReference { .. }
                | Self::CyclicReference { .. }
                | Self::AmbiguousReference { .. }
                | Self::ReferenceOrder { .. }
                | Self::InvalidLifecycleChain { .. }
        )
    }

    /// Whether the reconciler may retry the call that produced this error
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RemoteCall { retryable, .. } => *retryable,
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Suggest how to recover, when there is something concrete to say
    pub fn recovery(&self) -> Option<RecoverySuggestion> {
        match self {
            Self::UnresolvedReference {
                kind,
                name,
                referencing,
            } => Some(RecoverySuggestion::declare_missing(*kind, name, referencing)),
            Self::CyclicReference { records } => {
                Some(RecoverySuggestion::fix_cyclic_reference(records))
            }
            Self::PromotionOrder {
                content_view,
                expected,
                ..
            } => Some(RecoverySuggestion::promote_in_order(content_view, expected)),
            Self::RemoteCall { .. } | Self::Timeout { .. } => {
                Some(RecoverySuggestion::check_remote())
            }
            Self::PollTimeout { task, .. } => Some(RecoverySuggestion::inspect_task(task)),
            _ => None,
        }
    }
}
