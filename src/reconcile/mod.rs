// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! Idempotent reconciliation of records against the server

pub mod attributes;
mod call;
mod cancel;
mod poll;
mod reconciler;

pub use call::{CallSettings, RemoteCaller};
pub use cancel::CancelSignal;
pub use poll::{wait_for_task, PollSettings};
pub use reconciler::{PlannedRecord, Reconciler, RemoteIds, StageOutcome};

use serde::{Deserialize, Serialize};

use crate::errors::ContentflowError;
use crate::resources::RecordKey;

/// Category of a per-record failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RemoteCall,
    Timeout,
    PollTimeout,
    MissingDependency,
    TaskFailed,
}

/// Why a record failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureReason {
    pub fn from_error(error: &ContentflowError) -> Self {
        let kind = match error {
            ContentflowError::Timeout { .. } => FailureKind::Timeout,
            ContentflowError::PollTimeout { .. } => FailureKind::PollTimeout,
            ContentflowError::MissingDependency { .. } => FailureKind::MissingDependency,
            ContentflowError::TaskFailed { .. } => FailureKind::TaskFailed,
            _ => FailureKind::RemoteCall,
        };
        Self {
            kind,
            message: error.to_string(),
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Result of reconciling one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReconciliationOutcome {
    Created,
    Updated { changed: Vec<String> },
    Unchanged,
    Skipped { reason: String },
    Failed { reason: FailureReason },
}

impl ReconciliationOutcome {
    pub fn skipped(reason: &str) -> Self {
        Self::Skipped {
            reason: reason.to_string(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Created or updated in this run
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Created | Self::Updated { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated { .. } => "updated",
            Self::Unchanged => "unchanged",
            Self::Skipped { .. } => "skipped",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Outcome of one record, with the identity it was applied under
#[derive(Debug, Clone, Serialize)]
pub struct RecordOutcome {
    pub key: RecordKey,
    #[serde(flatten)]
    pub outcome: ReconciliationOutcome,
    /// Server identifier, when the record exists remotely
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    pub elapsed_ms: u64,
}

impl RecordOutcome {
    pub fn skipped(key: RecordKey, reason: &str) -> Self {
        Self {
            key,
            outcome: ReconciliationOutcome::skipped(reason),
            remote_id: None,
            elapsed_ms: 0,
        }
    }
}

/// What a stage does when one of its records fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the stage and the run
    FailFast,
    /// Record the failure and carry on
    #[default]
    Continue,
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FailFast => write!(f, "fail_fast"),
            Self::Continue => write!(f, "continue"),
        }
    }
}
