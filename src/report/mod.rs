// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! Execution report

use colored::Colorize;
use serde::Serialize;

use crate::errors::{ContentflowError, ContentflowResult};
use crate::pipeline::Stage;
use crate::promotion::PromotionOutcome;
use crate::reconcile::{FailurePolicy, FailureReason, ReconciliationOutcome, RecordOutcome};
use crate::resources::ResourceKind;

/// Exit code when every record and promotion succeeded
pub const EXIT_SUCCESS: u8 = 0;
/// Exit code when some records or promotions failed
pub const EXIT_FAILURES: u8 = 1;
/// Exit code for structural errors and fail-fast aborts
pub const EXIT_ABORTED: u8 = 2;

/// Outcomes of one stage
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub policy: FailurePolicy,
    pub outcomes: Vec<RecordOutcome>,
    pub halted: bool,
}

/// Outcome counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub attempted: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// A record that failed, with enough identity to find it
#[derive(Debug, Clone, Serialize)]
pub struct FailureEntry {
    pub stage: Stage,
    pub kind: ResourceKind,
    pub organization: String,
    pub name: String,
    pub reason: FailureReason,
}

/// What a run did
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    /// Remote backend the run talked to
    pub backend: String,
    /// Digest of the declarations the run applied
    pub digest: String,
    pub stages: Vec<StageReport>,
    pub promotions: PromotionOutcome,
    /// Fail-fast stage that stopped the run
    pub aborted_at: Option<Stage>,
    pub cancelled: bool,
    /// Validation or resolution error that prevented any remote call
    pub structural_error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Serialize)]
struct ReportDocument<'a> {
    succeeded: bool,
    exit_code: u8,
    totals: Totals,
    failures: Vec<FailureEntry>,
    #[serde(flatten)]
    report: &'a ExecutionReport,
}

impl ExecutionReport {
    pub fn new(backend: &str, digest: String) -> Self {
        Self {
            backend: backend.to_string(),
            digest,
            stages: Vec::new(),
            promotions: PromotionOutcome::default(),
            aborted_at: None,
            cancelled: false,
            structural_error: None,
            duration_ms: 0,
        }
    }

    /// Report for a run stopped by a validation or resolution error
    pub fn structural(backend: &str, digest: String, error: &ContentflowError) -> Self {
        let mut report = Self::new(backend, digest);
        report.structural_error = Some(error.to_string());
        report
    }

    pub fn outcomes(&self) -> impl Iterator<Item = (&StageReport, &RecordOutcome)> {
        self.stages
            .iter()
            .flat_map(|s| s.outcomes.iter().map(move |o| (s, o)))
    }

    pub fn totals(&self) -> Totals {
        let mut totals = Totals::default();
        for (_, record) in self.outcomes() {
            match &record.outcome {
                ReconciliationOutcome::Created => totals.created += 1,
                ReconciliationOutcome::Updated { .. } => totals.updated += 1,
                ReconciliationOutcome::Unchanged => totals.unchanged += 1,
                ReconciliationOutcome::Skipped { .. } => totals.skipped += 1,
                ReconciliationOutcome::Failed { .. } => totals.failed += 1,
            }
        }
        totals.attempted = totals.created + totals.updated + totals.unchanged + totals.failed;
        totals
    }

    pub fn failures(&self) -> Vec<FailureEntry> {
        self.outcomes()
            .filter_map(|(stage, record)| match &record.outcome {
                ReconciliationOutcome::Failed { reason } => Some(FailureEntry {
                    stage: stage.stage,
                    kind: record.key.kind,
                    organization: record.key.organization.clone(),
                    name: record.key.name.clone(),
                    reason: reason.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// No structural error and no failure in a fail-fast stage
    pub fn succeeded(&self) -> bool {
        self.structural_error.is_none()
            && !self.stages.iter().any(|s| {
                s.policy == FailurePolicy::FailFast && s.outcomes.iter().any(|o| o.outcome.is_failed())
            })
    }

    pub fn exit_code(&self) -> u8 {
        if self.structural_error.is_some() || self.aborted_at.is_some() {
            EXIT_ABORTED
        } else if self.totals().failed > 0 || !self.promotions.failures.is_empty() || self.cancelled {
            EXIT_FAILURES
        } else {
            EXIT_SUCCESS
        }
    }

    pub fn to_json(&self) -> ContentflowResult<String> {
        let document = ReportDocument {
            succeeded: self.succeeded(),
            exit_code: self.exit_code(),
            totals: self.totals(),
            failures: self.failures(),
            report: self,
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }

    /// Human-readable report
    pub fn render_text(&self, verbose: bool) -> String {
        let mut out = String::new();

        if let Some(error) = &self.structural_error {
            out.push_str(&format!("{} {}\n", "✗".red(), error.red()));
            out.push_str(&format!("{}\n", "No changes were made.".dimmed()));
            return out;
        }

        for stage in &self.stages {
            let failed = stage.outcomes.iter().filter(|o| o.outcome.is_failed()).count();
            let marker = if failed > 0 { "✗".red() } else { "✓".green() };
            out.push_str(&format!(
                "{} {} ({} records)\n",
                marker,
                stage.stage.name().bold(),
                stage.outcomes.len()
            ));

            for record in &stage.outcomes {
                let line = match &record.outcome {
                    ReconciliationOutcome::Created => Some(format!("    {} {} created", "+".green(), record.key)),
                    ReconciliationOutcome::Updated { changed } => Some(format!(
                        "    {} {} updated ({})",
                        "~".yellow(),
                        record.key,
                        changed.join(", ")
                    )),
                    ReconciliationOutcome::Unchanged if verbose => {
                        Some(format!("    {} {} unchanged", "=".dimmed(), record.key))
                    }
                    ReconciliationOutcome::Unchanged => None,
                    ReconciliationOutcome::Skipped { reason } => Some(format!(
                        "    {} {} skipped: {}",
                        "-".dimmed(),
                        record.key,
                        reason
                    )),
                    ReconciliationOutcome::Failed { reason } => Some(format!(
                        "    {} {} failed: {}",
                        "✗".red(),
                        record.key,
                        reason
                    )),
                };
                if let Some(line) = line {
                    out.push_str(&line);
                    out.push('\n');
                }
            }
        }

        if !self.promotions.transitions.is_empty() || !self.promotions.failures.is_empty() {
            out.push_str(&format!("{} {}\n", "→".blue(), "publish/promote".bold()));
            for transition in &self.promotions.transitions {
                out.push_str(&format!("    {} {}\n", "✓".green(), transition));
            }
            for failure in &self.promotions.failures {
                out.push_str(&format!(
                    "    {} {} {} failed: {}\n",
                    "✗".red(),
                    failure.content_view,
                    failure.operation,
                    failure.reason
                ));
            }
        }

        if let Some(stage) = self.aborted_at {
            out.push_str(&format!(
                "{}\n",
                format!("Run aborted: stage '{}' is fail-fast", stage).red()
            ));
        }
        if self.cancelled {
            out.push_str(&format!("{}\n", "Run cancelled".yellow()));
        }

        let totals = self.totals();
        let summary = format!(
            "{} attempted, {} created, {} updated, {} unchanged, {} skipped, {} failed in {:.2}s",
            totals.attempted,
            totals.created,
            totals.updated,
            totals.unchanged,
            totals.skipped,
            totals.failed,
            self.duration_ms as f64 / 1000.0
        );
        out.push('\n');
        if self.exit_code() == EXIT_SUCCESS {
            out.push_str(&format!("{}\n", summary.green()));
        } else {
            out.push_str(&format!("{}\n", summary.red()));
        }

        out
    }
}
