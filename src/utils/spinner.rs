// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! Progress display for runs

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::colors::outcome_marker;
use crate::pipeline::RunEvent;

/// Create a spinner for indeterminate progress
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.blue} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Create a progress bar for one stage
pub fn create_progress_bar(total: u64, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg:24} [{bar:40.cyan/blue}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░"),
    );
    pb.set_message(message.to_string());
    pb
}

/// Draws run events as per-stage progress bars
pub struct RunProgress {
    current: Option<ProgressBar>,
    verbose: bool,
    hidden: bool,
}

impl RunProgress {
    pub fn new(verbose: bool) -> Self {
        Self {
            current: None,
            verbose,
            hidden: false,
        }
    }

    /// Progress that draws nothing (JSON output)
    pub fn hidden() -> Self {
        Self {
            current: None,
            verbose: false,
            hidden: true,
        }
    }

    pub fn handle(&mut self, event: RunEvent) {
        match event {
            RunEvent::StageStarted { stage, records } => {
                let pb = create_progress_bar(records as u64, stage.name());
                if self.hidden {
                    pb.set_draw_target(ProgressDrawTarget::hidden());
                }
                self.current = Some(pb);
            }
            RunEvent::RecordFinished { key, outcome } => {
                if let Some(pb) = &self.current {
                    if self.verbose || outcome.is_failed() {
                        pb.println(format!("  {} {} {}", outcome_marker(&outcome), key, outcome.label()));
                    }
                    pb.inc(1);
                }
            }
            RunEvent::Transition(transition) => {
                if let Some(pb) = &self.current {
                    if self.verbose {
                        pb.println(format!("  → {}", transition));
                    }
                    pb.inc(1);
                }
            }
            RunEvent::StageFinished { .. } => {
                if let Some(pb) = self.current.take() {
                    pb.finish_and_clear();
                }
            }
        }
    }

    /// Drain events on a background task until the sender side is dropped
    pub fn spawn(mut self, mut events: mpsc::UnboundedReceiver<RunEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.handle(event);
            }
            if let Some(pb) = self.current.take() {
                pb.finish_and_clear();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Stage;
    use crate::reconcile::ReconciliationOutcome;
    use crate::resources::{RecordKey, ResourceKind};

    #[test]
    fn test_progress_follows_stages() {
        let mut progress = RunProgress::hidden();
        progress.handle(RunEvent::StageStarted {
            stage: Stage::Products,
            records: 2,
        });
        progress.handle(RunEvent::RecordFinished {
            key: RecordKey::new(ResourceKind::Product, "ACME", "P1"),
            outcome: ReconciliationOutcome::Created,
        });
        assert_eq!(progress.current.as_ref().map(|pb| pb.position()), Some(1));

        progress.handle(RunEvent::StageFinished {
            stage: Stage::Products,
        });
        assert!(progress.current.is_none());
    }
}
