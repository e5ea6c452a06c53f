// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! Terminal styling shared by the commands

use colored::{ColoredString, Colorize};

use crate::reconcile::ReconciliationOutcome;

/// Marker shown next to a record outcome
pub fn outcome_marker(outcome: &ReconciliationOutcome) -> ColoredString {
    match outcome {
        ReconciliationOutcome::Created => "+".green(),
        ReconciliationOutcome::Updated { .. } => "~".yellow(),
        ReconciliationOutcome::Unchanged => "=".dimmed(),
        ReconciliationOutcome::Skipped { .. } => "-".dimmed(),
        ReconciliationOutcome::Failed { .. } => "✗".red(),
    }
}

/// Turn colours off when NO_COLOR is set
pub fn apply_color_preference() {
    if std::env::var_os("NO_COLOR").is_some() {
        colored::control::set_override(false);
    }
}

pub fn print_header(title: &str) {
    println!("{}", title.bold());
    println!("{}", "═".repeat(title.chars().count().max(40)));
}

pub fn print_section(title: &str) {
    println!();
    println!("{}:", title.bold());
}

pub fn print_success(msg: &str) {
    println!("  {} {}", "✓".green(), msg);
}

pub fn print_error(msg: &str) {
    println!("  {} {}", "✗".red(), msg);
}

pub fn print_warning(msg: &str) {
    println!("  {} {}", "⚠".yellow(), msg);
}

pub fn print_info(msg: &str) {
    println!("  {} {}", "→".blue(), msg);
}
