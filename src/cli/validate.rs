// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! Validate command - check declarations offline

use colored::Colorize;
use miette::Result;
use std::process::ExitCode;

use super::Context;
use crate::pipeline::ReferenceResolver;
use crate::report::{EXIT_ABORTED, EXIT_SUCCESS};
use crate::resources::{expand_sources, ResourceKind, ResourceValidator};

/// Run the validate command
pub async fn run(ctx: &Context, sources: Vec<String>) -> Result<ExitCode> {
    println!("{}", "Validating declarations...".bold());
    println!();

    let files = expand_sources(&sources)?;
    let set = match ctx.loader().parse_sources(&sources) {
        Ok(set) => set,
        Err(e) => {
            println!("  {} Failed to parse declarations", "✗".red());
            println!("    {}", e);
            println!();
            return Ok(ExitCode::from(EXIT_ABORTED));
        }
    };
    println!(
        "  {} {} file(s), {} record(s) parsed",
        "✓".green(),
        files.len(),
        set.len()
    );

    let validation = ResourceValidator::validate(&set);

    if !validation.warnings.is_empty() {
        println!();
        println!("{}:", "Warnings".yellow().bold());
        for warning in &validation.warnings {
            println!("  {} {}", "⚠".yellow(), warning);
        }
    }

    if !validation.is_valid() {
        println!();
        println!("{}:", "Errors".red().bold());
        for error in &validation.errors {
            println!("  {} {}", "✗".red(), error);
        }
        println!();
        println!("{}", "Declarations are invalid.".red().bold());
        return Ok(ExitCode::from(EXIT_ABORTED));
    }

    let graph = match ReferenceResolver::resolve(&set) {
        Ok(graph) => graph,
        Err(e) => {
            println!();
            println!("{}:", "Errors".red().bold());
            println!("  {} {}", "✗".red(), e);
            println!();
            println!("{}", "Declarations are invalid.".red().bold());
            return Ok(ExitCode::from(EXIT_ABORTED));
        }
    };
    println!("  {} All references resolve", "✓".green());

    if ctx.verbose {
        println!();
        println!("{}:", "Summary".bold());
        for organization in set.organizations() {
            println!("  {}", organization.bold());
            for kind in ResourceKind::ALL {
                let count = set
                    .records(kind)
                    .iter()
                    .filter(|r| r.organization == organization)
                    .count();
                if count > 0 {
                    println!("    {:<24} {}", kind.to_string(), count);
                }
            }
            println!("    {:<24} {}", "lifecycle", graph.chain(&organization));
        }
    }

    println!();
    println!("{}", "Declarations are valid!".green().bold());
    Ok(ExitCode::from(EXIT_SUCCESS))
}
