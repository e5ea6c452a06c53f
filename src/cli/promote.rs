// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! Promote command - move a content view version along its lifecycle chain

use colored::Colorize;
use miette::Result;
use std::process::ExitCode;

use super::apply::structural_exit;
use super::{Context, OutputFormat};
use crate::pipeline::Orchestrator;
use crate::report::{EXIT_FAILURES, EXIT_SUCCESS};
use crate::resources::ResourceSet;
use crate::utils::create_spinner;

/// Flags of the promote command
#[derive(Debug, Clone)]
pub struct PromoteArgs {
    pub content_view: String,
    pub environment: String,
    pub sources: Vec<String>,
    pub version: Option<u32>,
    pub force: bool,
    pub simulate: bool,
    pub url: Option<String>,
}

/// Run the promote command
pub async fn run(ctx: &Context, args: PromoteArgs) -> Result<ExitCode> {
    let set = match ctx.load_declarations(&args.sources) {
        Ok(set) => set,
        Err(e) if e.is_structural() => return structural_exit(&e, OutputFormat::Text),
        Err(e) => return Err(e.into()),
    };

    let organization = owning_organization(&set, &args.content_view, &ctx.organization);
    let client = ctx.connect(args.simulate, args.url.as_deref())?;
    let orchestrator = Orchestrator::new(client, ctx.config.to_run_options());

    // An in-memory server starts empty; bring it to the declared state first
    if args.simulate {
        let report = orchestrator.run(&set).await?;
        if report.exit_code() != EXIT_SUCCESS {
            print!("{}", report.render_text(ctx.verbose));
            return Ok(ExitCode::from(report.exit_code()));
        }
    }

    let target = format!("{} → {}", args.content_view, args.environment);
    let spinner = create_spinner(&format!("Promoting {}", target));
    let result = orchestrator
        .promote(
            &set,
            &organization,
            &args.content_view,
            &args.environment,
            args.version,
            args.force,
        )
        .await;
    spinner.finish_and_clear();

    match result {
        Ok(Some(transition)) => {
            println!("{} {}", "✓".green(), transition);
            Ok(ExitCode::from(EXIT_SUCCESS))
        }
        Ok(None) => {
            println!(
                "{} {} is already in {}",
                "=".dimmed(),
                args.content_view,
                args.environment
            );
            Ok(ExitCode::from(EXIT_SUCCESS))
        }
        Err(e) if e.is_structural() => structural_exit(&e, OutputFormat::Text),
        Err(e) => {
            eprintln!("{} {}: {}", "✗".red(), target, e);
            if let Some(suggestion) = e.recovery() {
                eprintln!();
                eprint!("{}", suggestion);
            }
            Ok(ExitCode::from(EXIT_FAILURES))
        }
    }
}

/// Organization declaring the content view; the default one wins a tie
fn owning_organization(set: &ResourceSet, content_view: &str, default: &str) -> String {
    let owners: Vec<&str> = set
        .iter()
        .filter(|r| r.kind.is_content_view() && r.name == content_view)
        .map(|r| r.organization.as_str())
        .collect();
    match owners.as_slice() {
        [only] => only.to_string(),
        _ => default.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ResourceLoader;

    #[test]
    fn test_owning_organization() {
        let set = ResourceLoader::new("Default Organization")
            .from_yaml("organization: ACME\ncontent_views:\n  - name: CV1\n")
            .unwrap();
        assert_eq!(owning_organization(&set, "CV1", "Default Organization"), "ACME");
        assert_eq!(
            owning_organization(&set, "CV9", "Default Organization"),
            "Default Organization"
        );
    }
}
