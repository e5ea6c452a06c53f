// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! Stages command - list the fixed stage order and its tags

use colored::Colorize;
use miette::Result;

use super::Context;
use crate::pipeline::StageGraph;

pub async fn run(ctx: &Context) -> Result<()> {
    println!("{}", "Stages (applied in this order):".bold());
    print!("{}", StageGraph::to_text());

    if ctx.verbose {
        let policies = ctx.config.stage_policies();
        println!();
        println!("{}:", "Failure policy".bold());
        for stage in StageGraph::stages() {
            println!("  {:<24} {}", stage.name(), policies.for_stage(*stage));
        }
    }
    Ok(())
}
