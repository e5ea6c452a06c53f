// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! Plan command - show the application order or the reference graph

use miette::Result;

use super::{Context, GraphFormat};
use crate::pipeline::Orchestrator;

/// Run the plan command
pub async fn run(ctx: &Context, sources: Vec<String>, format: GraphFormat) -> Result<()> {
    let set = ctx.load_declarations(&sources)?;
    let graph = Orchestrator::prepare(&set)?;

    let output = match format {
        GraphFormat::Text => graph.to_text(),
        GraphFormat::Dot => graph.to_dot(),
        GraphFormat::Mermaid => graph.to_mermaid(),
    };

    print!("{}", output);
    Ok(())
}
