// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! Apply command - reconcile declarations against the server

use miette::Result;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{Context, OutputFormat};
use crate::errors::ContentflowError;
use crate::pipeline::{Orchestrator, RunOptions, StageGraph};
use crate::reconcile::CancelSignal;
use crate::remote::RemoteClient;
use crate::report::ExecutionReport;
use crate::resources::ResourceSet;
use crate::utils::RunProgress;

/// Flags of the apply command
#[derive(Debug, Clone)]
pub struct ApplyArgs {
    pub sources: Vec<String>,
    pub tags: Vec<String>,
    pub simulate: bool,
    pub format: OutputFormat,
    pub auto_publish: bool,
    pub concurrency: Option<usize>,
    pub url: Option<String>,
}

/// Run the apply command
pub async fn run(ctx: &Context, args: ApplyArgs) -> Result<ExitCode> {
    let backend = if args.simulate { "simulation" } else { "http" };

    let set = match ctx.load_declarations(&args.sources) {
        Ok(set) => set,
        Err(e) if e.is_structural() => {
            let report = ExecutionReport::structural(backend, String::new(), &e);
            return finish(&report, args.format, ctx.verbose);
        }
        Err(e) => return Err(e.into()),
    };

    let options = run_options(ctx, &args)?;
    let client = ctx.connect(args.simulate, args.url.as_deref())?;

    let cancel = CancelSignal::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, finishing in-flight calls");
            on_interrupt.cancel();
        }
    });

    let report = execute(ctx, &set, options, client, args.format, cancel).await?;
    finish(&report, args.format, ctx.verbose)
}

/// Options from the configuration file, overridden by flags
pub fn run_options(ctx: &Context, args: &ApplyArgs) -> Result<RunOptions> {
    let mut options = ctx.config.to_run_options();
    options.selections = StageGraph::allowed_subset(&args.tags)?;
    if args.auto_publish {
        options.promotion.auto_publish = true;
    }
    if let Some(concurrency) = args.concurrency {
        options.concurrency = concurrency.max(1);
    }
    Ok(options)
}

/// Run once with progress display; structural errors become a report
pub async fn execute(
    ctx: &Context,
    set: &ResourceSet,
    options: RunOptions,
    client: Arc<dyn RemoteClient>,
    format: OutputFormat,
    cancel: CancelSignal,
) -> Result<ExecutionReport> {
    let (events, receiver) = mpsc::unbounded_channel();
    let progress = match format {
        OutputFormat::Json => RunProgress::hidden(),
        OutputFormat::Text => RunProgress::new(ctx.verbose),
    };
    let drawing = progress.spawn(receiver);

    let orchestrator = Orchestrator::new(Arc::clone(&client), options)
        .with_cancel(cancel)
        .with_events(events);
    let result = orchestrator.run(set).await;
    drop(orchestrator);
    let _ = drawing.await;

    match result {
        Ok(report) => Ok(report),
        Err(e) if e.is_structural() => Ok(ExecutionReport::structural(client.name(), set.digest(), &e)),
        Err(e) => Err(e.into()),
    }
}

/// Print the report and map it to the process exit code
pub fn finish(report: &ExecutionReport, format: OutputFormat, verbose: bool) -> Result<ExitCode> {
    match format {
        OutputFormat::Json => println!("{}", report.to_json()?),
        OutputFormat::Text => print!("{}", report.render_text(verbose)),
    }
    Ok(ExitCode::from(report.exit_code()))
}

/// Render a structural error the way apply would
pub fn structural_exit(error: &ContentflowError, format: OutputFormat) -> Result<ExitCode> {
    let report = ExecutionReport::structural("none", String::new(), error);
    finish(&report, format, false)
}
