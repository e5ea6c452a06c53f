// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! contentflow - declarative configuration for content-lifecycle servers

use clap::Parser;
use miette::Result;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use contentflow::cli::apply::ApplyArgs;
use contentflow::cli::promote::PromoteArgs;
use contentflow::cli::{Cli, Commands, Context};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "contentflow=debug"
    } else {
        "contentflow=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    contentflow::utils::apply_color_preference();

    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    let ctx = Context::load(&cli)?;

    match cli.command {
        Commands::Apply {
            sources,
            tags,
            simulate,
            format,
            auto_publish,
            concurrency,
            url,
        } => {
            let args = ApplyArgs {
                sources,
                tags,
                simulate,
                format,
                auto_publish,
                concurrency,
                url,
            };
            contentflow::cli::apply::run(&ctx, args).await
        }
        Commands::Validate { sources } => contentflow::cli::validate::run(&ctx, sources).await,
        Commands::Plan { sources, format } => {
            contentflow::cli::plan::run(&ctx, sources, format).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Stages => {
            contentflow::cli::stages::run(&ctx).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Promote {
            content_view,
            environment,
            sources,
            version,
            force,
            simulate,
            url,
        } => {
            let args = PromoteArgs {
                content_view,
                environment,
                sources,
                version,
                force,
                simulate,
                url,
            };
            contentflow::cli::promote::run(&ctx, args).await
        }
        Commands::Watch {
            sources,
            tags,
            debounce,
            simulate,
            url,
        } => {
            let args = ApplyArgs {
                sources,
                tags,
                simulate,
                format: contentflow::cli::OutputFormat::Text,
                auto_publish: false,
                concurrency: None,
                url,
            };
            contentflow::cli::watch::run(&ctx, args, debounce).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
