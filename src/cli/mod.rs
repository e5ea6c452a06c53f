// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! CLI command definitions and handlers

pub mod apply;
pub mod plan;
pub mod promote;
pub mod stages;
pub mod validate;
pub mod watch;

use clap::{Parser, Subcommand};
use miette::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::RunConfig;
use crate::errors::{ContentflowError, ContentflowResult, RecoverySuggestion};
use crate::remote::{HttpRemote, InMemoryRemote, RemoteClient};
use crate::resources::{ResourceLoader, ResourceSet};

/// Organization used when neither the flag, the config nor a record names one
pub const DEFAULT_ORGANIZATION: &str = "Default Organization";

/// Declarative configuration for content-lifecycle servers
///
/// Applies declared products, repositories, content views and related
/// resources in dependency order, then publishes and promotes content views.
#[derive(Parser, Debug)]
#[clap(
    name = "contentflow",
    version,
    about = "Dependency-ordered reconciliation of content-lifecycle server resources",
    long_about = None,
    after_help = "Examples:\n\
        contentflow validate site.yaml                 Check declarations offline\n\
        contentflow plan site.yaml                     Show the application order\n\
        contentflow apply site.yaml --simulate         Apply against an in-memory server\n\
        contentflow apply site.yaml -t products,repositories\n\
        contentflow promote CV1 QA site.yaml           Promote by hand\n\n\
        See 'contentflow <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,

    /// Configuration file (default: .contentflow.toml, then the user config dir)
    #[clap(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Organization for records that do not name one
    #[clap(long, global = true, env = "CONTENTFLOW_ORG")]
    pub org: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply declarations to the server
    Apply {
        /// Declaration files, directories or glob patterns
        #[clap(default_value = "contentflow.yaml")]
        sources: Vec<String>,

        /// Run only the stages with these tags
        #[clap(short, long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Apply against an in-memory server instead of the configured one
        #[clap(long)]
        simulate: bool,

        /// Report format
        #[clap(short, long, default_value = "text")]
        format: OutputFormat,

        /// Publish every content view, changed or not
        #[clap(long)]
        auto_publish: bool,

        /// Records applied at once within a level
        #[clap(long, env = "CONTENTFLOW_CONCURRENCY")]
        concurrency: Option<usize>,

        /// Server URL (overrides the configuration file)
        #[clap(long, env = "CONTENTFLOW_URL")]
        url: Option<String>,
    },

    /// Check declarations and references without contacting the server
    Validate {
        /// Declaration files, directories or glob patterns
        #[clap(default_value = "contentflow.yaml")]
        sources: Vec<String>,
    },

    /// Show the application plan or the reference graph
    Plan {
        /// Declaration files, directories or glob patterns
        #[clap(default_value = "contentflow.yaml")]
        sources: Vec<String>,

        /// Output format
        #[clap(short, long, default_value = "text")]
        format: GraphFormat,
    },

    /// List stages and their selection tags
    Stages,

    /// Promote a content view into a lifecycle environment
    Promote {
        /// Content view name
        content_view: String,

        /// Target lifecycle environment
        environment: String,

        /// Declaration files, directories or glob patterns
        #[clap(default_value = "contentflow.yaml")]
        sources: Vec<String>,

        /// Version to promote (default: the latest)
        #[clap(long)]
        version: Option<u32>,

        /// Skip the lifecycle order check
        #[clap(long)]
        force: bool,

        /// Apply the declarations to an in-memory server first and promote there
        #[clap(long)]
        simulate: bool,

        /// Server URL (overrides the configuration file)
        #[clap(long, env = "CONTENTFLOW_URL")]
        url: Option<String>,
    },

    /// Re-apply whenever the declarations change
    Watch {
        /// Declaration files, directories or glob patterns
        #[clap(default_value = "contentflow.yaml")]
        sources: Vec<String>,

        /// Run only the stages with these tags
        #[clap(short, long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Debounce delay in milliseconds
        #[clap(long, default_value = "500")]
        debounce: u64,

        /// Apply against an in-memory server instead of the configured one
        #[clap(long)]
        simulate: bool,

        /// Server URL (overrides the configuration file)
        #[clap(long, env = "CONTENTFLOW_URL")]
        url: Option<String>,
    },
}

/// Report output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

/// Plan output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphFormat {
    Text,
    Dot,
    Mermaid,
}

impl std::str::FromStr for GraphFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "dot" => Ok(Self::Dot),
            "mermaid" => Ok(Self::Mermaid),
            _ => Err(format!("Unknown graph format: {}", s)),
        }
    }
}

/// Settings shared by every command
#[derive(Debug, Clone)]
pub struct Context {
    pub config: RunConfig,
    pub organization: String,
    pub verbose: bool,
}

impl Context {
    /// Load the configuration and settle the default organization
    pub fn load(cli: &Cli) -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| miette::miette!("Failed to get current directory: {}", e))?;
        let config = RunConfig::discover(cli.config.as_deref(), &cwd)?;
        let organization = cli
            .org
            .clone()
            .or_else(|| config.organization.clone())
            .unwrap_or_else(|| DEFAULT_ORGANIZATION.to_string());

        Ok(Self {
            config,
            organization,
            verbose: cli.verbose,
        })
    }

    pub fn loader(&self) -> ResourceLoader {
        ResourceLoader::new(&self.organization)
    }

    pub fn load_declarations(&self, sources: &[String]) -> ContentflowResult<ResourceSet> {
        self.loader().load(sources)
    }

    /// Client for the configured server, or an in-memory one
    pub fn connect(&self, simulate: bool, url: Option<&str>) -> Result<Arc<dyn RemoteClient>> {
        if simulate {
            return Ok(Arc::new(InMemoryRemote::new()));
        }

        let remote = &self.config.remote;
        let url = url
            .or(remote.url.as_deref())
            .ok_or_else(|| ContentflowError::Config {
                message: "No server URL configured".into(),
                help: Some(RecoverySuggestion::create_config().to_string()),
            })?;
        let client = HttpRemote::from_env(
            url,
            &remote.username_env,
            &remote.password_env,
            remote.verify_tls,
            Duration::from_secs(self.config.execution.call_timeout_secs),
        )?;
        Ok(Arc::new(client))
    }
}

/// Whether a path looks like a declaration document
pub fn is_declaration_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}
