// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! # contentflow - declarative content-lifecycle configuration
//!
//! `contentflow` applies declared products, repositories, content views,
//! activation keys and related resources to a content-lifecycle server in
//! dependency order, then publishes and promotes content views along their
//! lifecycle environment chains.
//!
//! ## Features
//!
//! - **Fixed stage order** - resource kinds are applied in a known sequence
//! - **Reference resolution** - dangling references and cycles are rejected
//!   before anything is sent to the server
//! - **Idempotent reconciliation** - records are created, updated or left alone
//! - **Ordered promotion** - versions move one environment at a time
//!
//! ## Quick Start
//!
//! ```bash
//! # Check declarations offline
//! contentflow validate site.yaml
//!
//! # Try them against an in-memory server
//! contentflow apply site.yaml --simulate
//!
//! # Apply only products and repositories
//! contentflow apply site.yaml --tags products,repositories
//! ```

pub mod cli;
pub mod config;
pub mod errors;
pub mod pipeline;
pub mod promotion;
pub mod reconcile;
pub mod remote;
pub mod report;
pub mod resources;
pub mod utils;

// Re-export commonly used types
pub use errors::{ContentflowError, ContentflowResult};
pub use pipeline::{Orchestrator, RunOptions, Stage};
pub use report::ExecutionReport;
pub use resources::{ResourceLoader, ResourceSet};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
