// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! Stage ordering, reference resolution and the run driver
//!
//! Declarations are resolved into a reference graph once, then applied
//! stage by stage in a fixed order.

mod orchestrator;
mod resolver;
mod stages;

pub use orchestrator::{Orchestrator, RunEvent, RunOptions, StagePolicies};
pub use resolver::{ReferenceResolver, ResolvedGraph, ResolvedReference};
pub use stages::{Stage, StageGraph, StageSelection, PROMOTE_TAG, PUBLISH_TAG};
