// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! Declared resource records
//!
//! This module defines the desired-state records contentflow reconciles,
//! the per-kind document schema, and the loader that turns declaration
//! files into a validated [`ResourceSet`].

mod kind;
mod loader;
mod record;
mod validation;

pub use kind::{schema, KindSchema, ReferenceField, ResourceKind};
pub use loader::{expand_sources, ResourceLoader};
pub use record::{RecordKey, Reference, ResourceRecord, ResourceSet, VersionBinding, LIBRARY};
pub use validation::{ResourceValidator, ValidationResult};
