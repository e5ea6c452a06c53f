// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! Remote reconciliation API
//!
//! The server is reached only through the [`RemoteClient`] operations
//! below. [`HttpRemote`] talks to a real content server; [`InMemoryRemote`]
//! simulates one for previews and tests.

mod http;
mod memory;

pub use http::HttpRemote;
pub use memory::{CallRecord, InMemoryRemote};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ContentflowResult;
use crate::resources::ResourceKind;

/// Attribute under which a content view's latest published version is reported
pub const LATEST_VERSION_KEY: &str = "latest_version";
/// Attribute under which a content view's environment -> version map is reported
pub const ENVIRONMENTS_KEY: &str = "environments";

/// An entity as the server reports it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntity {
    /// Server-side identifier
    pub id: String,
    /// Attributes as the server reports them
    pub attributes: Map<String, Value>,
}

/// A long-running server task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub id: String,
    /// What the task does, for messages
    pub label: String,
}

/// State of a long-running task
#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus {
    Running,
    Succeeded,
    Failed(String),
}

/// Result of a publish request
#[derive(Debug, Clone, PartialEq)]
pub struct PublishTicket {
    /// Version number the publish creates
    pub version: u32,
    /// Task to wait for, when the server publishes asynchronously
    pub task: Option<TaskHandle>,
}

/// Operations contentflow needs from the content server
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Look up an entity by kind, name and organization
    async fn find(
        &self,
        kind: ResourceKind,
        name: &str,
        organization: &str,
    ) -> ContentflowResult<Option<RemoteEntity>>;

    /// Create an entity
    async fn create(
        &self,
        kind: ResourceKind,
        organization: &str,
        attributes: &Map<String, Value>,
    ) -> ContentflowResult<RemoteEntity>;

    /// Update an entity's attributes
    async fn update(
        &self,
        kind: ResourceKind,
        id: &str,
        attributes: &Map<String, Value>,
    ) -> ContentflowResult<RemoteEntity>;

    /// Publish a new version of a content view
    async fn publish(&self, content_view_id: &str) -> ContentflowResult<PublishTicket>;

    /// Promote a content view version into a lifecycle environment
    async fn promote(
        &self,
        content_view_id: &str,
        version: u32,
        environment_id: &str,
    ) -> ContentflowResult<TaskHandle>;

    /// Check the state of a task
    async fn poll(&self, task: &TaskHandle) -> ContentflowResult<TaskStatus>;

    /// Client name for logs and reports
    fn name(&self) -> &str;
}
