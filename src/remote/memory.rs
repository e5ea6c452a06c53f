// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! In-memory content server
//!
//! Backs `apply --simulate` and the test suite. Every call is recorded, and
//! failures or latency can be injected per operation and entity name.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{
    PublishTicket, RemoteClient, RemoteEntity, TaskHandle, TaskStatus, ENVIRONMENTS_KEY,
    LATEST_VERSION_KEY,
};
use crate::errors::{ContentflowError, ContentflowResult};
use crate::resources::{ResourceKind, LIBRARY};

/// One recorded client call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    /// Position in the global call sequence
    pub sequence: usize,
    pub operation: &'static str,
    pub kind: Option<ResourceKind>,
    /// Entity name, or identifier for calls that take one
    pub target: String,
}

#[derive(Debug, Clone)]
struct Fault {
    operation: &'static str,
    target: String,
    /// Remaining failures; `None` fails forever
    remaining: Option<u32>,
    message: String,
}

#[derive(Debug, Clone)]
struct StoredEntity {
    kind: ResourceKind,
    organization: String,
    name: String,
    attributes: Map<String, Value>,
}

#[derive(Debug, Clone)]
struct StoredTask {
    polls_left: u32,
    outcome: TaskOutcome,
}

#[derive(Debug, Clone)]
enum TaskOutcome {
    Done,
    Promote { view_id: String, environment: String, version: u32 },
}

#[derive(Debug, Default)]
struct ServerState {
    next_id: u64,
    entities: BTreeMap<String, StoredEntity>,
    tasks: HashMap<String, StoredTask>,
}

impl ServerState {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }

    fn lookup(&self, kind: ResourceKind, name: &str, organization: &str) -> Option<String> {
        self.entities
            .iter()
            .find(|(_, e)| e.kind == kind && e.name == name && e.organization == organization)
            .map(|(id, _)| id.clone())
    }

    fn insert(
        &mut self,
        kind: ResourceKind,
        organization: &str,
        name: &str,
        attributes: Map<String, Value>,
    ) -> String {
        let id = self.allocate_id();
        self.entities.insert(
            id.clone(),
            StoredEntity {
                kind,
                organization: organization.to_string(),
                name: name.to_string(),
                attributes,
            },
        );
        id
    }

    fn entity(&self, id: &str) -> Option<RemoteEntity> {
        self.entities.get(id).map(|e| RemoteEntity {
            id: id.to_string(),
            attributes: e.attributes.clone(),
        })
    }
}

/// Simulated content server
#[derive(Debug, Default)]
pub struct InMemoryRemote {
    state: Mutex<ServerState>,
    calls: Mutex<Vec<CallRecord>>,
    faults: Mutex<Vec<Fault>>,
    delays: Mutex<HashMap<String, Duration>>,
    latency: Option<Duration>,
    task_polls: u32,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fixed delay to every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make publish and promote tasks report `Running` this many times
    pub fn with_task_polls(mut self, polls: u32) -> Self {
        self.task_polls = polls;
        self
    }

    /// Fail every `operation` call that targets `target`
    pub fn fail_on(&self, operation: &'static str, target: &str, message: &str) {
        self.push_fault(operation, target, None, message);
    }

    /// Fail the next `times` `operation` calls that target `target`
    pub fn fail_times(&self, operation: &'static str, target: &str, times: u32, message: &str) {
        self.push_fault(operation, target, Some(times), message);
    }

    /// Delay calls that target `target`
    pub fn delay_on(&self, target: &str, delay: Duration) {
        lock(&self.delays).insert(target.to_string(), delay);
    }

    fn push_fault(&self, operation: &'static str, target: &str, remaining: Option<u32>, message: &str) {
        lock(&self.faults).push(Fault {
            operation,
            target: target.to_string(),
            remaining,
            message: message.to_string(),
        });
    }

    /// Seed an entity, as if it already existed on the server
    pub fn seed(
        &self,
        kind: ResourceKind,
        organization: &str,
        name: &str,
        attributes: Map<String, Value>,
    ) -> String {
        let mut attributes = attributes;
        attributes.insert("name".into(), Value::String(name.to_string()));
        lock(&self.state).insert(kind, organization, name, attributes)
    }

    /// Change an attribute behind contentflow's back
    pub fn set_attribute(
        &self,
        kind: ResourceKind,
        organization: &str,
        name: &str,
        key: &str,
        value: Value,
    ) -> bool {
        let mut state = lock(&self.state);
        let Some(id) = state.lookup(kind, name, organization) else {
            return false;
        };
        if let Some(entity) = state.entities.get_mut(&id) {
            entity.attributes.insert(key.to_string(), value);
        }
        true
    }

    /// Current server-side view of an entity
    pub fn entity(&self, kind: ResourceKind, organization: &str, name: &str) -> Option<RemoteEntity> {
        let state = lock(&self.state);
        let id = state.lookup(kind, name, organization)?;
        state.entity(&id)
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<CallRecord> {
        lock(&self.calls).clone()
    }

    /// Most calls that were ever in progress at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Number of calls of one operation
    pub fn count(&self, operation: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    fn name_of(&self, id: &str) -> String {
        lock(&self.state)
            .entities
            .get(id)
            .map(|e| e.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Record the call, apply latency and injected faults
    async fn enter(
        &self,
        operation: &'static str,
        kind: Option<ResourceKind>,
        target: &str,
    ) -> ContentflowResult<()> {
        {
            let mut calls = lock(&self.calls);
            let sequence = calls.len();
            calls.push(CallRecord {
                sequence,
                operation,
                kind,
                target: target.to_string(),
            });
        }

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        let delay = lock(&self.delays).get(target).copied().or(self.latency);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut faults = lock(&self.faults);
        if let Some(fault) = faults
            .iter_mut()
            .find(|f| f.operation == operation && f.target == target && f.remaining != Some(0))
        {
            if let Some(remaining) = fault.remaining.as_mut() {
                *remaining -= 1;
            }
            return Err(ContentflowError::remote(operation, fault.message.clone()));
        }

        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn version_of(attributes: &Map<String, Value>) -> u32 {
    attributes
        .get(LATEST_VERSION_KEY)
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(0)
}

fn set_environment(attributes: &mut Map<String, Value>, environment: &str, version: u32) {
    let environments = attributes
        .entry(ENVIRONMENTS_KEY)
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(map) = environments {
        map.insert(environment.to_string(), Value::from(version));
    }
}

#[async_trait]
impl RemoteClient for InMemoryRemote {
    async fn find(
        &self,
        kind: ResourceKind,
        name: &str,
        organization: &str,
    ) -> ContentflowResult<Option<RemoteEntity>> {
        self.enter("find", Some(kind), name).await?;
        let mut state = lock(&self.state);

        if let Some(id) = state.lookup(kind, name, organization) {
            return Ok(state.entity(&id));
        }

        // Every organization has a Library environment
        if kind == ResourceKind::LifecycleEnvironment && name == LIBRARY {
            let mut attributes = Map::new();
            attributes.insert("name".into(), Value::String(LIBRARY.into()));
            let id = state.insert(kind, organization, LIBRARY, attributes);
            return Ok(state.entity(&id));
        }

        Ok(None)
    }

    async fn create(
        &self,
        kind: ResourceKind,
        organization: &str,
        attributes: &Map<String, Value>,
    ) -> ContentflowResult<RemoteEntity> {
        let name = attributes
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ContentflowError::remote_permanent("create", "name is required"))?
            .to_string();
        self.enter("create", Some(kind), &name).await?;

        let mut state = lock(&self.state);
        if state.lookup(kind, &name, organization).is_some() {
            return Err(ContentflowError::remote_permanent(
                "create",
                format!("{} '{}' already exists", kind, name),
            ));
        }

        let mut stored = attributes.clone();
        if kind.is_content_view() {
            stored.insert(LATEST_VERSION_KEY.into(), Value::from(0));
            stored.insert(ENVIRONMENTS_KEY.into(), Value::Object(Map::new()));
        }
        let id = state.insert(kind, organization, &name, stored);
        state
            .entity(&id)
            .ok_or_else(|| ContentflowError::remote_permanent("create", "entity vanished"))
    }

    async fn update(
        &self,
        kind: ResourceKind,
        id: &str,
        attributes: &Map<String, Value>,
    ) -> ContentflowResult<RemoteEntity> {
        let name = self.name_of(id);
        self.enter("update", Some(kind), &name).await?;

        let mut state = lock(&self.state);
        let entity = state
            .entities
            .get_mut(id)
            .ok_or_else(|| ContentflowError::remote_permanent("update", format!("no entity {}", id)))?;

        for (key, value) in attributes {
            // Operating systems accept the family under a different key on update
            let key = match (kind, key.as_str()) {
                (ResourceKind::OperatingSystem, "os_family") => "family",
                _ => key.as_str(),
            };
            entity.attributes.insert(key.to_string(), value.clone());
        }

        state
            .entity(id)
            .ok_or_else(|| ContentflowError::remote_permanent("update", "entity vanished"))
    }

    async fn publish(&self, content_view_id: &str) -> ContentflowResult<PublishTicket> {
        let name = self.name_of(content_view_id);
        self.enter("publish", None, &name).await?;

        let mut state = lock(&self.state);
        let entity = state.entities.get_mut(content_view_id).ok_or_else(|| {
            ContentflowError::remote_permanent("publish", format!("no content view {}", content_view_id))
        })?;

        let version = version_of(&entity.attributes) + 1;
        entity
            .attributes
            .insert(LATEST_VERSION_KEY.into(), Value::from(version));
        set_environment(&mut entity.attributes, LIBRARY, version);

        let task_id = state.allocate_id();
        state.tasks.insert(
            task_id.clone(),
            StoredTask {
                polls_left: self.task_polls,
                outcome: TaskOutcome::Done,
            },
        );

        Ok(PublishTicket {
            version,
            task: Some(TaskHandle {
                id: task_id,
                label: format!("publish {} version {}", name, version),
            }),
        })
    }

    async fn promote(
        &self,
        content_view_id: &str,
        version: u32,
        environment_id: &str,
    ) -> ContentflowResult<TaskHandle> {
        let name = self.name_of(content_view_id);
        self.enter("promote", None, &name).await?;

        let mut state = lock(&self.state);
        let environment = state
            .entities
            .get(environment_id)
            .filter(|e| e.kind == ResourceKind::LifecycleEnvironment)
            .map(|e| e.name.clone())
            .ok_or_else(|| {
                ContentflowError::remote_permanent("promote", format!("no environment {}", environment_id))
            })?;

        let latest = state
            .entities
            .get(content_view_id)
            .map(|e| version_of(&e.attributes))
            .unwrap_or(0);
        if version == 0 || version > latest {
            return Err(ContentflowError::remote_permanent(
                "promote",
                format!("content view {} has no version {}", name, version),
            ));
        }

        let task_id = state.allocate_id();
        state.tasks.insert(
            task_id.clone(),
            StoredTask {
                polls_left: self.task_polls,
                outcome: TaskOutcome::Promote {
                    view_id: content_view_id.to_string(),
                    environment: environment.clone(),
                    version,
                },
            },
        );

        Ok(TaskHandle {
            id: task_id,
            label: format!("promote {} version {} to {}", name, version, environment),
        })
    }

    async fn poll(&self, task: &TaskHandle) -> ContentflowResult<TaskStatus> {
        self.enter("poll", None, &task.id).await?;

        let mut state = lock(&self.state);
        let stored = state.tasks.get_mut(&task.id).ok_or_else(|| {
            ContentflowError::remote_permanent("poll", format!("no task {}", task.id))
        })?;

        if stored.polls_left > 0 {
            stored.polls_left -= 1;
            return Ok(TaskStatus::Running);
        }

        // Promotions land when their task completes
        if let TaskOutcome::Promote {
            view_id,
            environment,
            version,
        } = std::mem::replace(&mut stored.outcome, TaskOutcome::Done)
        {
            if let Some(view) = state.entities.get_mut(&view_id) {
                set_environment(&mut view.attributes, &environment, version);
            }
        }

        Ok(TaskStatus::Succeeded)
    }

    fn name(&self) -> &str {
        "simulation"
    }
}
