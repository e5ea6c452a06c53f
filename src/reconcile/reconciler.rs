// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! Stage reconciler
//!
//! Applies the records of one stage, level by level. Records of a level run
//! concurrently up to the configured limit; a level starts only after the
//! previous one has fully finished.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio::task::JoinSet;

use super::attributes::{component_value, differing_keys, map_for, reference_key, Operation};
use super::{
    CallSettings, CancelSignal, FailurePolicy, FailureKind, FailureReason, ReconciliationOutcome,
    RecordOutcome, RemoteCaller,
};
use crate::errors::{ContentflowError, ContentflowResult};
use crate::pipeline::{ResolvedReference, RunEvent, Stage};
use crate::remote::RemoteClient;
use crate::resources::{schema, RecordKey, ResourceRecord};

/// A record with its resolved references, ready to apply
#[derive(Debug, Clone)]
pub struct PlannedRecord {
    pub record: ResourceRecord,
    pub references: Vec<ResolvedReference>,
}

/// Server identifiers learned during a run
#[derive(Debug, Clone, Default)]
pub struct RemoteIds {
    inner: Arc<RwLock<HashMap<RecordKey, String>>>,
}

impl RemoteIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &RecordKey) -> Option<String> {
        self.inner.read().await.get(key).cloned()
    }

    pub async fn insert(&self, key: RecordKey, id: String) {
        self.inner.write().await.insert(key, id);
    }
}

/// Outcomes of one stage
#[derive(Debug, Default)]
pub struct StageOutcome {
    /// One entry per record, in declaration order within each level
    pub outcomes: Vec<RecordOutcome>,
    /// A failure stopped a fail-fast stage
    pub halted: bool,
}

#[derive(Clone)]
struct Worker {
    client: Arc<dyn RemoteClient>,
    caller: RemoteCaller,
    ids: RemoteIds,
}

/// Applies records through find, then create or update
pub struct Reconciler {
    worker: Worker,
    concurrency: usize,
    cancel: CancelSignal,
    events: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl Reconciler {
    pub fn new(client: Arc<dyn RemoteClient>, settings: CallSettings, concurrency: usize) -> Self {
        Self {
            worker: Worker {
                client,
                caller: RemoteCaller::new(settings),
                ids: RemoteIds::new(),
            },
            concurrency: concurrency.max(1),
            cancel: CancelSignal::new(),
            events: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<RunEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Identifier registry shared with later stages and the promotion engine
    pub fn ids(&self) -> &RemoteIds {
        &self.worker.ids
    }

    /// Apply a stage's records, level by level
    pub async fn apply(
        &self,
        stage: Stage,
        levels: Vec<Vec<PlannedRecord>>,
        policy: FailurePolicy,
    ) -> StageOutcome {
        let mut result = StageOutcome::default();
        let halt = Arc::new(AtomicBool::new(false));

        for (depth, level) in levels.into_iter().enumerate() {
            if self.cancel.is_cancelled() || halt.load(Ordering::SeqCst) {
                let reason = self.skip_reason(&halt);
                for planned in level {
                    let outcome = RecordOutcome::skipped(planned.record.key(), reason);
                    self.emit(&outcome);
                    result.outcomes.push(outcome);
                }
                continue;
            }

            tracing::debug!(stage = %stage, level = depth, records = level.len(), "applying level");
            let outcomes = self.apply_level(level, policy, &halt).await;
            result.outcomes.extend(outcomes);
        }

        result.halted = halt.load(Ordering::SeqCst);
        result
    }

    async fn apply_level(
        &self,
        level: Vec<PlannedRecord>,
        policy: FailurePolicy,
        halt: &Arc<AtomicBool>,
    ) -> Vec<RecordOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let keys: Vec<RecordKey> = level.iter().map(|p| p.record.key()).collect();
        let mut set = JoinSet::new();

        for (index, planned) in level.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let worker = self.worker.clone();
            let cancel = self.cancel.clone();
            let halt = Arc::clone(halt);

            set.spawn(async move {
                let key = planned.record.key();
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (index, RecordOutcome::skipped(key, "cancelled"));
                };
                if cancel.is_cancelled() {
                    return (index, RecordOutcome::skipped(key, "cancelled"));
                }
                if halt.load(Ordering::SeqCst) {
                    return (index, RecordOutcome::skipped(key, "stage halted after a failure"));
                }

                let outcome = worker.reconcile(planned).await;
                if policy == FailurePolicy::FailFast && outcome.outcome.is_failed() {
                    halt.store(true, Ordering::SeqCst);
                }
                (index, outcome)
            });
        }

        let mut finished: BTreeMap<usize, RecordOutcome> = BTreeMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    self.emit(&outcome);
                    finished.insert(index, outcome);
                }
                Err(e) => tracing::error!(error = %e, "reconcile task did not complete"),
            }
        }

        // A task that panicked leaves no outcome; report it as failed
        let mut outcomes = Vec::with_capacity(keys.len());
        for (index, key) in keys.into_iter().enumerate() {
            let outcome = finished.remove(&index).unwrap_or_else(|| {
                if policy == FailurePolicy::FailFast {
                    halt.store(true, Ordering::SeqCst);
                }
                RecordOutcome {
                    key,
                    outcome: ReconciliationOutcome::Failed {
                        reason: FailureReason {
                            kind: FailureKind::RemoteCall,
                            message: "reconcile task aborted".into(),
                        },
                    },
                    remote_id: None,
                    elapsed_ms: 0,
                }
            });
            outcomes.push(outcome);
        }
        outcomes
    }

    fn skip_reason(&self, halt: &AtomicBool) -> &'static str {
        if self.cancel.is_cancelled() {
            "cancelled"
        } else if halt.load(Ordering::SeqCst) {
            "stage halted after a failure"
        } else {
            "not scheduled"
        }
    }

    fn emit(&self, outcome: &RecordOutcome) {
        if let Some(events) = &self.events {
            let _ = events.send(RunEvent::RecordFinished {
                key: outcome.key.clone(),
                outcome: outcome.outcome.clone(),
            });
        }
    }
}

impl Worker {
    async fn reconcile(self, planned: PlannedRecord) -> RecordOutcome {
        let started = Instant::now();
        let key = planned.record.key();

        let (outcome, remote_id) = match self.apply_record(&planned).await {
            Ok((outcome, id)) => {
                tracing::debug!(record = %key, organization = %key.organization, outcome = outcome.label(), "reconciled");
                (outcome, Some(id))
            }
            Err(e) => {
                tracing::warn!(record = %key, organization = %key.organization, error = %e, "reconcile failed");
                let reason = FailureReason::from_error(&e);
                (ReconciliationOutcome::Failed { reason }, None)
            }
        };

        RecordOutcome {
            key,
            outcome,
            remote_id,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    async fn apply_record(
        &self,
        planned: &PlannedRecord,
    ) -> ContentflowResult<(ReconciliationOutcome, String)> {
        let record = &planned.record;
        let key = record.key();
        let desired = self.desired_attributes(planned).await?;

        let existing = self
            .caller
            .call("find", || {
                self.client.find(record.kind, &record.name, &record.organization)
            })
            .await?;

        match existing {
            None => {
                let payload = map_for(record.kind, Operation::Create, &desired);
                let created = self
                    .caller
                    .call("create", || {
                        self.client.create(record.kind, &record.organization, &payload)
                    })
                    .await?;
                self.ids.insert(key, created.id.clone()).await;
                Ok((ReconciliationOutcome::Created, created.id))
            }
            Some(entity) => {
                self.ids.insert(key, entity.id.clone()).await;

                let changed = differing_keys(&desired, &entity.attributes);
                if changed.is_empty() {
                    return Ok((ReconciliationOutcome::Unchanged, entity.id));
                }

                let subset: Map<String, Value> = desired
                    .iter()
                    .filter(|(k, _)| changed.contains(k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let payload = map_for(record.kind, Operation::Update, &subset);
                self.caller
                    .call("update", || self.client.update(record.kind, &entity.id, &payload))
                    .await?;
                Ok((ReconciliationOutcome::Updated { changed }, entity.id))
            }
        }
    }

    /// Declared attributes plus references mapped to server identifiers.
    ///
    /// Composite components carry their version binding next to the id.
    async fn desired_attributes(&self, planned: &PlannedRecord) -> ContentflowResult<Map<String, Value>> {
        let record = &planned.record;
        let mut desired = record.remote_attributes();
        desired.insert("name".into(), Value::String(record.name.clone()));

        let mut by_field: BTreeMap<&'static str, Vec<Value>> = BTreeMap::new();
        let mut seen = HashSet::new();
        for reference in &planned.references {
            if !seen.insert((reference.field, &reference.target)) {
                continue;
            }
            let id = self.remote_id(&reference.target).await?;
            let value = match reference.binding {
                Some(binding) => component_value(id, binding),
                None => Value::String(id),
            };
            by_field.entry(reference.field).or_default().push(value);
        }

        let fields = schema(record.kind).references;
        for (field, mut ids) in by_field {
            let many = fields.iter().any(|f| f.field == field && f.many);
            let value = if many {
                Value::Array(ids)
            } else {
                ids.pop().unwrap_or(Value::Null)
            };
            desired.insert(reference_key(record.kind, field), value);
        }

        Ok(desired)
    }

    /// Identifier of a referenced record, from this run or from the server
    async fn remote_id(&self, target: &RecordKey) -> ContentflowResult<String> {
        if let Some(id) = self.ids.get(target).await {
            return Ok(id);
        }

        let found = self
            .caller
            .call("find", || {
                self.client.find(target.kind, &target.name, &target.organization)
            })
            .await?;

        match found {
            Some(entity) => {
                self.ids.insert(target.clone(), entity.id.clone()).await;
                Ok(entity.id)
            }
            None => Err(ContentflowError::MissingDependency {
                target: target.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ReferenceResolver;
    use crate::remote::InMemoryRemote;
    use crate::resources::{ResourceKind, ResourceLoader, ResourceSet};
    use std::time::Duration;

    fn settings() -> CallSettings {
        CallSettings {
            timeout: Duration::from_secs(5),
            retries: 0,
            backoff: Duration::from_millis(1),
        }
    }

    fn plan(set: &ResourceSet, stage: Stage) -> Vec<Vec<PlannedRecord>> {
        let graph = ReferenceResolver::resolve(set).unwrap();
        graph
            .levels(stage)
            .iter()
            .map(|level| {
                level
                    .iter()
                    .map(|key| PlannedRecord {
                        record: set.get(key).unwrap().clone(),
                        references: graph.references(key).to_vec(),
                    })
                    .collect()
            })
            .collect()
    }

    fn declarations() -> ResourceSet {
        ResourceLoader::new("ACME")
            .from_yaml(
                r#"
products:
  - name: P1
    label: p1
  - name: P2
repositories:
  - name: R1
    product: P1
    content_type: yum
"#,
            )
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_then_unchanged() {
        let set = declarations();
        let remote = Arc::new(InMemoryRemote::new());
        let reconciler = Reconciler::new(remote.clone(), settings(), 4);

        let first = reconciler
            .apply(Stage::Products, plan(&set, Stage::Products), FailurePolicy::Continue)
            .await;
        assert!(first
            .outcomes
            .iter()
            .all(|o| o.outcome == ReconciliationOutcome::Created));

        let second = reconciler
            .apply(Stage::Products, plan(&set, Stage::Products), FailurePolicy::Continue)
            .await;
        assert!(second
            .outcomes
            .iter()
            .all(|o| o.outcome == ReconciliationOutcome::Unchanged));
        assert_eq!(remote.count("create"), 2);
        assert_eq!(remote.count("update"), 0);
    }

    #[tokio::test]
    async fn test_drift_is_updated() {
        let set = declarations();
        let remote = Arc::new(InMemoryRemote::new());
        let reconciler = Reconciler::new(remote.clone(), settings(), 4);
        reconciler
            .apply(Stage::Products, plan(&set, Stage::Products), FailurePolicy::Continue)
            .await;

        remote.set_attribute(ResourceKind::Product, "ACME", "P1", "label", Value::from("changed"));

        let result = reconciler
            .apply(Stage::Products, plan(&set, Stage::Products), FailurePolicy::Continue)
            .await;
        assert_eq!(
            result.outcomes[0].outcome,
            ReconciliationOutcome::Updated {
                changed: vec!["label".into()]
            }
        );
        assert_eq!(result.outcomes[1].outcome, ReconciliationOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_reference_mapped_to_remote_id() {
        let set = declarations();
        let remote = Arc::new(InMemoryRemote::new());
        let reconciler = Reconciler::new(remote.clone(), settings(), 4);
        reconciler
            .apply(Stage::Products, plan(&set, Stage::Products), FailurePolicy::Continue)
            .await;
        reconciler
            .apply(Stage::Repositories, plan(&set, Stage::Repositories), FailurePolicy::Continue)
            .await;

        let product = remote.entity(ResourceKind::Product, "ACME", "P1").unwrap();
        let repo = remote.entity(ResourceKind::Repository, "ACME", "R1").unwrap();
        assert_eq!(repo.attributes["product_id"], Value::String(product.id));
    }

    #[tokio::test]
    async fn test_missing_dependency_fails_record() {
        let set = declarations();
        let remote = Arc::new(InMemoryRemote::new());
        let reconciler = Reconciler::new(remote.clone(), settings(), 4);

        // Products stage never ran
        let result = reconciler
            .apply(Stage::Repositories, plan(&set, Stage::Repositories), FailurePolicy::Continue)
            .await;
        match &result.outcomes[0].outcome {
            ReconciliationOutcome::Failed { reason } => {
                assert_eq!(reason.kind, FailureKind::MissingDependency)
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(remote.count("create"), 0);
    }

    #[tokio::test]
    async fn test_continue_policy_isolates_failures() {
        let set = declarations();
        let remote = Arc::new(InMemoryRemote::new());
        remote.fail_on("create", "P1", "422 Unprocessable Entity");
        let reconciler = Reconciler::new(remote.clone(), settings(), 1);

        let result = reconciler
            .apply(Stage::Products, plan(&set, Stage::Products), FailurePolicy::Continue)
            .await;
        assert!(result.outcomes[0].outcome.is_failed());
        assert_eq!(result.outcomes[1].outcome, ReconciliationOutcome::Created);
        assert!(!result.halted);
    }

    #[tokio::test]
    async fn test_fail_fast_halts_stage() {
        let set = declarations();
        let remote = Arc::new(InMemoryRemote::new());
        remote.fail_on("create", "P1", "422 Unprocessable Entity");
        let reconciler = Reconciler::new(remote.clone(), settings(), 1);

        let result = reconciler
            .apply(Stage::Products, plan(&set, Stage::Products), FailurePolicy::FailFast)
            .await;
        assert!(result.halted);
        assert!(result.outcomes[0].outcome.is_failed());
        assert_eq!(
            result.outcomes[1].outcome,
            ReconciliationOutcome::skipped("stage halted after a failure")
        );
    }

    #[tokio::test]
    async fn test_timeout_becomes_failed_outcome() {
        let set = declarations();
        let remote = Arc::new(InMemoryRemote::new());
        remote.delay_on("P2", Duration::from_millis(200));
        let reconciler = Reconciler::new(
            remote.clone(),
            CallSettings {
                timeout: Duration::from_millis(20),
                retries: 0,
                backoff: Duration::from_millis(1),
            },
            4,
        );

        let result = reconciler
            .apply(Stage::Products, plan(&set, Stage::Products), FailurePolicy::Continue)
            .await;
        assert_eq!(result.outcomes[0].outcome, ReconciliationOutcome::Created);
        match &result.outcomes[1].outcome {
            ReconciliationOutcome::Failed { reason } => assert_eq!(reason.kind, FailureKind::Timeout),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    fn many_products(count: usize) -> ResourceSet {
        let yaml: String = std::iter::once("products:\n".to_string())
            .chain((1..=count).map(|i| format!("  - name: P{}\n", i)))
            .collect();
        ResourceLoader::new("ACME").from_yaml(&yaml).unwrap()
    }

    #[tokio::test]
    async fn test_level_runs_concurrently_up_to_limit() {
        let set = many_products(6);

        let remote = Arc::new(InMemoryRemote::new().with_latency(Duration::from_millis(50)));
        let started = Instant::now();
        let result = Reconciler::new(remote.clone(), settings(), 2)
            .apply(Stage::Products, plan(&set, Stage::Products), FailurePolicy::Continue)
            .await;
        let bounded = started.elapsed();
        assert!(result
            .outcomes
            .iter()
            .all(|o| o.outcome == ReconciliationOutcome::Created));
        assert_eq!(remote.peak_in_flight(), 2);
        // Three rounds of find then create
        assert!(bounded >= Duration::from_millis(300), "{:?}", bounded);

        let remote = Arc::new(InMemoryRemote::new().with_latency(Duration::from_millis(50)));
        let started = Instant::now();
        Reconciler::new(remote.clone(), settings(), 6)
            .apply(Stage::Products, plan(&set, Stage::Products), FailurePolicy::Continue)
            .await;
        assert_eq!(remote.peak_in_flight(), 6);
        assert!(started.elapsed() < bounded, "{:?}", started.elapsed());
    }

    #[tokio::test]
    async fn test_cancel_mid_level_finishes_in_flight_record() {
        let set = many_products(4);
        let remote = Arc::new(InMemoryRemote::new().with_latency(Duration::from_millis(50)));
        let cancel = CancelSignal::new();
        let reconciler = Reconciler::new(remote.clone(), settings(), 1).with_cancel(cancel.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });
        let result = reconciler
            .apply(Stage::Products, plan(&set, Stage::Products), FailurePolicy::Continue)
            .await;
        canceller.await.unwrap();

        let created = result
            .outcomes
            .iter()
            .filter(|o| o.outcome == ReconciliationOutcome::Created)
            .count();
        let cancelled = result
            .outcomes
            .iter()
            .filter(|o| o.outcome == ReconciliationOutcome::skipped("cancelled"))
            .count();
        assert_eq!(result.outcomes.len(), 4);
        assert_eq!(created, 1);
        assert_eq!(cancelled, 3);
        assert_eq!(remote.count("create"), 1);
        assert_eq!(remote.count("find"), 1);
    }

    #[tokio::test]
    async fn test_cancelled_records_are_skipped() {
        let set = declarations();
        let remote = Arc::new(InMemoryRemote::new());
        let cancel = CancelSignal::new();
        cancel.cancel();
        let reconciler = Reconciler::new(remote.clone(), settings(), 4).with_cancel(cancel);

        let result = reconciler
            .apply(Stage::Products, plan(&set, Stage::Products), FailurePolicy::Continue)
            .await;
        assert!(result
            .outcomes
            .iter()
            .all(|o| o.outcome == ReconciliationOutcome::skipped("cancelled")));
        assert_eq!(remote.call_count(), 0);
    }
}
