// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! Run driver
//!
//! Validates and resolves the declarations, then walks the selected stages
//! in their fixed order. Nothing is sent to the server until resolution has
//! succeeded.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

use super::{ReferenceResolver, ResolvedGraph, Stage, StageGraph, StageSelection};
use crate::errors::{ContentflowError, ContentflowResult};
use crate::promotion::{
    ContentViewPlan, PromotionEngine, PromotionPolicy, PromotionRequest, PromotionTransition,
};
use crate::reconcile::{
    CallSettings, CancelSignal, FailurePolicy, PlannedRecord, ReconciliationOutcome, Reconciler,
    RecordOutcome, RemoteCaller, RemoteIds,
};
use crate::remote::RemoteClient;
use crate::report::{ExecutionReport, StageReport};
use crate::resources::{RecordKey, ResourceKind, ResourceSet, ResourceValidator, VersionBinding};

/// Progress notifications emitted while a run is in flight
#[derive(Debug, Clone)]
pub enum RunEvent {
    StageStarted { stage: Stage, records: usize },
    RecordFinished { key: RecordKey, outcome: ReconciliationOutcome },
    StageFinished { stage: Stage },
    Transition(PromotionTransition),
}

/// Failure policy per stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePolicies {
    pub default: FailurePolicy,
    #[serde(default)]
    pub overrides: BTreeMap<Stage, FailurePolicy>,
}

impl StagePolicies {
    pub fn for_stage(&self, stage: Stage) -> FailurePolicy {
        self.overrides.get(&stage).copied().unwrap_or(self.default)
    }
}

/// Everything that shapes a run
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub selections: Vec<StageSelection>,
    pub policies: StagePolicies,
    pub call: CallSettings,
    /// Records of one level applied at once
    pub concurrency: usize,
    pub promotion: PromotionPolicy,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            selections: StageGraph::allowed_subset(&[]).unwrap_or_default(),
            policies: StagePolicies::default(),
            call: CallSettings::default(),
            concurrency: 4,
            promotion: PromotionPolicy::default(),
        }
    }
}

/// Drives a whole run against one remote
pub struct Orchestrator {
    client: Arc<dyn RemoteClient>,
    options: RunOptions,
    cancel: CancelSignal,
    events: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl Orchestrator {
    pub fn new(client: Arc<dyn RemoteClient>, options: RunOptions) -> Self {
        Self {
            client,
            options,
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

    /// Validate and resolve without touching the server
    pub fn prepare(set: &ResourceSet) -> ContentflowResult<ResolvedGraph> {
        let validation = ResourceValidator::validate(set);
        if !validation.is_valid() {
            return Err(ContentflowError::Validation {
                errors: validation.errors,
            });
        }
        ReferenceResolver::resolve(set)
    }

    /// Apply the declarations.
    ///
    /// Structural errors are returned before any remote call; everything
    /// after that is captured in the report.
    pub async fn run(&self, set: &ResourceSet) -> ContentflowResult<ExecutionReport> {
        let started = Instant::now();
        let graph = Self::prepare(set)?;

        tracing::info!(
            records = set.len(),
            stages = self.options.selections.len(),
            backend = self.client.name(),
            "starting run"
        );

        let mut reconciler = Reconciler::new(
            Arc::clone(&self.client),
            self.options.call,
            self.options.concurrency,
        )
        .with_cancel(self.cancel.clone());
        if let Some(events) = &self.events {
            reconciler = reconciler.with_events(events.clone());
        }

        let mut report = ExecutionReport::new(self.client.name(), set.digest());
        let mut view_outcomes: HashMap<RecordKey, ReconciliationOutcome> = HashMap::new();

        for (position, selection) in self.options.selections.iter().enumerate() {
            let stage = selection.stage;

            if !stage.reconciles_records() {
                self.publish_promote(set, &graph, selection, &reconciler, &view_outcomes, &mut report)
                    .await;
                continue;
            }

            let levels = planned_levels(set, &graph, stage);
            let count: usize = levels.iter().map(Vec::len).sum();
            if count == 0 {
                continue;
            }

            let policy = self.options.policies.for_stage(stage);
            tracing::info!(stage = %stage, records = count, policy = %policy, "applying stage");
            self.emit(RunEvent::StageStarted { stage, records: count });

            let outcome = reconciler.apply(stage, levels, policy).await;

            if stage == Stage::ContentViews {
                for record in &outcome.outcomes {
                    view_outcomes.insert(record.key.clone(), record.outcome.clone());
                }
            }
            for record in outcome.outcomes.iter().filter(|o| o.outcome.is_failed()) {
                let dependents = graph.dependents(&record.key);
                if !dependents.is_empty() {
                    tracing::warn!(record = %record.key, dependents = dependents.len(), "records depending on a failed record");
                }
            }

            report.stages.push(StageReport {
                stage,
                policy,
                outcomes: outcome.outcomes,
                halted: outcome.halted,
            });
            self.emit(RunEvent::StageFinished { stage });

            if outcome.halted {
                tracing::warn!(stage = %stage, "fail-fast stage failed, aborting run");
                report.aborted_at = Some(stage);
                let remaining = &self.options.selections[position + 1..];
                self.skip_stages(set, &graph, remaining, stage, &mut report);
                break;
            }
        }

        report.cancelled = self.cancel.is_cancelled();
        report.duration_ms = started.elapsed().as_millis() as u64;

        let totals = report.totals();
        tracing::info!(
            created = totals.created,
            updated = totals.updated,
            unchanged = totals.unchanged,
            skipped = totals.skipped,
            failed = totals.failed,
            "run finished"
        );

        Ok(report)
    }

    /// Report every record of the stages a fail-fast abort never reached
    fn skip_stages(
        &self,
        set: &ResourceSet,
        graph: &ResolvedGraph,
        remaining: &[StageSelection],
        aborted: Stage,
        report: &mut ExecutionReport,
    ) {
        let reason = format!("run aborted after {}", aborted);
        for selection in remaining.iter().filter(|s| s.stage.reconciles_records()) {
            let outcomes: Vec<RecordOutcome> = graph
                .levels(selection.stage)
                .iter()
                .flatten()
                .filter(|key| set.get(key).is_some())
                .map(|key| RecordOutcome::skipped(key.clone(), &reason))
                .collect();
            if outcomes.is_empty() {
                continue;
            }

            for outcome in &outcomes {
                self.emit(RunEvent::RecordFinished {
                    key: outcome.key.clone(),
                    outcome: outcome.outcome.clone(),
                });
            }
            report.stages.push(StageReport {
                stage: selection.stage,
                policy: self.options.policies.for_stage(selection.stage),
                outcomes,
                halted: false,
            });
        }
    }

    async fn publish_promote(
        &self,
        set: &ResourceSet,
        graph: &ResolvedGraph,
        selection: &StageSelection,
        reconciler: &Reconciler,
        view_outcomes: &HashMap<RecordKey, ReconciliationOutcome>,
        report: &mut ExecutionReport,
    ) {
        let plans = content_view_plans(set, graph, view_outcomes);
        if plans.is_empty() {
            return;
        }

        tracing::info!(
            content_views = plans.len(),
            publish = selection.publish,
            promote = selection.promote,
            "publish/promote"
        );
        self.emit(RunEvent::StageStarted {
            stage: selection.stage,
            records: plans.len(),
        });

        let mut engine = PromotionEngine::new(
            Arc::clone(&self.client),
            RemoteCaller::new(self.options.call),
            self.options.promotion,
            reconciler.ids().clone(),
        );
        let outcome = engine
            .run(
                &plans,
                |organization| graph.chain(organization),
                selection.publish,
                selection.promote,
                &self.cancel,
            )
            .await;

        for transition in &outcome.transitions {
            self.emit(RunEvent::Transition(transition.clone()));
        }
        self.emit(RunEvent::StageFinished {
            stage: selection.stage,
        });
        report.promotions = outcome;
    }

    /// Promote a declared content view by hand
    pub async fn promote(
        &self,
        set: &ResourceSet,
        organization: &str,
        content_view: &str,
        environment: &str,
        version: Option<u32>,
        force: bool,
    ) -> ContentflowResult<Option<PromotionTransition>> {
        let graph = Self::prepare(set)?;

        let key = [ResourceKind::ContentView, ResourceKind::CompositeContentView]
            .into_iter()
            .map(|kind| RecordKey::new(kind, organization, content_view))
            .find(|key| set.get(key).is_some())
            .ok_or_else(|| ContentflowError::UnknownContentView {
                name: content_view.to_string(),
            })?;

        let mut engine = PromotionEngine::new(
            Arc::clone(&self.client),
            RemoteCaller::new(self.options.call),
            self.options.promotion,
            RemoteIds::new(),
        );
        let request = PromotionRequest {
            content_view: key,
            environment: environment.to_string(),
            version,
            force,
        };
        engine.promote(&request, &graph.chain(organization)).await
    }

    fn emit(&self, event: RunEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

fn planned_levels(set: &ResourceSet, graph: &ResolvedGraph, stage: Stage) -> Vec<Vec<PlannedRecord>> {
    graph
        .levels(stage)
        .iter()
        .map(|level| {
            level
                .iter()
                .filter_map(|key| {
                    set.get(key).map(|record| PlannedRecord {
                        record: record.clone(),
                        references: graph.references(key).to_vec(),
                    })
                })
                .collect()
        })
        .collect()
}

/// Content views in application order; components come before composites
fn content_view_plans(
    set: &ResourceSet,
    graph: &ResolvedGraph,
    view_outcomes: &HashMap<RecordKey, ReconciliationOutcome>,
) -> Vec<ContentViewPlan> {
    graph
        .levels(Stage::ContentViews)
        .iter()
        .flatten()
        .filter_map(|key| {
            let record = set.get(key)?;
            // Views not reconciled in this run are taken as they are on the server
            let (changed, reconciled) = match view_outcomes.get(key) {
                None => (false, true),
                Some(outcome) => (
                    outcome.is_change(),
                    !matches!(
                        outcome,
                        ReconciliationOutcome::Failed { .. } | ReconciliationOutcome::Skipped { .. }
                    ),
                ),
            };
            let components = graph
                .references(key)
                .iter()
                .filter(|r| r.field == "components")
                .map(|r| (r.target.clone(), r.binding.unwrap_or(VersionBinding::Latest)))
                .collect();

            Some(ContentViewPlan {
                key: key.clone(),
                changed,
                reconciled,
                auto_publish: record.flag("auto_publish"),
                components,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promotion::TransitionKind;
    use crate::remote::InMemoryRemote;
    use crate::report::{EXIT_ABORTED, EXIT_FAILURES, EXIT_SUCCESS};
    use crate::resources::ResourceLoader;
    use std::time::Duration;

    const SCENARIO: &str = r#"
products:
  - name: P1
repositories:
  - name: R1
    product: P1
    content_type: yum
lifecycle_environments:
  - name: Development
  - name: QA
  - name: Production
content_views:
  - name: CV1
    repositories: [R1]
"#;

    fn load(yaml: &str) -> ResourceSet {
        ResourceLoader::new("ACME").from_yaml(yaml).unwrap()
    }

    fn options() -> RunOptions {
        let mut options = RunOptions::default();
        options.call = CallSettings {
            timeout: Duration::from_secs(5),
            retries: 0,
            backoff: Duration::from_millis(1),
        };
        options.promotion.poll.interval = Duration::from_millis(1);
        options
    }

    fn orchestrator(remote: &Arc<InMemoryRemote>, options: RunOptions) -> Orchestrator {
        let client: Arc<dyn RemoteClient> = remote.clone();
        Orchestrator::new(client, options)
    }

    fn outcome_of<'a>(report: &'a ExecutionReport, kind: ResourceKind, name: &str) -> &'a ReconciliationOutcome {
        report
            .outcomes()
            .map(|(_, o)| o)
            .find(|o| o.key.kind == kind && o.key.name == name)
            .map(|o| &o.outcome)
            .unwrap()
    }

    #[tokio::test]
    async fn test_first_run_creates_publishes_and_promotes() {
        let remote = Arc::new(InMemoryRemote::new());
        let report = orchestrator(&remote, options()).run(&load(SCENARIO)).await.unwrap();

        assert_eq!(report.exit_code(), EXIT_SUCCESS);
        assert_eq!(outcome_of(&report, ResourceKind::Product, "P1"), &ReconciliationOutcome::Created);
        assert_eq!(outcome_of(&report, ResourceKind::Repository, "R1"), &ReconciliationOutcome::Created);
        assert_eq!(outcome_of(&report, ResourceKind::ContentView, "CV1"), &ReconciliationOutcome::Created);

        let transitions = &report.promotions.transitions;
        assert_eq!(transitions.len(), 2);
        assert_eq!(transitions[0].kind, TransitionKind::Publish);
        assert_eq!(transitions[0].version, 1);
        assert_eq!(transitions[1].environment, "Development");
    }

    #[tokio::test]
    async fn test_second_run_is_unchanged() {
        let remote = Arc::new(InMemoryRemote::new());
        let set = load(SCENARIO);
        orchestrator(&remote, options()).run(&set).await.unwrap();
        let creates = remote.count("create");

        let report = orchestrator(&remote, options()).run(&set).await.unwrap();
        assert!(report
            .outcomes()
            .all(|(_, o)| o.outcome == ReconciliationOutcome::Unchanged));
        assert!(report.promotions.transitions.is_empty());
        assert_eq!(remote.count("create"), creates);
        assert_eq!(remote.count("update"), 0);
        assert_eq!(remote.count("publish"), 1);
    }

    #[tokio::test]
    async fn test_dangling_reference_makes_no_calls() {
        let remote = Arc::new(InMemoryRemote::new());
        let set = load(
            r#"
activation_keys:
  - name: ak-dev
    content_view: CV-X
"#,
        );

        let result = orchestrator(&remote, options()).run(&set).await;
        assert!(matches!(
            result,
            Err(ContentflowError::UnresolvedReference { .. })
        ));
        assert_eq!(remote.call_count(), 0);
    }

    #[tokio::test]
    async fn test_stage_order_is_respected() {
        let remote = Arc::new(InMemoryRemote::new());
        let set = load(
            r#"
operating_systems:
  - name: RedHat 9
    major: 9
    family: Redhat
    ptables: [Kickstart default]
partition_tables:
  - name: Kickstart default
    layout: "autopart"
    os_family: Redhat
activation_keys:
  - name: ak-dev
    content_view: CV1
    lifecycle_environment: Development
sync_plans:
  - name: nightly
    interval: daily
    sync_date: "2024-01-01 00:00:00 UTC"
    products: [P1]
credentials:
  - name: RPM-GPG-KEY
    content_type: gpg_key
    content: "-----BEGIN PGP PUBLIC KEY BLOCK-----"
"#,
        )
        .tap_extend(SCENARIO);

        let report = orchestrator(&remote, options()).run(&set).await.unwrap();
        assert_eq!(report.exit_code(), EXIT_SUCCESS);

        // Every create of a later stage comes after every create of an earlier one
        let ranks: Vec<usize> = remote
            .calls()
            .iter()
            .filter(|c| c.operation == "create")
            .filter_map(|c| c.kind)
            .map(|k| Stage::of(k).rank())
            .collect();
        assert!(ranks.windows(2).all(|w| w[0] <= w[1]), "{:?}", ranks);
        assert_eq!(ranks.len(), 11);
    }

    #[tokio::test]
    async fn test_composite_published_after_components() {
        let remote = Arc::new(InMemoryRemote::new());
        let set = load(
            r#"
composite_content_views:
  - name: CCV
    components:
      - CV1
      - content_view: CV2
        version: latest
content_views:
  - name: CV1
  - name: CV2
"#,
        );

        let report = orchestrator(&remote, options()).run(&set).await.unwrap();
        let published: Vec<&str> = report
            .promotions
            .transitions
            .iter()
            .filter(|t| t.kind == TransitionKind::Publish)
            .map(|t| t.content_view.name.as_str())
            .collect();
        assert_eq!(published, vec!["CV1", "CV2", "CCV"]);
    }

    #[tokio::test]
    async fn test_changed_component_pin_updates_and_republishes() {
        let remote = Arc::new(InMemoryRemote::new());
        let first = load(
            r#"
content_views:
  - name: CV2
composite_content_views:
  - name: PINNED
    components:
      - content_view: CV2
        version: 1
  - name: FLOATING
    components: [CV2]
"#,
        );
        let report = orchestrator(&remote, options()).run(&first).await.unwrap();
        assert_eq!(report.exit_code(), EXIT_SUCCESS);

        let pinned = remote.entity(ResourceKind::CompositeContentView, "ACME", "PINNED").unwrap();
        let floating = remote.entity(ResourceKind::CompositeContentView, "ACME", "FLOATING").unwrap();
        assert_ne!(pinned.attributes["components"], floating.attributes["components"]);
        assert_eq!(pinned.attributes["components"][0]["version"], 1);

        // CV2 gets a second version, and PINNED moves to it
        let second = load(
            r#"
content_views:
  - name: CV2
    auto_publish: true
composite_content_views:
  - name: PINNED
    components:
      - content_view: CV2
        version: 2
  - name: FLOATING
    components: [CV2]
"#,
        );
        let report = orchestrator(&remote, options()).run(&second).await.unwrap();
        assert_eq!(report.exit_code(), EXIT_SUCCESS);
        assert_eq!(
            outcome_of(&report, ResourceKind::CompositeContentView, "PINNED"),
            &ReconciliationOutcome::Updated {
                changed: vec!["components".into()]
            }
        );
        assert_eq!(
            outcome_of(&report, ResourceKind::CompositeContentView, "FLOATING"),
            &ReconciliationOutcome::Unchanged
        );

        let published: Vec<(&str, u32)> = report
            .promotions
            .transitions
            .iter()
            .filter(|t| t.kind == TransitionKind::Publish)
            .map(|t| (t.content_view.name.as_str(), t.version))
            .collect();
        assert_eq!(published, vec![("CV2", 2), ("PINNED", 2)]);
    }

    #[tokio::test]
    async fn test_fail_fast_stage_aborts_run() {
        let remote = Arc::new(InMemoryRemote::new());
        remote.fail_on("create", "P1", "500 Internal Server Error");

        let mut options = options();
        options
            .policies
            .overrides
            .insert(Stage::Products, FailurePolicy::FailFast);

        let report = orchestrator(&remote, options).run(&load(SCENARIO)).await.unwrap();
        assert_eq!(report.aborted_at, Some(Stage::Products));
        assert_eq!(report.exit_code(), EXIT_ABORTED);
        assert!(!report.succeeded());
        assert_eq!(remote.count("publish"), 0);

        // Stages after the abort are reported, not dropped
        let reported: Vec<Stage> = report.stages.iter().map(|s| s.stage).collect();
        assert_eq!(
            reported,
            vec![
                Stage::Products,
                Stage::Repositories,
                Stage::LifecycleEnvironments,
                Stage::ContentViews
            ]
        );
        assert_eq!(report.outcomes().count(), 6);
        assert_eq!(
            outcome_of(&report, ResourceKind::ContentView, "CV1"),
            &ReconciliationOutcome::skipped("run aborted after products")
        );
        assert_eq!(remote.count("create"), 1);
    }

    #[tokio::test]
    async fn test_continue_policy_reports_dependents() {
        let remote = Arc::new(InMemoryRemote::new());
        remote.fail_on("create", "P1", "500 Internal Server Error");

        let report = orchestrator(&remote, options()).run(&load(SCENARIO)).await.unwrap();
        assert!(outcome_of(&report, ResourceKind::Product, "P1").is_failed());
        assert!(outcome_of(&report, ResourceKind::Repository, "R1").is_failed());
        assert!(report.succeeded());
        assert_eq!(report.exit_code(), EXIT_FAILURES);
    }

    #[tokio::test]
    async fn test_tags_limit_stages() {
        let remote = Arc::new(InMemoryRemote::new());
        let mut options = options();
        options.selections = StageGraph::allowed_subset(&["products".to_string()]).unwrap();

        let report = orchestrator(&remote, options).run(&load(SCENARIO)).await.unwrap();
        assert_eq!(report.stages.len(), 1);
        assert_eq!(remote.count("create"), 1);
        assert_eq!(remote.count("publish"), 0);
    }

    #[tokio::test]
    async fn test_manual_promotion_order() {
        let remote = Arc::new(InMemoryRemote::new());
        let set = load(SCENARIO);
        let orchestrator = orchestrator(&remote, options());
        orchestrator.run(&set).await.unwrap();

        let skipped = orchestrator
            .promote(&set, "ACME", "CV1", "Production", None, false)
            .await;
        assert!(matches!(skipped, Err(ContentflowError::PromotionOrder { .. })));

        let qa = orchestrator
            .promote(&set, "ACME", "CV1", "QA", None, false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(qa.environment, "QA");

        let unknown = orchestrator.promote(&set, "ACME", "nope", "QA", None, false).await;
        assert!(matches!(unknown, Err(ContentflowError::UnknownContentView { .. })));
    }

    trait TapExtend {
        fn tap_extend(self, yaml: &str) -> Self;
    }

    impl TapExtend for ResourceSet {
        fn tap_extend(mut self, yaml: &str) -> Self {
            self.extend(load(yaml));
            self
        }
    }
}
