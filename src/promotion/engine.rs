// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! Publish and promote sequencing

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use super::{LifecycleChain, PublishState};
use crate::errors::{ContentflowError, ContentflowResult};
use crate::reconcile::{wait_for_task, CancelSignal, PollSettings, RemoteCaller, RemoteIds};
use crate::remote::RemoteClient;
use crate::resources::{RecordKey, ResourceKind, VersionBinding, LIBRARY};

/// When the engine publishes and promotes on its own
#[derive(Debug, Clone, Copy)]
pub struct PromotionPolicy {
    /// Publish every content view on every run
    pub auto_publish: bool,
    /// Move a newly published version into the first environment of the chain
    pub auto_promote: bool,
    pub poll: PollSettings,
}

impl Default for PromotionPolicy {
    fn default() -> Self {
        Self {
            auto_publish: false,
            auto_promote: true,
            poll: PollSettings::default(),
        }
    }
}

/// An explicit promotion
#[derive(Debug, Clone)]
pub struct PromotionRequest {
    pub content_view: RecordKey,
    pub environment: String,
    /// Version to promote; the latest when unset
    pub version: Option<u32>,
    /// Skip the successor check
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Publish,
    Promote,
}

impl std::fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Publish => write!(f, "publish"),
            Self::Promote => write!(f, "promote"),
        }
    }
}

/// A version moved into an environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromotionTransition {
    pub content_view: RecordKey,
    pub kind: TransitionKind,
    pub version: u32,
    /// Library for publishes
    pub environment: String,
    pub forced: bool,
}

impl std::fmt::Display for PromotionTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            TransitionKind::Publish => {
                write!(f, "{} published version {}", self.content_view, self.version)
            }
            TransitionKind::Promote => write!(
                f,
                "{} version {} promoted to {}{}",
                self.content_view,
                self.version,
                self.environment,
                if self.forced { " (forced)" } else { "" }
            ),
        }
    }
}

/// A publish or promote that did not happen
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromotionFailure {
    pub content_view: RecordKey,
    pub operation: TransitionKind,
    pub reason: String,
}

/// Everything the publish/promote stage did
#[derive(Debug, Clone, Default, Serialize)]
pub struct PromotionOutcome {
    pub transitions: Vec<PromotionTransition>,
    pub failures: Vec<PromotionFailure>,
}

/// A content view going through the publish/promote stage
#[derive(Debug, Clone)]
pub struct ContentViewPlan {
    pub key: RecordKey,
    /// Created or updated in this run
    pub changed: bool,
    /// Reconciled without failure; views that failed are left alone
    pub reconciled: bool,
    /// The view's own `auto_publish` flag
    pub auto_publish: bool,
    /// Components of a composite view with their bindings
    pub components: Vec<(RecordKey, VersionBinding)>,
}

/// Publishes content views and promotes versions along lifecycle chains
pub struct PromotionEngine {
    client: Arc<dyn RemoteClient>,
    caller: RemoteCaller,
    policy: PromotionPolicy,
    ids: RemoteIds,
    states: HashMap<RecordKey, PublishState>,
}

impl PromotionEngine {
    pub fn new(
        client: Arc<dyn RemoteClient>,
        caller: RemoteCaller,
        policy: PromotionPolicy,
        ids: RemoteIds,
    ) -> Self {
        Self {
            client,
            caller,
            policy,
            ids,
            states: HashMap::new(),
        }
    }

    /// Publish state as last seen by the engine
    pub fn state(&self, key: &RecordKey) -> Option<&PublishState> {
        self.states.get(key)
    }

    /// Server id and publish state of a content view
    async fn load(&mut self, key: &RecordKey) -> ContentflowResult<(String, PublishState)> {
        let cached_id = self.ids.get(key).await;
        if let (Some(id), Some(state)) = (cached_id, self.states.get(key)) {
            return Ok((id, state.clone()));
        }

        let client = &self.client;
        let entity = self
            .caller
            .call("find", || client.find(key.kind, &key.name, &key.organization))
            .await?
            .ok_or_else(|| ContentflowError::MissingDependency {
                target: key.to_string(),
            })?;

        let state = PublishState::from_attributes(&entity.attributes);
        self.ids.insert(key.clone(), entity.id.clone()).await;
        self.states.insert(key.clone(), state.clone());
        Ok((entity.id, state))
    }

    async fn environment_id(&self, organization: &str, environment: &str) -> ContentflowResult<String> {
        let key = RecordKey::new(ResourceKind::LifecycleEnvironment, organization, environment);
        if let Some(id) = self.ids.get(&key).await {
            return Ok(id);
        }

        let client = &self.client;
        let entity = self
            .caller
            .call("find", || client.find(key.kind, &key.name, &key.organization))
            .await?
            .ok_or_else(|| ContentflowError::MissingDependency {
                target: key.to_string(),
            })?;
        self.ids.insert(key, entity.id.clone()).await;
        Ok(entity.id)
    }

    /// Publish a new version of a content view.
    ///
    /// A composite view is published only when every component has a
    /// published version matching its binding.
    pub async fn publish(
        &mut self,
        key: &RecordKey,
        components: &[(RecordKey, VersionBinding)],
    ) -> ContentflowResult<PromotionTransition> {
        for (component, binding) in components {
            let (_, state) = self.load(component).await?;
            let satisfied = match (binding, state.latest()) {
                (_, None) => false,
                (VersionBinding::Latest, Some(_)) => true,
                (VersionBinding::Version(v), Some(latest)) => *v > 0 && *v <= latest,
            };
            if !satisfied {
                return Err(ContentflowError::PromotionPrecondition {
                    content_view: key.name.clone(),
                    operation: "publish".into(),
                    reason: format!(
                        "component '{}' has no published version matching '{}'",
                        component.name, binding
                    ),
                });
            }
        }

        let (id, mut state) = self.load(key).await?;
        let client = &self.client;
        let ticket = self
            .caller
            .without_retries()
            .call("publish", || client.publish(&id))
            .await?;
        if let Some(task) = &ticket.task {
            wait_for_task(self.client.as_ref(), &self.caller, task, &self.policy.poll).await?;
        }

        state.record_publish(ticket.version);
        self.states.insert(key.clone(), state);
        tracing::info!(content_view = %key, version = ticket.version, "published");

        Ok(PromotionTransition {
            content_view: key.clone(),
            kind: TransitionKind::Publish,
            version: ticket.version,
            environment: LIBRARY.to_string(),
            forced: false,
        })
    }

    /// Promote a version one step along the chain.
    ///
    /// Returns `None` when the version is already in the environment.
    pub async fn promote(
        &mut self,
        request: &PromotionRequest,
        chain: &LifecycleChain,
    ) -> ContentflowResult<Option<PromotionTransition>> {
        let key = &request.content_view;
        let environment = request.environment.as_str();
        let precondition = |reason: String| ContentflowError::PromotionPrecondition {
            content_view: key.name.clone(),
            operation: "promote".into(),
            reason,
        };

        let (id, mut state) = self.load(key).await?;
        let latest = state
            .latest()
            .ok_or_else(|| precondition("it has never been published".into()))?;
        let version = request.version.unwrap_or(latest);
        if version == 0 || version > latest {
            return Err(precondition(format!("version {} has not been published", version)));
        }

        match chain.position(environment) {
            None => {
                return Err(precondition(format!(
                    "'{}' is not in the lifecycle chain {}",
                    environment, chain
                )))
            }
            Some(0) => {
                return Err(precondition(format!(
                    "versions enter {} by publishing",
                    LIBRARY
                )))
            }
            Some(_) => {}
        }

        if state.version_in(environment) == Some(version) {
            tracing::debug!(content_view = %key, version, environment, "already promoted");
            return Ok(None);
        }

        if !request.force {
            let frontier = state
                .frontier(version, chain)
                .ok_or_else(|| precondition(format!("version {} is not in any environment", version)))?;
            let expected = chain.successor(frontier);
            if expected != Some(environment) {
                return Err(ContentflowError::PromotionOrder {
                    content_view: key.name.clone(),
                    requested: environment.to_string(),
                    expected: expected
                        .unwrap_or("none, the version is at the end of the chain")
                        .to_string(),
                });
            }
        }

        let environment_id = self.environment_id(&key.organization, environment).await?;
        let client = &self.client;
        let task = self
            .caller
            .without_retries()
            .call("promote", || client.promote(&id, version, &environment_id))
            .await?;
        wait_for_task(self.client.as_ref(), &self.caller, &task, &self.policy.poll).await?;

        state.record_promotion(environment, version);
        self.states.insert(key.clone(), state);
        tracing::info!(content_view = %key, version, environment, force = request.force, "promoted");

        Ok(Some(PromotionTransition {
            content_view: key.clone(),
            kind: TransitionKind::Promote,
            version,
            environment: environment.to_string(),
            forced: request.force,
        }))
    }

    /// Run the publish/promote stage over content views in application order
    pub async fn run<F>(
        &mut self,
        plans: &[ContentViewPlan],
        chain_for: F,
        publish: bool,
        promote: bool,
        cancel: &CancelSignal,
    ) -> PromotionOutcome
    where
        F: Fn(&str) -> LifecycleChain,
    {
        let mut outcome = PromotionOutcome::default();

        for plan in plans {
            if cancel.is_cancelled() {
                tracing::warn!("publish/promote cancelled");
                break;
            }
            if !plan.reconciled {
                tracing::warn!(content_view = %plan.key, "not reconciled, skipping publish");
                continue;
            }

            let state = match self.load(&plan.key).await {
                Ok((_, state)) => state,
                Err(e) => {
                    outcome.failures.push(failure(&plan.key, TransitionKind::Publish, &e));
                    continue;
                }
            };

            if publish {
                let wanted = plan.changed
                    || !state.is_published()
                    || self.policy.auto_publish
                    || plan.auto_publish;

                if wanted {
                    match self.publish(&plan.key, &plan.components).await {
                        Ok(transition) => outcome.transitions.push(transition),
                        Err(e) => {
                            tracing::warn!(content_view = %plan.key, error = %e, "publish failed");
                            outcome.failures.push(failure(&plan.key, TransitionKind::Publish, &e));
                            continue;
                        }
                    }
                }
            }

            if promote && self.policy.auto_promote {
                if let Err(e) = self.auto_promote(&plan.key, &chain_for(&plan.key.organization), &mut outcome).await {
                    tracing::warn!(content_view = %plan.key, error = %e, "promotion failed");
                    outcome.failures.push(failure(&plan.key, TransitionKind::Promote, &e));
                }
            }
        }

        outcome
    }

    /// Move the latest version from Library into the chain's first environment
    async fn auto_promote(
        &mut self,
        key: &RecordKey,
        chain: &LifecycleChain,
        outcome: &mut PromotionOutcome,
    ) -> ContentflowResult<()> {
        let Some(first) = chain.first() else {
            return Ok(());
        };
        let Some(state) = self.states.get(key) else {
            return Ok(());
        };
        let Some(latest) = state.latest() else {
            return Ok(());
        };
        if state.frontier(latest, chain) != Some(LIBRARY) {
            return Ok(());
        }

        let request = PromotionRequest {
            content_view: key.clone(),
            environment: first.to_string(),
            version: Some(latest),
            force: false,
        };
        if let Some(transition) = self.promote(&request, chain).await? {
            outcome.transitions.push(transition);
        }
        Ok(())
    }
}

fn failure(key: &RecordKey, operation: TransitionKind, error: &ContentflowError) -> PromotionFailure {
    PromotionFailure {
        content_view: key.clone(),
        operation,
        reason: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::CallSettings;
    use crate::remote::InMemoryRemote;
    use serde_json::Map;
    use std::time::Duration;

    fn chain() -> LifecycleChain {
        LifecycleChain::new(
            "ACME",
            vec!["Development".into(), "QA".into(), "Production".into()],
        )
    }

    fn cv(name: &str) -> RecordKey {
        RecordKey::new(ResourceKind::ContentView, "ACME", name)
    }

    fn setup() -> (Arc<InMemoryRemote>, PromotionEngine) {
        let remote = Arc::new(InMemoryRemote::new().with_task_polls(1));
        for env in ["Development", "QA", "Production"] {
            remote.seed(ResourceKind::LifecycleEnvironment, "ACME", env, Map::new());
        }
        remote.seed(ResourceKind::ContentView, "ACME", "CV1", Map::new());

        let policy = PromotionPolicy {
            poll: PollSettings {
                interval: Duration::from_millis(1),
                deadline: Duration::from_secs(5),
            },
            ..PromotionPolicy::default()
        };
        let engine = PromotionEngine::new(
            remote.clone(),
            RemoteCaller::new(CallSettings::default()),
            policy,
            RemoteIds::new(),
        );
        (remote, engine)
    }

    fn plan(key: RecordKey, changed: bool) -> ContentViewPlan {
        ContentViewPlan {
            key,
            changed,
            reconciled: true,
            auto_publish: false,
            components: Vec::new(),
        }
    }

    fn request(environment: &str, force: bool) -> PromotionRequest {
        PromotionRequest {
            content_view: cv("CV1"),
            environment: environment.into(),
            version: None,
            force,
        }
    }

    #[tokio::test]
    async fn test_publish_then_auto_promote() {
        let (remote, mut engine) = setup();
        let outcome = engine
            .run(&[plan(cv("CV1"), true)], |_| chain(), true, true, &CancelSignal::new())
            .await;

        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.transitions.len(), 2);
        assert_eq!(outcome.transitions[0].kind, TransitionKind::Publish);
        assert_eq!(outcome.transitions[0].version, 1);
        assert_eq!(outcome.transitions[1].kind, TransitionKind::Promote);
        assert_eq!(outcome.transitions[1].environment, "Development");

        let view = remote.entity(ResourceKind::ContentView, "ACME", "CV1").unwrap();
        let state = PublishState::from_attributes(&view.attributes);
        assert_eq!(state.version_in("Development"), Some(1));
    }

    #[tokio::test]
    async fn test_unchanged_view_is_not_republished() {
        let (remote, mut engine) = setup();
        engine
            .run(&[plan(cv("CV1"), true)], |_| chain(), true, true, &CancelSignal::new())
            .await;

        let second = engine
            .run(&[plan(cv("CV1"), false)], |_| chain(), true, true, &CancelSignal::new())
            .await;
        assert!(second.transitions.is_empty());
        assert_eq!(remote.count("publish"), 1);
        assert_eq!(remote.count("promote"), 1);
    }

    #[tokio::test]
    async fn test_auto_publish_flag_republishes() {
        let (remote, mut engine) = setup();
        let mut view = plan(cv("CV1"), false);
        view.auto_publish = true;

        engine.run(&[view.clone()], |_| chain(), true, false, &CancelSignal::new()).await;
        engine.run(&[view], |_| chain(), true, false, &CancelSignal::new()).await;
        assert_eq!(remote.count("publish"), 2);
        assert_eq!(remote.count("promote"), 0);
    }

    #[tokio::test]
    async fn test_promotion_must_follow_chain() {
        let (_, mut engine) = setup();
        engine.publish(&cv("CV1"), &[]).await.unwrap();

        let skipped = engine.promote(&request("QA", false), &chain()).await;
        match skipped {
            Err(ContentflowError::PromotionOrder { expected, .. }) => {
                assert_eq!(expected, "Development")
            }
            other => panic!("expected promotion order error, got {:?}", other),
        }

        engine.promote(&request("Development", false), &chain()).await.unwrap();
        let qa = engine.promote(&request("QA", false), &chain()).await.unwrap();
        assert_eq!(qa.unwrap().environment, "QA");

        // Already there
        assert!(engine
            .promote(&request("QA", false), &chain())
            .await
            .unwrap()
            .is_none());

        // A new version starts over from Library
        engine.publish(&cv("CV1"), &[]).await.unwrap();
        let result = engine.promote(&request("QA", false), &chain()).await;
        assert!(matches!(result, Err(ContentflowError::PromotionOrder { .. })));
    }

    #[tokio::test]
    async fn test_force_skips_environments() {
        let (_, mut engine) = setup();
        engine.publish(&cv("CV1"), &[]).await.unwrap();

        let transition = engine
            .promote(&request("Production", true), &chain())
            .await
            .unwrap()
            .unwrap();
        assert!(transition.forced);
        assert_eq!(
            engine.state(&cv("CV1")).unwrap().version_in("Production"),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_unpublished_view_cannot_be_promoted() {
        let (_, mut engine) = setup();
        let result = engine.promote(&request("Development", false), &chain()).await;
        assert!(matches!(
            result,
            Err(ContentflowError::PromotionPrecondition { .. })
        ));
    }

    #[tokio::test]
    async fn test_composite_requires_published_components() {
        let (remote, mut engine) = setup();
        remote.seed(ResourceKind::ContentView, "ACME", "CV2", Map::new());
        let composite = RecordKey::new(ResourceKind::CompositeContentView, "ACME", "CCV");
        remote.seed(ResourceKind::CompositeContentView, "ACME", "CCV", Map::new());

        engine.publish(&cv("CV1"), &[]).await.unwrap();
        let components = vec![
            (cv("CV1"), VersionBinding::Latest),
            (cv("CV2"), VersionBinding::Latest),
        ];

        let result = engine.publish(&composite, &components).await;
        assert!(matches!(
            result,
            Err(ContentflowError::PromotionPrecondition { .. })
        ));

        engine.publish(&cv("CV2"), &[]).await.unwrap();
        let transition = engine.publish(&composite, &components).await.unwrap();
        assert_eq!(transition.version, 1);
    }

    #[tokio::test]
    async fn test_pinned_component_version_must_exist() {
        let (remote, mut engine) = setup();
        let composite = RecordKey::new(ResourceKind::CompositeContentView, "ACME", "CCV");
        remote.seed(ResourceKind::CompositeContentView, "ACME", "CCV", Map::new());
        engine.publish(&cv("CV1"), &[]).await.unwrap();

        let pinned = vec![(cv("CV1"), VersionBinding::Version(2))];
        assert!(engine.publish(&composite, &pinned).await.is_err());

        let pinned = vec![(cv("CV1"), VersionBinding::Version(1))];
        assert!(engine.publish(&composite, &pinned).await.is_ok());
    }
}
