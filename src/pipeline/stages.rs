// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! Stage graph
//!
//! The order in which resource kinds are applied is a fixed table, not a
//! topological sort of the reference graph. Some orderings (sync plans
//! before lifecycle environments) have no reference behind them but are
//! what the server has always been driven with.

use serde::{Deserialize, Serialize};

use crate::errors::{ContentflowError, ContentflowResult};
use crate::resources::ResourceKind;

/// One step of the fixed configuration pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Credentials,
    Products,
    Repositories,
    ExternalRepositories,
    SyncPlans,
    LifecycleEnvironments,
    ContentViews,
    PublishPromote,
    ActivationKeys,
    PartitionTables,
    OperatingSystems,
}

/// Tag that selects only the publish half of the publish/promote stage
pub const PUBLISH_TAG: &str = "publish";
/// Tag that selects only the promote half of the publish/promote stage
pub const PROMOTE_TAG: &str = "promote";

impl Stage {
    /// Every stage, in application order
    pub const ALL: [Stage; 11] = [
        Self::Credentials,
        Self::Products,
        Self::Repositories,
        Self::ExternalRepositories,
        Self::SyncPlans,
        Self::LifecycleEnvironments,
        Self::ContentViews,
        Self::PublishPromote,
        Self::ActivationKeys,
        Self::PartitionTables,
        Self::OperatingSystems,
    ];

    /// Position in the total order
    pub fn rank(&self) -> usize {
        match self {
            Self::Credentials => 0,
            Self::Products => 1,
            Self::Repositories => 2,
            Self::ExternalRepositories => 3,
            Self::SyncPlans => 4,
            Self::LifecycleEnvironments => 5,
            Self::ContentViews => 6,
            Self::PublishPromote => 7,
            Self::ActivationKeys => 8,
            Self::PartitionTables => 9,
            Self::OperatingSystems => 10,
        }
    }

    /// The stage a resource kind is applied in
    pub fn of(kind: ResourceKind) -> Stage {
        match kind {
            ResourceKind::Credential => Self::Credentials,
            ResourceKind::Product => Self::Products,
            ResourceKind::Repository => Self::Repositories,
            ResourceKind::ExternalRepository => Self::ExternalRepositories,
            ResourceKind::SyncPlan => Self::SyncPlans,
            ResourceKind::LifecycleEnvironment => Self::LifecycleEnvironments,
            ResourceKind::ContentView | ResourceKind::CompositeContentView => Self::ContentViews,
            ResourceKind::ActivationKey => Self::ActivationKeys,
            ResourceKind::PartitionTable => Self::PartitionTables,
            ResourceKind::OperatingSystem => Self::OperatingSystems,
        }
    }

    /// Resource kinds reconciled in this stage
    pub fn kinds(&self) -> &'static [ResourceKind] {
        match self {
            Self::Credentials => &[ResourceKind::Credential],
            Self::Products => &[ResourceKind::Product],
            Self::Repositories => &[ResourceKind::Repository],
            Self::ExternalRepositories => &[ResourceKind::ExternalRepository],
            Self::SyncPlans => &[ResourceKind::SyncPlan],
            Self::LifecycleEnvironments => &[ResourceKind::LifecycleEnvironment],
            Self::ContentViews => &[ResourceKind::ContentView, ResourceKind::CompositeContentView],
            Self::PublishPromote => &[],
            Self::ActivationKeys => &[ResourceKind::ActivationKey],
            Self::PartitionTables => &[ResourceKind::PartitionTable],
            Self::OperatingSystems => &[ResourceKind::OperatingSystem],
        }
    }

    /// Stage name, also its selection tag (publish/promote has two tags)
    pub fn name(&self) -> &'static str {
        match self {
            Self::Credentials => "credentials",
            Self::Products => "products",
            Self::Repositories => "repositories",
            Self::ExternalRepositories => "external_repositories",
            Self::SyncPlans => "sync_plans",
            Self::LifecycleEnvironments => "lifecycle_environments",
            Self::ContentViews => "content_views",
            Self::PublishPromote => "publish_promote",
            Self::ActivationKeys => "activation_keys",
            Self::PartitionTables => "partition_tables",
            Self::OperatingSystems => "operating_systems",
        }
    }

    /// Tags that select this stage
    pub fn tags(&self) -> &'static [&'static str] {
        match self {
            Self::PublishPromote => &[PUBLISH_TAG, PROMOTE_TAG],
            Self::Credentials => &["credentials"],
            Self::Products => &["products"],
            Self::Repositories => &["repositories"],
            Self::ExternalRepositories => &["external_repositories"],
            Self::SyncPlans => &["sync_plans"],
            Self::LifecycleEnvironments => &["lifecycle_environments"],
            Self::ContentViews => &["content_views"],
            Self::ActivationKeys => &["activation_keys"],
            Self::PartitionTables => &["partition_tables"],
            Self::OperatingSystems => &["operating_systems"],
        }
    }

    /// Whether this stage reconciles records (as opposed to publish/promote)
    pub fn reconciles_records(&self) -> bool {
        !self.kinds().is_empty()
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A stage chosen for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSelection {
    pub stage: Stage,
    /// Publish half enabled (publish/promote stage only)
    pub publish: bool,
    /// Promote half enabled (publish/promote stage only)
    pub promote: bool,
}

impl StageSelection {
    fn full(stage: Stage) -> Self {
        Self {
            stage,
            publish: true,
            promote: true,
        }
    }
}

/// The fixed stage order and tag-based selection over it
pub struct StageGraph;

impl StageGraph {
    /// All stages in application order
    pub fn stages() -> &'static [Stage] {
        &Stage::ALL
    }

    /// Every accepted tag, in stage order
    pub fn tags() -> Vec<&'static str> {
        Stage::ALL.iter().flat_map(|s| s.tags().iter().copied()).collect()
    }

    /// Filter stages by tag, keeping their relative order.
    ///
    /// An empty tag list selects everything. Selecting a subset does not
    /// check that skipped upstream stages already ran; the caller owns that.
    pub fn allowed_subset(tags: &[String]) -> ContentflowResult<Vec<StageSelection>> {
        if tags.is_empty() {
            return Ok(Stage::ALL.iter().copied().map(StageSelection::full).collect());
        }

        let mut selected = Vec::new();
        let mut publish = false;
        let mut promote = false;

        for raw in tags {
            let tag = raw.trim().to_lowercase().replace('-', "_");
            match tag.as_str() {
                PUBLISH_TAG => publish = true,
                PROMOTE_TAG => promote = true,
                "publish_promote" => {
                    publish = true;
                    promote = true;
                }
                other => {
                    let stage = Stage::ALL
                        .iter()
                        .find(|s| s.name() == other)
                        .ok_or_else(|| ContentflowError::UnknownTag { tag: raw.clone() })?;
                    selected.push(*stage);
                }
            }
        }

        let mut selections: Vec<StageSelection> = Stage::ALL
            .iter()
            .filter(|s| selected.contains(s))
            .copied()
            .map(StageSelection::full)
            .collect();

        if publish || promote {
            selections.push(StageSelection {
                stage: Stage::PublishPromote,
                publish,
                promote,
            });
            selections.sort_by_key(|s| s.stage.rank());
        }

        Ok(selections)
    }

    /// Text listing of stages with their kinds and tags
    pub fn to_text() -> String {
        let mut out = String::new();
        for stage in Stage::ALL {
            let kinds: Vec<String> = stage.kinds().iter().map(|k| k.to_string()).collect();
            let kinds = if kinds.is_empty() {
                "content view versions".to_string()
            } else {
                kinds.join(", ")
            };
            out.push_str(&format!(
                "{}. {} [{}] tags: {}\n",
                stage.rank() + 1,
                stage.name(),
                kinds,
                stage.tags().join(", ")
            ));
        }
        out
    }
}
