// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! Resource kinds and their document schema

use serde::{Deserialize, Serialize};

/// The closed set of resource kinds contentflow reconciles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Credential,
    Product,
    Repository,
    ExternalRepository,
    SyncPlan,
    LifecycleEnvironment,
    ContentView,
    CompositeContentView,
    ActivationKey,
    PartitionTable,
    OperatingSystem,
}

impl ResourceKind {
    /// Every kind, in stage order
    pub const ALL: [ResourceKind; 11] = [
        Self::Credential,
        Self::Product,
        Self::Repository,
        Self::ExternalRepository,
        Self::SyncPlan,
        Self::LifecycleEnvironment,
        Self::ContentView,
        Self::CompositeContentView,
        Self::ActivationKey,
        Self::PartitionTable,
        Self::OperatingSystem,
    ];

    /// Top-level key under which records of this kind are declared
    pub fn document_key(&self) -> &'static str {
        match self {
            Self::Credential => "credentials",
            Self::Product => "products",
            Self::Repository => "repositories",
            Self::ExternalRepository => "external_repositories",
            Self::SyncPlan => "sync_plans",
            Self::LifecycleEnvironment => "lifecycle_environments",
            Self::ContentView => "content_views",
            Self::CompositeContentView => "composite_content_views",
            Self::ActivationKey => "activation_keys",
            Self::PartitionTable => "partition_tables",
            Self::OperatingSystem => "operating_systems",
        }
    }

    /// Look up a kind by its document key
    pub fn from_document_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.document_key() == key)
    }

    /// Plain and composite content views
    pub fn is_content_view(&self) -> bool {
        matches!(self, Self::ContentView | Self::CompositeContentView)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Credential => "Credential",
            Self::Product => "Product",
            Self::Repository => "Repository",
            Self::ExternalRepository => "ExternalRepository",
            Self::SyncPlan => "SyncPlan",
            Self::LifecycleEnvironment => "LifecycleEnvironment",
            Self::ContentView => "ContentView",
            Self::CompositeContentView => "CompositeContentView",
            Self::ActivationKey => "ActivationKey",
            Self::PartitionTable => "PartitionTable",
            Self::OperatingSystem => "OperatingSystem",
        };
        f.write_str(name)
    }
}

/// A field of a declared record that names other records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceField {
    /// Field name in the declaration document
    pub field: &'static str,
    /// Kinds the name is looked up in
    pub targets: &'static [ResourceKind],
    /// Whether the field holds a list of names
    pub many: bool,
    /// Whether the field must be present
    pub required: bool,
}

/// Per-kind document schema
#[derive(Debug)]
pub struct KindSchema {
    pub kind: ResourceKind,
    /// Attributes that must be present and non-empty
    pub required: &'static [&'static str],
    /// Fields holding references to other records
    pub references: &'static [ReferenceField],
    /// Attributes that steer contentflow and are never sent to the server
    pub control: &'static [&'static str],
}

const GPG_KEY: ReferenceField = ReferenceField {
    field: "gpg_key",
    targets: &[ResourceKind::Credential],
    many: false,
    required: false,
};

const PRODUCT: ReferenceField = ReferenceField {
    field: "product",
    targets: &[ResourceKind::Product],
    many: false,
    required: true,
};

static SCHEMAS: [KindSchema; 11] = [
    KindSchema {
        kind: ResourceKind::Credential,
        required: &["content_type", "content"],
        references: &[],
        control: &[],
    },
    KindSchema {
        kind: ResourceKind::Product,
        required: &[],
        references: &[GPG_KEY],
        control: &[],
    },
    KindSchema {
        kind: ResourceKind::Repository,
        required: &["content_type"],
        references: &[PRODUCT, GPG_KEY],
        control: &[],
    },
    KindSchema {
        kind: ResourceKind::ExternalRepository,
        required: &["content_type", "url"],
        references: &[PRODUCT, GPG_KEY],
        control: &[],
    },
    KindSchema {
        kind: ResourceKind::SyncPlan,
        required: &["interval", "sync_date"],
        references: &[ReferenceField {
            field: "products",
            targets: &[ResourceKind::Product],
            many: true,
            required: false,
        }],
        control: &[],
    },
    KindSchema {
        kind: ResourceKind::LifecycleEnvironment,
        required: &[],
        references: &[ReferenceField {
            field: "prior",
            targets: &[ResourceKind::LifecycleEnvironment],
            many: false,
            required: false,
        }],
        control: &[],
    },
    KindSchema {
        kind: ResourceKind::ContentView,
        required: &[],
        references: &[ReferenceField {
            field: "repositories",
            targets: &[ResourceKind::Repository, ResourceKind::ExternalRepository],
            many: true,
            required: false,
        }],
        control: &["auto_publish"],
    },
    KindSchema {
        kind: ResourceKind::CompositeContentView,
        required: &[],
        references: &[ReferenceField {
            field: "components",
            targets: &[ResourceKind::ContentView, ResourceKind::CompositeContentView],
            many: true,
            required: true,
        }],
        control: &["auto_publish"],
    },
    KindSchema {
        kind: ResourceKind::ActivationKey,
        required: &[],
        references: &[
            ReferenceField {
                field: "content_view",
                targets: &[ResourceKind::ContentView, ResourceKind::CompositeContentView],
                many: false,
                required: false,
            },
            ReferenceField {
                field: "lifecycle_environment",
                targets: &[ResourceKind::LifecycleEnvironment],
                many: false,
                required: false,
            },
        ],
        control: &[],
    },
    KindSchema {
        kind: ResourceKind::PartitionTable,
        required: &["layout", "os_family"],
        references: &[],
        control: &[],
    },
    KindSchema {
        kind: ResourceKind::OperatingSystem,
        required: &["major", "family"],
        references: &[ReferenceField {
            field: "ptables",
            targets: &[ResourceKind::PartitionTable],
            many: true,
            required: false,
        }],
        control: &[],
    },
];

/// Schema for a resource kind
pub fn schema(kind: ResourceKind) -> &'static KindSchema {
    SCHEMAS
        .iter()
        .find(|s| s.kind == kind)
        .unwrap_or_else(|| unreachable!("every kind has a schema entry"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_a_schema() {
        for kind in ResourceKind::ALL {
            assert_eq!(schema(kind).kind, kind);
        }
    }

    #[test]
    fn test_document_keys_round_trip() {
        for kind in ResourceKind::ALL {
            assert_eq!(ResourceKind::from_document_key(kind.document_key()), Some(kind));
        }
        assert_eq!(ResourceKind::from_document_key("hosts"), None);
    }

    #[test]
    fn test_reference_targets_never_point_forward() {
        // Targets must be declared no later than the kind referencing them.
        for kind in ResourceKind::ALL {
            for field in schema(kind).references {
                for target in field.targets {
                    assert!(target <= &kind, "{} -> {}", kind, target);
                }
            }
        }
    }
}
