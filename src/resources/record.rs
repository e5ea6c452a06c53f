// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! Resource records and record sets

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::kind::{schema, ResourceKind};

/// Name of the implicit root lifecycle environment
pub const LIBRARY: &str = "Library";

/// Identity of a record: kind, organization scope and name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub kind: ResourceKind,
    pub organization: String,
    pub name: String,
}

impl RecordKey {
    pub fn new(kind: ResourceKind, organization: &str, name: &str) -> Self {
        Self {
            kind,
            organization: organization.to_string(),
            name: name.to_string(),
        }
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} '{}'", self.kind, self.name)
    }
}

/// Which published version of a component a composite view includes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionBinding {
    /// Most recent published version at publish time
    Latest,
    /// A fixed version
    Version(u32),
}

impl std::fmt::Display for VersionBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Version(v) => write!(f, "{}", v),
        }
    }
}

/// A named pointer from one record to another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Declaring field (`product`, `repositories`, `prior`, ...)
    pub field: &'static str,
    /// Kinds the name may resolve to
    pub targets: &'static [ResourceKind],
    /// Target name
    pub name: String,
    /// Version binding, for composite view components
    pub binding: Option<VersionBinding>,
}

/// One declared desired-state entity
#[derive(Debug, Clone)]
pub struct ResourceRecord {
    pub kind: ResourceKind,
    pub name: String,
    pub organization: String,
    /// Kind-specific attributes, references excluded
    pub attributes: Map<String, Value>,
    pub references: Vec<Reference>,
    /// File the record was declared in
    pub source: Option<PathBuf>,
}

impl ResourceRecord {
    pub fn new(kind: ResourceKind, organization: &str, name: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            organization: organization.to_string(),
            attributes: Map::new(),
            references: Vec::new(),
            source: None,
        }
    }

    /// Builder-style attribute setter
    pub fn with_attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    /// Builder-style reference setter; the field must exist in the kind's schema
    pub fn with_reference(mut self, field: &str, name: &str) -> Self {
        if let Some(spec) = schema(self.kind).references.iter().find(|r| r.field == field) {
            let binding = (self.kind == ResourceKind::CompositeContentView)
                .then_some(VersionBinding::Latest);
            self.references.push(Reference {
                field: spec.field,
                targets: spec.targets,
                name: name.to_string(),
                binding,
            });
        }
        self
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.kind, &self.organization, &self.name)
    }

    /// References declared in a given field
    pub fn references_in<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a Reference> + 'a {
        self.references.iter().filter(move |r| r.field == field)
    }

    /// Attributes sent to the server: declared attributes minus control keys
    pub fn remote_attributes(&self) -> Map<String, Value> {
        let control = schema(self.kind).control;
        self.attributes
            .iter()
            .filter(|(k, _)| !control.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Boolean control flag, false when absent
    pub fn flag(&self, key: &str) -> bool {
        self.attributes
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Canonical JSON form used for digests
    fn canonical(&self) -> Value {
        let references: Vec<Value> = self
            .references
            .iter()
            .map(|r| {
                serde_json::json!({
                    "field": r.field,
                    "name": r.name,
                    "binding": r.binding.map(|b| b.to_string()),
                })
            })
            .collect();
        serde_json::json!({
            "kind": self.kind,
            "organization": self.organization,
            "name": self.name,
            "attributes": self.attributes,
            "references": references,
        })
    }
}

/// All declared records of a run, grouped by kind in declaration order
#[derive(Debug, Clone, Default)]
pub struct ResourceSet {
    records: BTreeMap<ResourceKind, Vec<ResourceRecord>>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record, keeping declaration order within its kind
    pub fn push(&mut self, record: ResourceRecord) {
        self.records.entry(record.kind).or_default().push(record);
    }

    /// Records of one kind, in declaration order
    pub fn records(&self, kind: ResourceKind) -> &[ResourceRecord] {
        self.records.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every record, kinds in stage order
    pub fn iter(&self) -> impl Iterator<Item = &ResourceRecord> {
        self.records.values().flatten()
    }

    pub fn get(&self, key: &RecordKey) -> Option<&ResourceRecord> {
        self.records(key.kind)
            .iter()
            .find(|r| r.organization == key.organization && r.name == key.name)
    }

    pub fn len(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Organizations that declare at least one record, sorted
    pub fn organizations(&self) -> Vec<String> {
        let mut orgs: Vec<String> = self.iter().map(|r| r.organization.clone()).collect();
        orgs.sort();
        orgs.dedup();
        orgs
    }

    /// Merge another set into this one, preserving order
    pub fn extend(&mut self, other: ResourceSet) {
        for (_, records) in other.records {
            for record in records {
                self.push(record);
            }
        }
    }

    /// Content digest of the declarations, stable across runs
    pub fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for record in self.iter() {
            hasher.update(record.canonical().to_string().as_bytes());
            hasher.update(b"\n");
        }
        hasher.finalize().to_hex().to_string()
    }
}
