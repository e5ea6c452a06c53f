// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! Attribute mapping and comparison
//!
//! The server names some attributes differently from the declarations, and
//! sometimes differently between create and update. Those quirks live in the
//! tables here so the reconciler itself stays generic.

use serde_json::{Map, Value};

use crate::resources::{ResourceKind, VersionBinding};

/// Which call a payload is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
}

struct Rename {
    kind: ResourceKind,
    operation: Operation,
    declared: &'static str,
    remote: &'static str,
}

static RENAMES: &[Rename] = &[Rename {
    kind: ResourceKind::OperatingSystem,
    operation: Operation::Update,
    declared: "family",
    remote: "os_family",
}];

/// Where the server reports a reference in the records it returns
enum ReadBack {
    /// Nested object, such as `product: {id, name}`
    Nested { object: &'static str },
    /// List of nested objects, such as `products: [{id, name}]`
    NestedList { list: &'static str },
}

struct ReadMapping {
    /// Key the reconciler compares against
    key: &'static str,
    read: ReadBack,
}

static READS: &[ReadMapping] = &[
    ReadMapping { key: "product_id", read: ReadBack::Nested { object: "product" } },
    ReadMapping { key: "gpg_key_id", read: ReadBack::Nested { object: "gpg_key" } },
    ReadMapping { key: "prior_id", read: ReadBack::Nested { object: "prior" } },
    ReadMapping { key: "content_view_id", read: ReadBack::Nested { object: "content_view" } },
    ReadMapping { key: "environment_id", read: ReadBack::Nested { object: "environment" } },
    ReadMapping { key: "product_ids", read: ReadBack::NestedList { list: "products" } },
    ReadMapping { key: "repository_ids", read: ReadBack::NestedList { list: "repositories" } },
    ReadMapping { key: "ptable_ids", read: ReadBack::NestedList { list: "ptables" } },
];

/// Remote key that carries the identifiers of a reference field
pub fn reference_key(kind: ResourceKind, field: &str) -> String {
    let key = match (kind, field) {
        (_, "product") => "product_id",
        (_, "gpg_key") => "gpg_key_id",
        (_, "products") => "product_ids",
        (_, "prior") => "prior_id",
        (_, "repositories") => "repository_ids",
        (_, "components") => "components",
        (_, "content_view") => "content_view_id",
        (ResourceKind::ActivationKey, "lifecycle_environment") => "environment_id",
        (_, "ptables") => "ptable_ids",
        (_, other) => return format!("{}_id", other),
    };
    key.to_string()
}

/// Rename declared attribute keys for a given call
pub fn map_for(kind: ResourceKind, operation: Operation, attributes: &Map<String, Value>) -> Map<String, Value> {
    attributes
        .iter()
        .map(|(key, value)| {
            let key = RENAMES
                .iter()
                .find(|r| r.kind == kind && r.operation == operation && r.declared == key)
                .map(|r| r.remote.to_string())
                .unwrap_or_else(|| key.clone());
            (key, value.clone())
        })
        .collect()
}

/// A composite component as sent to and read back from the server.
///
/// A `latest` component follows the view's newest version at publish time;
/// a pinned one names its version.
pub fn component_value(content_view_id: String, binding: VersionBinding) -> Value {
    let mut component = Map::new();
    component.insert("content_view_id".into(), Value::String(content_view_id));
    match binding {
        VersionBinding::Latest => component.insert("latest".into(), Value::Bool(true)),
        VersionBinding::Version(version) => component.insert("version".into(), Value::from(version)),
    };
    Value::Object(component)
}

/// Bring a record returned by the server into the shape the reconciler compares.
///
/// Only keys the server left out are filled in.
pub fn map_from_remote(kind: ResourceKind, mut attributes: Map<String, Value>) -> Map<String, Value> {
    for mapping in READS {
        if attributes.contains_key(mapping.key) {
            continue;
        }
        let value = match mapping.read {
            ReadBack::Nested { object } => attributes.get(object).and_then(nested_id),
            ReadBack::NestedList { list } => attributes
                .get(list)
                .and_then(Value::as_array)
                .map(|items| Value::Array(items.iter().filter_map(nested_id).collect())),
        };
        if let Some(value) = value {
            attributes.insert(mapping.key.to_string(), value);
        }
    }

    if kind == ResourceKind::CompositeContentView && !attributes.contains_key("components") {
        if let Some(components) = attributes
            .get("content_view_components")
            .and_then(Value::as_array)
        {
            let components = components.iter().filter_map(read_component).collect();
            attributes.insert("components".into(), Value::Array(components));
        }
    }

    attributes
}

fn nested_id(value: &Value) -> Option<Value> {
    match value.get("id")? {
        Value::Number(n) => Some(Value::String(n.to_string())),
        Value::String(s) => Some(Value::String(s.clone())),
        _ => None,
    }
}

/// `{content_view: {id}, latest, content_view_version: {version}}` as a component value
fn read_component(component: &Value) -> Option<Value> {
    let id = match nested_id(component.get("content_view")?)? {
        Value::String(id) => id,
        _ => return None,
    };
    if component.get("latest").and_then(Value::as_bool) == Some(true) {
        return Some(component_value(id, VersionBinding::Latest));
    }
    let version = component.pointer("/content_view_version/version")?;
    let major = match version {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.split('.').next()?.parse().ok(),
        _ => None,
    }?;
    let major = u32::try_from(major).ok()?;
    Some(component_value(id, VersionBinding::Version(major)))
}

/// Declared keys whose value differs from the server's
pub fn differing_keys(declared: &Map<String, Value>, remote: &Map<String, Value>) -> Vec<String> {
    declared
        .iter()
        .filter(|(key, value)| match remote.get(key.as_str()) {
            Some(actual) => !values_match(value, actual),
            None => !value.is_null(),
        })
        .map(|(key, _)| key.clone())
        .collect()
}

/// Compare a declared value against the server's.
///
/// Lists compare without regard to order; scalars compare by their string
/// form so `9` matches `"9"`; objects compare on the declared keys only.
pub fn values_match(declared: &Value, actual: &Value) -> bool {
    match (declared, actual) {
        (Value::Array(a), Value::Array(b)) => {
            if a.len() != b.len() {
                return false;
            }
            let mut a: Vec<String> = a.iter().map(normalize).collect();
            let mut b: Vec<String> = b.iter().map(normalize).collect();
            a.sort();
            b.sort();
            a == b
        }
        (Value::Object(a), Value::Object(b)) => differing_keys(a, b).is_empty(),
        (Value::Null, Value::Null) => true,
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => false,
        _ => normalize(declared) == normalize(actual),
    }
}

fn normalize(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_lists_ignore_order() {
        assert!(values_match(&json!(["b", "a"]), &json!(["a", "b"])));
        assert!(!values_match(&json!(["a"]), &json!(["a", "b"])));
        assert!(values_match(&json!(["3", "1"]), &json!([1, 3])));
    }

    #[test]
    fn test_scalars_compare_as_strings() {
        assert!(values_match(&json!(9), &json!("9")));
        assert!(values_match(&json!(true), &json!("true")));
        assert!(!values_match(&json!("yum"), &json!("docker")));
        assert!(!values_match(&json!("x"), &json!(["x"])));
    }

    #[test]
    fn test_only_declared_keys_are_compared() {
        let declared = map(json!({"name": "P1", "label": "p1"}));
        let remote = map(json!({"id": 4, "name": "P1", "label": "p1", "sync_state": "never"}));
        assert!(differing_keys(&declared, &remote).is_empty());

        let remote = map(json!({"name": "P1"}));
        assert_eq!(differing_keys(&declared, &remote), vec!["label".to_string()]);
    }

    #[test]
    fn test_operating_system_family_renamed_on_update_only() {
        let declared = map(json!({"name": "RedHat 9", "family": "Redhat"}));

        let update = map_for(ResourceKind::OperatingSystem, Operation::Update, &declared);
        assert!(update.contains_key("os_family"));
        assert!(!update.contains_key("family"));

        let create = map_for(ResourceKind::OperatingSystem, Operation::Create, &declared);
        assert!(create.contains_key("family"));

        let other = map_for(ResourceKind::PartitionTable, Operation::Update, &declared);
        assert!(other.contains_key("family"));
    }

    #[test]
    fn test_reference_keys() {
        assert_eq!(reference_key(ResourceKind::Repository, "product"), "product_id");
        assert_eq!(reference_key(ResourceKind::SyncPlan, "products"), "product_ids");
        assert_eq!(
            reference_key(ResourceKind::ActivationKey, "lifecycle_environment"),
            "environment_id"
        );
        assert_eq!(
            reference_key(ResourceKind::CompositeContentView, "components"),
            "components"
        );
    }

    #[test]
    fn test_component_bindings_differ() {
        let latest = component_value("5".into(), VersionBinding::Latest);
        let pinned = component_value("5".into(), VersionBinding::Version(1));
        assert_eq!(latest, json!({"content_view_id": "5", "latest": true}));
        assert_eq!(pinned, json!({"content_view_id": "5", "version": 1}));
        assert!(!values_match(&json!([pinned.clone()]), &json!([latest])));
        assert!(!values_match(
            &json!([pinned]),
            &json!([component_value("5".into(), VersionBinding::Version(2))])
        ));
    }

    #[test]
    fn test_nested_references_read_back() {
        let repository = map(json!({
            "id": 12,
            "name": "R1",
            "product": {"id": 3, "name": "P1"},
            "gpg_key": null
        }));
        let read = map_from_remote(ResourceKind::Repository, repository);
        assert_eq!(read["product_id"], "3");
        assert!(!read.contains_key("gpg_key_id"));

        let declared = map(json!({"name": "R1", "product_id": "3"}));
        assert!(differing_keys(&declared, &read).is_empty());

        let environment = map(json!({"id": 4, "name": "QA", "prior": {"id": 2, "name": "Development"}}));
        let read = map_from_remote(ResourceKind::LifecycleEnvironment, environment);
        assert_eq!(read["prior_id"], "2");

        let plan = map(json!({"id": 9, "products": [{"id": 3}, {"id": 7}]}));
        let read = map_from_remote(ResourceKind::SyncPlan, plan);
        assert!(values_match(&json!(["7", "3"]), &read["product_ids"]));
    }

    #[test]
    fn test_top_level_keys_are_kept() {
        let view = map(json!({"id": 2, "repository_ids": [5, 6], "repositories": [{"id": 5}]}));
        let read = map_from_remote(ResourceKind::ContentView, view);
        assert_eq!(read["repository_ids"], json!([5, 6]));
    }

    #[test]
    fn test_composite_components_read_back() {
        let composite = map(json!({
            "id": 20,
            "content_view_components": [
                {"id": 1, "latest": true, "content_view": {"id": 5}},
                {"id": 2, "latest": false, "content_view": {"id": 6},
                 "content_view_version": {"id": 31, "version": "2.0"}}
            ]
        }));
        let read = map_from_remote(ResourceKind::CompositeContentView, composite);

        let declared = json!([
            component_value("6".into(), VersionBinding::Version(2)),
            component_value("5".into(), VersionBinding::Latest)
        ]);
        assert!(values_match(&declared, &read["components"]));
    }
}
