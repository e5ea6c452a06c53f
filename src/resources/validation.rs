// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! Declaration validation
//!
//! Per-record checks that need no knowledge of other records beyond name
//! uniqueness. Cross-record checks live in the reference resolver.

use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::OnceLock;

use super::kind::{schema, ResourceKind};
use super::record::{ResourceRecord, ResourceSet, LIBRARY};

const SYNC_INTERVALS: &[&str] = &["hourly", "daily", "weekly", "custom cron"];
const CREDENTIAL_TYPES: &[&str] = &["gpg_key", "cert"];

fn label_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("label pattern is valid"))
}

/// Declaration validator
pub struct ResourceValidator;

impl ResourceValidator {
    /// Validate a set of declarations
    pub fn validate(set: &ResourceSet) -> ValidationResult {
        let mut result = ValidationResult::new();

        if set.is_empty() {
            result.add_warning("No resources declared");
        }

        // Names are unique per kind and organization
        let mut seen = HashSet::new();
        for record in set.iter() {
            if !seen.insert(record.key()) {
                result.add_error(&format!(
                    "Duplicate {} name '{}' in organization '{}'",
                    record.kind, record.name, record.organization
                ));
            }
        }

        for record in set.iter() {
            Self::validate_record(record, &mut result);
        }

        result
    }

    fn validate_record(record: &ResourceRecord, result: &mut ValidationResult) {
        let kind_schema = schema(record.kind);

        for attribute in kind_schema.required {
            let present = match record.attributes.get(*attribute) {
                None | Some(Value::Null) => false,
                Some(Value::String(s)) => !s.trim().is_empty(),
                Some(_) => true,
            };
            if !present {
                result.add_error(&format!(
                    "{} '{}' is missing required attribute '{}'",
                    record.kind, record.name, attribute
                ));
            }
        }

        for field in kind_schema.references {
            if field.required && record.references_in(field.field).next().is_none() {
                result.add_error(&format!(
                    "{} '{}' is missing required reference '{}'",
                    record.kind, record.name, field.field
                ));
            }
        }

        if let Some(label) = record.attributes.get("label") {
            let valid = label.as_str().is_some_and(|l| label_pattern().is_match(l));
            if !valid {
                result.add_error(&format!(
                    "{} '{}': label {} may only contain letters, digits, '_', '-' and '.'",
                    record.kind, record.name, label
                ));
            }
        }

        match record.kind {
            ResourceKind::Credential => {
                if let Some(t) = record.attributes.get("content_type").and_then(Value::as_str) {
                    if !CREDENTIAL_TYPES.contains(&t) {
                        result.add_error(&format!(
                            "Credential '{}': content_type must be one of {}",
                            record.name,
                            CREDENTIAL_TYPES.join(", ")
                        ));
                    }
                }
            }
            ResourceKind::SyncPlan => {
                let interval = record.attributes.get("interval").and_then(Value::as_str);
                if let Some(interval) = interval {
                    if !SYNC_INTERVALS.contains(&interval) {
                        result.add_error(&format!(
                            "SyncPlan '{}': interval must be one of {}",
                            record.name,
                            SYNC_INTERVALS.join(", ")
                        ));
                    } else if interval == "custom cron"
                        && !record.attributes.contains_key("cron_expression")
                    {
                        result.add_error(&format!(
                            "SyncPlan '{}': 'custom cron' interval requires 'cron_expression'",
                            record.name
                        ));
                    }
                }
            }
            ResourceKind::LifecycleEnvironment => {
                if record.name == LIBRARY {
                    result.add_error(&format!(
                        "LifecycleEnvironment '{}' is implicit and cannot be declared",
                        LIBRARY
                    ));
                }
            }
            ResourceKind::ContentView => {
                if record.references_in("repositories").next().is_none() {
                    result.add_warning(&format!(
                        "ContentView '{}' has no repositories; published versions will be empty",
                        record.name
                    ));
                }
            }
            ResourceKind::ActivationKey => {
                let has_view = record.references_in("content_view").next().is_some();
                let has_env = record.references_in("lifecycle_environment").next().is_some();
                if has_view && !has_env {
                    result.add_warning(&format!(
                        "ActivationKey '{}' names a content view but no lifecycle environment; \
                         hosts will register to {}",
                        record.name, LIBRARY
                    ));
                }
            }
            _ => {}
        }
    }
}

/// Result of declaration validation
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    pub fn add_warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_of(records: Vec<ResourceRecord>) -> ResourceSet {
        let mut set = ResourceSet::new();
        for record in records {
            set.push(record);
        }
        set
    }

    #[test]
    fn test_validate_empty_set() {
        let result = ResourceValidator::validate(&ResourceSet::new());
        assert!(result.is_valid());
        assert!(result.warnings[0].contains("No resources"));
    }

    #[test]
    fn test_duplicate_names_within_organization() {
        let set = set_of(vec![
            ResourceRecord::new(ResourceKind::Product, "ACME", "P1"),
            ResourceRecord::new(ResourceKind::Product, "ACME", "P1"),
            ResourceRecord::new(ResourceKind::Product, "Other", "P1"),
        ]);

        let result = ResourceValidator::validate(&set);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("Duplicate Product name 'P1'"));
    }

    #[test]
    fn test_same_name_different_kinds_is_fine() {
        let set = set_of(vec![
            ResourceRecord::new(ResourceKind::Product, "ACME", "RHEL"),
            ResourceRecord::new(ResourceKind::ContentView, "ACME", "RHEL"),
        ]);

        let result = ResourceValidator::validate(&set);
        assert!(result.is_valid());
    }

    #[test]
    fn test_required_attributes_and_references() {
        let set = set_of(vec![
            ResourceRecord::new(ResourceKind::Repository, "ACME", "R1")
                .with_attribute("content_type", ""),
            ResourceRecord::new(ResourceKind::OperatingSystem, "ACME", "RedHat 9")
                .with_attribute("major", 9),
        ]);

        let result = ResourceValidator::validate(&set);
        assert!(result
            .errors
            .iter()
            .any(|e| e.contains("Repository 'R1' is missing required attribute 'content_type'")));
        assert!(result
            .errors
            .iter()
            .any(|e| e.contains("missing required reference 'product'")));
        assert!(result
            .errors
            .iter()
            .any(|e| e.contains("missing required attribute 'family'")));
    }

    #[test]
    fn test_label_and_interval_rules() {
        let set = set_of(vec![
            ResourceRecord::new(ResourceKind::Product, "ACME", "P1").with_attribute("label", "has space"),
            ResourceRecord::new(ResourceKind::SyncPlan, "ACME", "nightly")
                .with_attribute("interval", "custom cron")
                .with_attribute("sync_date", "2024-01-01 00:00:00 UTC"),
        ]);

        let result = ResourceValidator::validate(&set);
        assert!(result.errors.iter().any(|e| e.contains("label")));
        assert!(result.errors.iter().any(|e| e.contains("cron_expression")));
    }

    #[test]
    fn test_library_cannot_be_declared() {
        let set = set_of(vec![ResourceRecord::new(
            ResourceKind::LifecycleEnvironment,
            "ACME",
            LIBRARY,
        )]);

        let result = ResourceValidator::validate(&set);
        assert!(!result.is_valid());
    }

    #[test]
    fn test_content_view_without_repositories_warns() {
        let set = set_of(vec![ResourceRecord::new(ResourceKind::ContentView, "ACME", "CV1")]);

        let result = ResourceValidator::validate(&set);
        assert!(result.is_valid());
        assert!(result.has_warnings());
    }
}
