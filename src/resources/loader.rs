// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! Declaration loader
//!
//! Parses YAML declaration documents into a [`ResourceSet`]. Loading is pure:
//! nothing here talks to the server.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::kind::{schema, ReferenceField, ResourceKind};
use super::record::{Reference, ResourceRecord, ResourceSet, VersionBinding};
use super::validation::ResourceValidator;
use crate::errors::{ContentflowError, ContentflowResult};

/// One declaration document
#[derive(Debug, Deserialize)]
struct Document {
    /// Organization for records that don't name their own
    #[serde(default)]
    organization: Option<String>,

    /// Record lists keyed by kind (`products`, `repositories`, ...)
    #[serde(flatten)]
    sections: BTreeMap<String, Value>,
}

/// Loads declaration documents into records
#[derive(Debug, Clone)]
pub struct ResourceLoader {
    default_organization: String,
}

impl ResourceLoader {
    /// Create a loader; records without an organization land in `default_organization`
    pub fn new(default_organization: impl Into<String>) -> Self {
        Self {
            default_organization: default_organization.into(),
        }
    }

    /// Parse and validate every source, failing on the first invalid declaration set
    pub fn load(&self, sources: &[String]) -> ContentflowResult<ResourceSet> {
        let set = self.parse_sources(sources)?;
        Self::check(set)
    }

    /// Parse and validate a single YAML document
    pub fn from_yaml(&self, yaml: &str) -> ContentflowResult<ResourceSet> {
        let set = self.parse_document(yaml, None)?;
        Self::check(set)
    }

    fn check(set: ResourceSet) -> ContentflowResult<ResourceSet> {
        let validation = ResourceValidator::validate(&set);
        for warning in &validation.warnings {
            tracing::warn!("{}", warning);
        }
        if !validation.is_valid() {
            return Err(ContentflowError::Validation {
                errors: validation.errors,
            });
        }
        Ok(set)
    }

    /// Parse every source without validating; shape errors are collected across files
    pub fn parse_sources(&self, sources: &[String]) -> ContentflowResult<ResourceSet> {
        let files = expand_sources(sources)?;
        let mut set = ResourceSet::new();
        let mut errors = Vec::new();

        for file in files {
            tracing::debug!(file = %file.display(), "loading declarations");
            let content = std::fs::read_to_string(&file).map_err(|e| {
                ContentflowError::FileReadError {
                    path: file.clone(),
                    error: e.to_string(),
                }
            })?;

            match self.parse_document(&content, Some(&file)) {
                Ok(parsed) => set.extend(parsed),
                Err(ContentflowError::Validation { errors: found }) => errors.extend(found),
                Err(e) => return Err(e),
            }
        }

        if errors.is_empty() {
            Ok(set)
        } else {
            Err(ContentflowError::Validation { errors })
        }
    }

    /// Parse one document's text
    pub fn parse_document(&self, yaml: &str, source: Option<&Path>) -> ContentflowResult<ResourceSet> {
        let mut set = ResourceSet::new();
        if yaml.trim().is_empty() {
            return Ok(set);
        }

        let document: Document = serde_yaml::from_str(yaml)?;
        let organization = document
            .organization
            .unwrap_or_else(|| self.default_organization.clone());
        let location = source
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<inline>".to_string());

        let mut errors = Vec::new();

        for (key, section) in document.sections {
            let Some(kind) = ResourceKind::from_document_key(&key) else {
                errors.push(format!("{}: unknown section '{}'", location, key));
                continue;
            };

            let entries = match section {
                Value::Null => continue,
                Value::Array(entries) => entries,
                _ => {
                    errors.push(format!("{}: '{}' must be a list", location, key));
                    continue;
                }
            };

            for (index, entry) in entries.into_iter().enumerate() {
                let context = EntryContext {
                    kind,
                    index,
                    location: &location,
                    organization: &organization,
                };
                if let Some(mut record) = context.parse(entry, &mut errors) {
                    record.source = source.map(Path::to_path_buf);
                    set.push(record);
                }
            }
        }

        if errors.is_empty() {
            Ok(set)
        } else {
            Err(ContentflowError::Validation { errors })
        }
    }
}

struct EntryContext<'a> {
    kind: ResourceKind,
    index: usize,
    location: &'a str,
    organization: &'a str,
}

impl EntryContext<'_> {
    fn describe(&self) -> String {
        format!(
            "{}: {} entry #{}",
            self.location,
            self.kind.document_key(),
            self.index + 1
        )
    }

    fn parse(&self, entry: Value, errors: &mut Vec<String>) -> Option<ResourceRecord> {
        let Value::Object(mut map) = entry else {
            errors.push(format!("{} is not a mapping", self.describe()));
            return None;
        };

        let name = match map.remove("name") {
            Some(Value::String(name)) if !name.trim().is_empty() => name,
            Some(_) => {
                errors.push(format!("{} has a non-string or empty 'name'", self.describe()));
                return None;
            }
            None => {
                errors.push(format!("{} is missing 'name'", self.describe()));
                return None;
            }
        };

        let organization = match map.remove("organization") {
            Some(Value::String(org)) => org,
            Some(_) => {
                errors.push(format!("{} '{}': 'organization' must be a string", self.kind, name));
                self.organization.to_string()
            }
            None => self.organization.to_string(),
        };

        let mut record = ResourceRecord::new(self.kind, &organization, &name);

        for field in schema(self.kind).references {
            if let Some(value) = map.remove(field.field) {
                match parse_references(self.kind, field, value) {
                    Ok(refs) => record.references.extend(refs),
                    Err(reason) => errors.push(format!(
                        "{} '{}': field '{}' {}",
                        self.kind, name, field.field, reason
                    )),
                }
            }
        }

        record.attributes = map;
        Some(record)
    }
}

fn parse_references(
    kind: ResourceKind,
    field: &ReferenceField,
    value: Value,
) -> Result<Vec<Reference>, String> {
    let values = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) if field.many => items,
        Value::Array(_) => return Err("must be a single name".into()),
        other => vec![other],
    };

    values
        .into_iter()
        .map(|item| {
            let (name, binding) = if kind == ResourceKind::CompositeContentView {
                parse_component(item)?
            } else {
                match item {
                    Value::String(s) => (s, None),
                    _ => return Err("must contain names (strings)".into()),
                }
            };
            Ok(Reference {
                field: field.field,
                targets: field.targets,
                name,
                binding,
            })
        })
        .collect()
}

/// Component entries are either a view name or `{content_view, version}`
fn parse_component(item: Value) -> Result<(String, Option<VersionBinding>), String> {
    match item {
        Value::String(name) => Ok((name, Some(VersionBinding::Latest))),
        Value::Object(map) => {
            let name = map
                .get("content_view")
                .and_then(Value::as_str)
                .ok_or("entries need a 'content_view' name")?
                .to_string();
            let binding = match map.get("version") {
                None | Some(Value::Null) => VersionBinding::Latest,
                Some(Value::String(s)) if s == "latest" => VersionBinding::Latest,
                Some(Value::Number(n)) => n
                    .as_u64()
                    .and_then(|v| u32::try_from(v).ok())
                    .filter(|v| *v > 0)
                    .map(VersionBinding::Version)
                    .ok_or("version must be a positive integer or 'latest'")?,
                Some(_) => return Err("version must be a positive integer or 'latest'".into()),
            };
            Ok((name, Some(binding)))
        }
        _ => Err("entries must be names or mappings".into()),
    }
}

/// Expand files, directories and glob patterns into a sorted list of files
pub fn expand_sources(sources: &[String]) -> ContentflowResult<Vec<PathBuf>> {
    let mut files = Vec::new();

    for source in sources {
        let path = Path::new(source);

        if source.contains(['*', '?', '[']) {
            let mut matches: Vec<PathBuf> = glob::glob(source)?.filter_map(Result::ok).collect();
            if matches.is_empty() {
                return Err(ContentflowError::NoInputFiles {
                    pattern: source.clone(),
                });
            }
            matches.sort();
            files.extend(matches);
        } else if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(path)?
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| {
                    p.is_file()
                        && matches!(
                            p.extension().and_then(|e| e.to_str()),
                            Some("yaml") | Some("yml")
                        )
                })
                .collect();
            if entries.is_empty() {
                return Err(ContentflowError::NoInputFiles {
                    pattern: format!("{}/*.yaml", path.display()),
                });
            }
            entries.sort();
            files.extend(entries);
        } else if path.is_file() {
            files.push(path.to_path_buf());
        } else {
            return Err(ContentflowError::FileNotFound {
                path: path.to_path_buf(),
                help: Some("Pass declaration files, directories or glob patterns".into()),
            });
        }
    }

    files.dedup();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn loader() -> ResourceLoader {
        ResourceLoader::new("ACME")
    }

    #[test]
    fn test_parse_products_and_repositories() {
        let yaml = r#"
products:
  - name: EPEL
    gpg_key: epel-key
    description: Extra packages
credentials:
  - name: epel-key
    content_type: gpg_key
    content: "-----BEGIN PGP PUBLIC KEY BLOCK-----"
external_repositories:
  - name: epel-9
    product: EPEL
    content_type: yum
    url: https://dl.fedoraproject.org/pub/epel/9/Everything/x86_64/
"#;

        let set = loader().from_yaml(yaml).unwrap();
        assert_eq!(set.len(), 3);

        let product = &set.records(ResourceKind::Product)[0];
        assert_eq!(product.organization, "ACME");
        assert_eq!(product.references[0].name, "epel-key");
        assert!(!product.attributes.contains_key("gpg_key"));
        assert_eq!(product.attributes["description"], "Extra packages");

        let repo = &set.records(ResourceKind::ExternalRepository)[0];
        assert_eq!(repo.references_in("product").count(), 1);
    }

    #[test]
    fn test_parse_composite_components() {
        let yaml = r#"
content_views:
  - name: base
  - name: apps
composite_content_views:
  - name: ccv
    components:
      - base
      - content_view: apps
        version: 3
"#;

        let set = loader().from_yaml(yaml).unwrap();
        let ccv = &set.records(ResourceKind::CompositeContentView)[0];
        let bindings: Vec<_> = ccv.references.iter().map(|r| r.binding).collect();
        assert_eq!(
            bindings,
            vec![Some(VersionBinding::Latest), Some(VersionBinding::Version(3))]
        );
    }

    #[test]
    fn test_record_organization_overrides_document() {
        let yaml = r#"
organization: Engineering
products:
  - name: P1
  - name: P2
    organization: Finance
"#;

        let set = loader().from_yaml(yaml).unwrap();
        let orgs: Vec<_> = set.iter().map(|r| r.organization.as_str()).collect();
        assert_eq!(orgs, vec!["Engineering", "Finance"]);
    }

    #[test]
    fn test_unknown_section_and_missing_name() {
        let yaml = r#"
hosts:
  - name: web01
products:
  - description: nameless
"#;

        let err = loader().from_yaml(yaml).unwrap_err();
        let ContentflowError::Validation { errors } = err else {
            panic!("expected validation error");
        };
        assert!(errors.iter().any(|e| e.contains("unknown section 'hosts'")));
        assert!(errors.iter().any(|e| e.contains("missing 'name'")));
    }

    #[test]
    fn test_single_reference_field_rejects_list() {
        let yaml = r#"
repositories:
  - name: R1
    content_type: yum
    product: [P1, P2]
"#;

        let err = loader().from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("must be a single name"));
    }

    #[test]
    fn test_empty_document() {
        let set = loader().from_yaml("   \n").unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_load_directory_in_file_order() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("10-products.yaml"), "products:\n  - name: P1\n").unwrap();
        std::fs::write(
            dir.path().join("20-more.yml"),
            "products:\n  - name: P2\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let sources = vec![dir.path().display().to_string()];
        let set = loader().load(&sources).unwrap();
        let names: Vec<_> = set.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["P1", "P2"]);
        assert!(set.iter().all(|r| r.source.is_some()));
    }

    #[test]
    fn test_glob_without_matches() {
        let dir = TempDir::new().unwrap();
        let pattern = format!("{}/*.yaml", dir.path().display());
        let result = expand_sources(&[pattern]);
        assert!(matches!(result, Err(ContentflowError::NoInputFiles { .. })));
    }

    #[test]
    fn test_missing_file() {
        let result = expand_sources(&["/definitely/not/here.yaml".to_string()]);
        assert!(matches!(result, Err(ContentflowError::FileNotFound { .. })));
    }
}
