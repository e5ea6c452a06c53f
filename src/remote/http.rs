// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! REST client for a Katello-style content server

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::{
    PublishTicket, RemoteClient, RemoteEntity, TaskHandle, TaskStatus, ENVIRONMENTS_KEY,
    LATEST_VERSION_KEY,
};
use crate::errors::{ContentflowError, ContentflowResult};
use crate::reconcile::attributes::map_from_remote;
use crate::resources::ResourceKind;

/// Where a kind lives on the server
struct Endpoint {
    /// Collection path; `{org}` is replaced by the organization id
    collection: &'static str,
    /// Key the request body is wrapped in, for APIs that expect one
    wrapper: Option<&'static str>,
    /// How the organization scope is passed on create
    scope: Scope,
}

#[derive(Clone, Copy, PartialEq)]
enum Scope {
    OrganizationId,
    OrganizationIds,
    Path,
    Global,
}

fn endpoint(kind: ResourceKind) -> Endpoint {
    let (collection, wrapper, scope) = match kind {
        ResourceKind::Credential => ("/katello/api/content_credentials", None, Scope::OrganizationId),
        ResourceKind::Product => ("/katello/api/products", None, Scope::OrganizationId),
        ResourceKind::Repository | ResourceKind::ExternalRepository => {
            ("/katello/api/repositories", None, Scope::OrganizationId)
        }
        ResourceKind::SyncPlan => ("/katello/api/organizations/{org}/sync_plans", None, Scope::Path),
        ResourceKind::LifecycleEnvironment => ("/katello/api/environments", None, Scope::OrganizationId),
        ResourceKind::ContentView | ResourceKind::CompositeContentView => {
            ("/katello/api/content_views", None, Scope::OrganizationId)
        }
        ResourceKind::ActivationKey => ("/katello/api/activation_keys", None, Scope::OrganizationId),
        ResourceKind::PartitionTable => ("/api/ptables", Some("ptable"), Scope::OrganizationIds),
        ResourceKind::OperatingSystem => ("/api/operatingsystems", Some("operatingsystem"), Scope::Global),
    };
    Endpoint {
        collection,
        wrapper,
        scope,
    }
}

/// HTTP implementation of [`RemoteClient`]
pub struct HttpRemote {
    http: Client,
    base_url: String,
    username: String,
    password: String,
    organizations: Mutex<HashMap<String, String>>,
}

impl HttpRemote {
    /// Create a client with explicit credentials
    pub fn new(
        base_url: &str,
        username: String,
        password: String,
        verify_tls: bool,
        timeout: Duration,
    ) -> ContentflowResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!verify_tls)
            .build()
            .map_err(|e| ContentflowError::Config {
                message: format!("Failed to create HTTP client: {}", e),
                help: None,
            })?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            username,
            password,
            organizations: Mutex::new(HashMap::new()),
        })
    }

    /// Create a client reading credentials from the named environment variables
    pub fn from_env(
        base_url: &str,
        username_env: &str,
        password_env: &str,
        verify_tls: bool,
        timeout: Duration,
    ) -> ContentflowResult<Self> {
        let read = |name: &str| {
            std::env::var(name).map_err(|_| ContentflowError::Config {
                message: format!("{} environment variable not set", name),
                help: Some("Export the server credentials, or use --simulate".into()),
            })
        };
        Self::new(base_url, read(username_env)?, read(password_env)?, verify_tls, timeout)
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> ContentflowResult<Option<Value>> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%method, %url, "remote request");

        let mut request = self
            .http
            .request(method.clone(), &url)
            .basic_auth(&self.username, Some(&self.password))
            .header("Accept", "application/json")
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND && method == Method::GET {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("{} {}: {}", status, path, body.chars().take(200).collect::<String>());
            let retryable = status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
            return Err(ContentflowError::RemoteCall {
                operation: format!("{} {}", method, path),
                message,
                retryable,
            });
        }

        Ok(Some(response.json().await?))
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> ContentflowResult<Option<Value>> {
        self.request(Method::GET, path, query, None).await
    }

    async fn organization_id(&self, organization: &str) -> ContentflowResult<String> {
        let cached = lock(&self.organizations).get(organization).cloned();
        if let Some(id) = cached {
            return Ok(id);
        }

        let search = vec![("search", format!("name=\"{}\"", organization))];
        let response = self.get("/katello/api/organizations", &search).await?;
        let id = response
            .as_ref()
            .and_then(|r| first_result(r, organization))
            .and_then(|o| id_of(&o))
            .ok_or_else(|| {
                ContentflowError::remote_permanent(
                    "find organization",
                    format!("organization '{}' does not exist", organization),
                )
            })?;

        lock(&self.organizations).insert(organization.to_string(), id.clone());
        Ok(id)
    }

    fn collection(&self, kind: ResourceKind, organization_id: &str) -> String {
        endpoint(kind).collection.replace("{org}", organization_id)
    }

    /// Replace a composite's components with the given component values
    async fn replace_components(&self, composite_id: &str, components: &[Value]) -> ContentflowResult<()> {
        let base = format!("/katello/api/content_views/{}/content_view_components", composite_id);

        let current = self.content_view(composite_id).await?;
        let existing: Vec<String> = current
            .get("content_view_components")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(id_of)
            .collect();
        if !existing.is_empty() {
            let body = json!({ "component_ids": existing });
            self.request(Method::PUT, &format!("{}/remove", base), &[], Some(&body))
                .await?;
        }

        let mut add = Vec::with_capacity(components.len());
        for component in components {
            let Some(view_id) = component.get("content_view_id").and_then(Value::as_str) else {
                continue;
            };
            match component.get("version").and_then(major_version) {
                Some(version) => {
                    let view = self.content_view(view_id).await?;
                    let version_id = version_id(&view, version).ok_or_else(|| {
                        ContentflowError::remote_permanent(
                            "components",
                            format!("content view {} has no version {}", view_id, version),
                        )
                    })?;
                    add.push(json!({ "content_view_version_id": version_id }));
                }
                None => add.push(json!({ "content_view_id": view_id, "latest": true })),
            }
        }
        if !add.is_empty() {
            let body = json!({ "components": add });
            self.request(Method::PUT, &format!("{}/add", base), &[], Some(&body))
                .await?;
        }
        Ok(())
    }

    async fn content_view(&self, id: &str) -> ContentflowResult<Value> {
        self.get(&format!("/katello/api/content_views/{}", id), &[])
            .await?
            .ok_or_else(|| {
                ContentflowError::remote_permanent("content view", format!("no content view {}", id))
            })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn wrap(wrapper: Option<&str>, body: Map<String, Value>) -> Value {
    match wrapper {
        Some(key) => {
            let mut wrapped = Map::new();
            wrapped.insert(key.to_string(), Value::Object(body));
            Value::Object(wrapped)
        }
        None => Value::Object(body),
    }
}

fn id_of(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

/// First result of a search response whose name matches exactly
fn first_result(response: &Value, name: &str) -> Option<Value> {
    response
        .get("results")?
        .as_array()?
        .iter()
        .find(|r| r.get("name").and_then(Value::as_str) == Some(name))
        .cloned()
}

/// Server id of a numbered version in a content view's version list
fn version_id(view: &Value, version: u32) -> Option<String> {
    view.get("versions")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .find(|v| v.get("version").and_then(major_version) == Some(version))
        .and_then(id_of)
}

/// Major number of a version string such as "3.0"
fn major_version(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.split('.').next()?.parse().ok(),
        _ => None,
    }
}

/// Fold a content view's version list into `latest_version` and `environments`
fn normalize_content_view(mut attributes: Map<String, Value>) -> Map<String, Value> {
    let names: HashMap<String, String> = attributes
        .get("environments")
        .and_then(Value::as_array)
        .map(|envs| {
            envs.iter()
                .filter_map(|e| Some((id_of(e)?, e.get("name")?.as_str()?.to_string())))
                .collect()
        })
        .unwrap_or_default();

    let mut latest = 0;
    let mut environments = Map::new();
    for version in attributes
        .get("versions")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let Some(number) = version.get("version").and_then(major_version) else {
            continue;
        };
        latest = latest.max(number);
        for env_id in version
            .get("environment_ids")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let key = match env_id {
                Value::Number(n) => n.to_string(),
                other => other.as_str().unwrap_or_default().to_string(),
            };
            if let Some(name) = names.get(&key) {
                environments.insert(name.clone(), Value::from(number));
            }
        }
    }

    attributes.insert(LATEST_VERSION_KEY.into(), Value::from(latest));
    attributes.insert(ENVIRONMENTS_KEY.into(), Value::Object(environments));
    attributes
}

fn into_entity(kind: ResourceKind, value: Value) -> ContentflowResult<RemoteEntity> {
    let id = id_of(&value)
        .ok_or_else(|| ContentflowError::remote_permanent("decode", "response has no id"))?;
    let attributes = match value {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let attributes = if kind.is_content_view() {
        normalize_content_view(attributes)
    } else {
        attributes
    };
    Ok(RemoteEntity {
        id,
        attributes: map_from_remote(kind, attributes),
    })
}

/// Composite components go through their own endpoint, not the view body
fn take_components(kind: ResourceKind, body: &mut Map<String, Value>) -> Option<Vec<Value>> {
    if kind != ResourceKind::CompositeContentView {
        return None;
    }
    match body.remove("components") {
        Some(Value::Array(components)) => Some(components),
        _ => None,
    }
}

fn task_handle(value: &Value, label: String) -> ContentflowResult<TaskHandle> {
    let id = id_of(value)
        .ok_or_else(|| ContentflowError::remote_permanent("decode", "task response has no id"))?;
    Ok(TaskHandle { id, label })
}

#[async_trait]
impl RemoteClient for HttpRemote {
    async fn find(
        &self,
        kind: ResourceKind,
        name: &str,
        organization: &str,
    ) -> ContentflowResult<Option<RemoteEntity>> {
        let organization_id = self.organization_id(organization).await?;
        let mut query = vec![("search", format!("name=\"{}\"", name))];
        if endpoint(kind).scope != Scope::Global {
            query.push(("organization_id", organization_id.clone()));
        }

        let response = self
            .get(&self.collection(kind, &organization_id), &query)
            .await?;
        let Some(found) = response.as_ref().and_then(|r| first_result(r, name)) else {
            return Ok(None);
        };

        // Search results are abbreviated; content views need their version list
        if kind.is_content_view() {
            let id = id_of(&found)
                .ok_or_else(|| ContentflowError::remote_permanent("decode", "response has no id"))?;
            return into_entity(kind, self.content_view(&id).await?).map(Some);
        }

        into_entity(kind, found).map(Some)
    }

    async fn create(
        &self,
        kind: ResourceKind,
        organization: &str,
        attributes: &Map<String, Value>,
    ) -> ContentflowResult<RemoteEntity> {
        let organization_id = self.organization_id(organization).await?;
        let target = endpoint(kind);

        let mut body = attributes.clone();
        let components = take_components(kind, &mut body);
        match target.scope {
            Scope::OrganizationId => {
                body.insert("organization_id".into(), Value::String(organization_id.clone()));
            }
            Scope::OrganizationIds => {
                body.insert("organization_ids".into(), json!([organization_id]));
            }
            Scope::Path | Scope::Global => {}
        }
        if kind == ResourceKind::CompositeContentView {
            body.insert("composite".into(), Value::Bool(true));
        }

        let body = wrap(target.wrapper, body);

        let created = self
            .request(Method::POST, &self.collection(kind, &organization_id), &[], Some(&body))
            .await?
            .unwrap_or(Value::Null);
        let entity = into_entity(kind, created)?;
        if let Some(components) = components {
            self.replace_components(&entity.id, &components).await?;
        }
        Ok(entity)
    }

    async fn update(
        &self,
        kind: ResourceKind,
        id: &str,
        attributes: &Map<String, Value>,
    ) -> ContentflowResult<RemoteEntity> {
        let target = endpoint(kind);
        // Sync plans are updated through a path that does not need the organization
        let collection = match kind {
            ResourceKind::SyncPlan => "/katello/api/sync_plans".to_string(),
            _ => target.collection.to_string(),
        };

        let mut body = attributes.clone();
        let components = take_components(kind, &mut body);
        if let Some(components) = components {
            self.replace_components(id, &components).await?;
            if body.is_empty() {
                let current = self.content_view(id).await?;
                return into_entity(kind, current);
            }
        }

        let body = wrap(target.wrapper, body);
        let updated = self
            .request(Method::PUT, &format!("{}/{}", collection, id), &[], Some(&body))
            .await?
            .unwrap_or(Value::Null);
        into_entity(kind, updated)
    }

    async fn publish(&self, content_view_id: &str) -> ContentflowResult<PublishTicket> {
        let current = into_entity(
            ResourceKind::ContentView,
            self.content_view(content_view_id).await?,
        )?;
        let latest = current
            .attributes
            .get(LATEST_VERSION_KEY)
            .and_then(major_version)
            .unwrap_or(0);

        let task = self
            .request(
                Method::POST,
                &format!("/katello/api/content_views/{}/publish", content_view_id),
                &[],
                Some(&json!({})),
            )
            .await?
            .unwrap_or(Value::Null);

        let version = latest + 1;
        Ok(PublishTicket {
            version,
            task: Some(task_handle(
                &task,
                format!("publish content view {} version {}", content_view_id, version),
            )?),
        })
    }

    async fn promote(
        &self,
        content_view_id: &str,
        version: u32,
        environment_id: &str,
    ) -> ContentflowResult<TaskHandle> {
        let view = self.content_view(content_view_id).await?;
        let version_id = version_id(&view, version).ok_or_else(|| {
            ContentflowError::remote_permanent(
                "promote",
                format!("content view {} has no version {}", content_view_id, version),
            )
        })?;

        let body = json!({ "environment_ids": [environment_id] });
        let task = self
            .request(
                Method::POST,
                &format!("/katello/api/content_view_versions/{}/promote", version_id),
                &[],
                Some(&body),
            )
            .await?
            .unwrap_or(Value::Null);

        task_handle(
            &task,
            format!(
                "promote content view {} version {} to environment {}",
                content_view_id, version, environment_id
            ),
        )
    }

    async fn poll(&self, task: &TaskHandle) -> ContentflowResult<TaskStatus> {
        let status = self
            .get(&format!("/foreman_tasks/api/tasks/{}", task.id), &[])
            .await?
            .ok_or_else(|| ContentflowError::remote_permanent("poll", format!("no task {}", task.id)))?;

        let state = status.get("state").and_then(Value::as_str).unwrap_or("running");
        let result = status.get("result").and_then(Value::as_str).unwrap_or("pending");

        Ok(match (state, result) {
            ("stopped", "success") | ("stopped", "warning") => TaskStatus::Succeeded,
            ("stopped", _) | ("paused", "error") => {
                let message = status
                    .pointer("/humanized/errors")
                    .and_then(Value::as_array)
                    .map(|errors| {
                        errors
                            .iter()
                            .filter_map(Value::as_str)
                            .collect::<Vec<_>>()
                            .join("; ")
                    })
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| result.to_string());
                TaskStatus::Failed(message)
            }
            _ => TaskStatus::Running,
        })
    }

    fn name(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_major_version() {
        assert_eq!(major_version(&json!("3.0")), Some(3));
        assert_eq!(major_version(&json!(2)), Some(2));
        assert_eq!(major_version(&json!(null)), None);
    }

    #[test]
    fn test_normalize_content_view() {
        let view = json!({
            "id": 7,
            "name": "CV1",
            "environments": [
                {"id": 1, "name": "Library"},
                {"id": 2, "name": "Development"}
            ],
            "versions": [
                {"id": 10, "version": "1.0", "environment_ids": [2]},
                {"id": 11, "version": "2.0", "environment_ids": [1]}
            ]
        });

        let entity = into_entity(ResourceKind::ContentView, view).unwrap();
        assert_eq!(entity.id, "7");
        assert_eq!(entity.attributes[LATEST_VERSION_KEY], 2);
        assert_eq!(entity.attributes[ENVIRONMENTS_KEY]["Library"], 2);
        assert_eq!(entity.attributes[ENVIRONMENTS_KEY]["Development"], 1);
    }

    #[test]
    fn test_found_repository_compares_unchanged() {
        let row = json!({
            "id": 12,
            "name": "R1",
            "content_type": "yum",
            "product": {"id": 3, "name": "P1", "cp_id": "1700000000"}
        });
        let entity = into_entity(ResourceKind::Repository, row).unwrap();
        assert_eq!(entity.attributes["product_id"], "3");

        let mut declared = Map::new();
        declared.insert("name".into(), json!("R1"));
        declared.insert("content_type".into(), json!("yum"));
        declared.insert("product_id".into(), json!("3"));
        assert!(crate::reconcile::attributes::differing_keys(&declared, &entity.attributes).is_empty());
    }

    #[test]
    fn test_found_environment_reads_prior() {
        let row = json!({
            "id": 4,
            "name": "QA",
            "library": false,
            "prior": {"id": 2, "name": "Development"}
        });
        let entity = into_entity(ResourceKind::LifecycleEnvironment, row).unwrap();
        assert_eq!(entity.attributes["prior_id"], "2");
    }

    #[test]
    fn test_components_leave_the_body() {
        let mut body = Map::new();
        body.insert("name".into(), json!("CCV"));
        body.insert("components".into(), json!([{"content_view_id": "5", "version": 1}]));

        assert!(take_components(ResourceKind::ContentView, &mut body.clone()).is_none());
        let components = take_components(ResourceKind::CompositeContentView, &mut body).unwrap();
        assert_eq!(components.len(), 1);
        assert!(!body.contains_key("components"));
    }

    #[test]
    fn test_version_id_lookup() {
        let view = json!({"versions": [{"id": 30, "version": "1.0"}, {"id": 31, "version": "2.0"}]});
        assert_eq!(version_id(&view, 2), Some("31".to_string()));
        assert_eq!(version_id(&view, 3), None);
    }

    #[test]
    fn test_endpoints_scope() {
        assert!(endpoint(ResourceKind::SyncPlan).collection.contains("{org}"));
        assert_eq!(endpoint(ResourceKind::PartitionTable).wrapper, Some("ptable"));
        assert!(endpoint(ResourceKind::OperatingSystem).scope == Scope::Global);
    }

    #[test]
    fn test_from_env_requires_credentials() {
        let result = HttpRemote::from_env(
            "https://satellite.example.com",
            "CONTENTFLOW_TEST_UNSET_USER",
            "CONTENTFLOW_TEST_UNSET_PASSWORD",
            true,
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(ContentflowError::Config { .. })));
    }
}
