//! Azure Container Instances through the ARM REST API
//!
//! Each worker is one container group named `{pool}-{ordinal}` and tagged
//! `Component=worker` with its ordinal under `WorkerInstance`. Start and
//! create are long-running operations and are polled through the
//! `Azure-AsyncOperation` URL until they settle; stop completes inline.
//!
//! Authentication uses the client-credentials flow against Entra ID. The
//! bearer token is cached until shortly before it expires.

use super::{async_trait, OrchestrationProvider, PoolInspector};
use crate::error::{Operation, Result, ScalerError};
use crate::models::{InstanceState, PoolInstance, WorkerSpec};
use futures_util::future::join_all;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_MANAGEMENT_ENDPOINT: &str = "https://management.azure.com/";
pub const DEFAULT_AUTHORITY_ENDPOINT: &str = "https://login.microsoftonline.com/";
pub const DEFAULT_API_VERSION: &str = "2023-05-01";

/// Tokens are refreshed this long before they expire
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(120);

/// Lower bound on the delay between operation status polls
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

const ASYNC_OPERATION_HEADER: &str = "azure-asyncoperation";
const COMPONENT_TAG: &str = "Component";
const WORKER_COMPONENT: &str = "worker";
const ORDINAL_TAG: &str = "WorkerInstance";

/// Subscription, credentials and endpoints of the Azure backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AciConfig {
    pub subscription_id: String,
    pub resource_group: String,
    pub tenant_id: String,
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret: String,

    #[serde(default = "default_management_endpoint")]
    pub management_endpoint: String,

    #[serde(default = "default_authority_endpoint")]
    pub authority_endpoint: String,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Delay between polls of a long-running operation
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_management_endpoint() -> String {
    DEFAULT_MANAGEMENT_ENDPOINT.to_string()
}

fn default_authority_endpoint() -> String {
    DEFAULT_AUTHORITY_ENDPOINT.to_string()
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

fn default_poll_interval_secs() -> u64 {
    5
}

/// Container definition used when a new worker group is created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerTemplate {
    pub location: String,
    pub image: String,
    pub container_name: String,
    pub cpu: f64,
    pub memory_gb: f64,
    pub command: Vec<String>,
    pub restart_policy: String,
    pub application: String,
    pub environment: String,
    /// Plain environment variables passed to every worker
    pub env: Vec<(String, String)>,
    /// Secret environment variables passed to every worker
    #[serde(skip_serializing)]
    pub secure_env: Vec<(String, String)>,
}

impl Default for WorkerTemplate {
    fn default() -> Self {
        Self {
            location: "Southeast Asia".to_string(),
            image: "judge0/judge0:1.13.1".to_string(),
            container_name: "judge0-worker".to_string(),
            cpu: 1.0,
            memory_gb: 2.0,
            command: vec!["./scripts/workers".to_string()],
            restart_policy: "OnFailure".to_string(),
            application: "judge0".to_string(),
            environment: "production".to_string(),
            env: Vec::new(),
            secure_env: Vec::new(),
        }
    }
}

impl WorkerTemplate {
    /// ARM request body for the container group of `spec`
    pub fn container_group(&self, spec: &WorkerSpec) -> Value {
        let ordinal = spec.ordinal.to_string();

        let mut environment_variables: Vec<Value> = self
            .env
            .iter()
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect();
        environment_variables.push(json!({ "name": "WORKER_ID", "value": ordinal }));
        environment_variables.extend(
            self.secure_env
                .iter()
                .map(|(name, value)| json!({ "name": name, "secureValue": value })),
        );

        json!({
            "location": self.location,
            "tags": {
                "Environment": self.environment,
                "Application": self.application,
                "Component": WORKER_COMPONENT,
                "ManagedBy": "autoscaler",
                "WorkerInstance": ordinal,
            },
            "properties": {
                "containers": [{
                    "name": self.container_name,
                    "properties": {
                        "image": self.image,
                        "command": self.command,
                        "resources": {
                            "requests": {
                                "cpu": self.cpu,
                                "memoryInGB": self.memory_gb,
                            }
                        },
                        "securityContext": { "privileged": true },
                        "environmentVariables": environment_variables,
                    }
                }],
                "osType": "Linux",
                "restartPolicy": self.restart_policy,
                "sku": "Standard",
            }
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct GroupList {
    #[serde(default)]
    value: Vec<ContainerGroup>,
    #[serde(rename = "nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContainerGroup {
    name: String,
    #[serde(default)]
    tags: HashMap<String, String>,
    #[serde(default)]
    properties: GroupProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupProperties {
    instance_view: Option<InstanceView>,
}

#[derive(Debug, Deserialize)]
struct InstanceView {
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AsyncOperation {
    status: String,
    error: Option<ArmError>,
}

#[derive(Debug, Deserialize)]
struct ArmError {
    message: Option<String>,
}

impl ContainerGroup {
    fn is_worker_of(&self, pool: &str) -> bool {
        self.name.starts_with(pool)
            && self.tags.get(COMPONENT_TAG).map(String::as_str) == Some(WORKER_COMPONENT)
    }

    /// Ordinal from the `WorkerInstance` tag, falling back to the name suffix
    fn ordinal(&self) -> u32 {
        self.tags
            .get(ORDINAL_TAG)
            .and_then(|v| v.parse().ok())
            .or_else(|| self.name.rsplit('-').next().and_then(|s| s.parse().ok()))
            .unwrap_or(0)
    }

    fn into_instance(self) -> PoolInstance {
        let ordinal = self.ordinal();
        let state = self
            .properties
            .instance_view
            .and_then(|v| v.state)
            .unwrap_or_else(|| "Unknown".to_string());

        PoolInstance {
            name: self.name,
            state: InstanceState::from_provider(&state),
            ordinal,
        }
    }
}

/// Worker pool backed by Azure container groups
pub struct ContainerInstances {
    client: Client,
    config: AciConfig,
    template: WorkerTemplate,
    management: Url,
    authority: Url,
    token: Mutex<Option<CachedToken>>,
}

impl ContainerInstances {
    pub fn new(config: AciConfig, template: WorkerTemplate) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ScalerError::Config(format!("failed to create Azure HTTP client: {}", e)))?;

        let management = parse_endpoint(&config.management_endpoint)?;
        let authority = parse_endpoint(&config.authority_endpoint)?;

        Ok(Self {
            client,
            config,
            template,
            management,
            authority,
            token: Mutex::new(None),
        })
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.config.poll_interval_secs).max(MIN_POLL_INTERVAL)
    }

    /// Cached bearer token, refreshed when close to expiry
    async fn access_token(&self) -> std::result::Result<String, String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                return Ok(token.value.clone());
            }
        }

        let url = self
            .authority
            .join(&format!("{}/oauth2/v2.0/token", self.config.tenant_id))
            .map_err(|e| format!("invalid token URL: {}", e))?;
        let scope = format!("{}.default", self.management);

        let response = self
            .client
            .post(url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("scope", scope.as_str()),
            ])
            .send()
            .await
            .map_err(|e| format!("token request failed: {}", e))?;
        let response = error_for_status(response).await?;
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| format!("token response unreadable: {}", e))?;

        debug!(expires_in = token.expires_in, "Acquired Azure management token");
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(token.access_token)
    }

    fn group_url(&self, name: Option<&str>, action: Option<&str>) -> std::result::Result<Url, String> {
        let mut path = format!(
            "subscriptions/{}/resourceGroups/{}/providers/Microsoft.ContainerInstance/containerGroups",
            self.config.subscription_id, self.config.resource_group
        );
        if let Some(name) = name {
            path.push('/');
            path.push_str(name);
        }
        if let Some(action) = action {
            path.push('/');
            path.push_str(action);
        }

        let mut url = self
            .management
            .join(&path)
            .map_err(|e| format!("invalid resource URL: {}", e))?;
        url.query_pairs_mut()
            .append_pair("api-version", &self.config.api_version);
        Ok(url)
    }

    async fn request(&self, method: Method, url: Url) -> std::result::Result<RequestBuilder, String> {
        let token = self.access_token().await?;
        Ok(self.client.request(method, url).bearer_auth(token))
    }

    async fn send(&self, request: RequestBuilder) -> std::result::Result<Response, String> {
        let response = request
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;
        error_for_status(response).await
    }

    /// Names and ordinals of the pool's groups, as reported by the list pages
    async fn list_group_names(&self, pool: &str) -> std::result::Result<Vec<(String, u32)>, String> {
        let mut names = Vec::new();
        let mut next = Some(self.group_url(None, None)?);

        while let Some(url) = next.take() {
            let response = self.send(self.request(Method::GET, url).await?).await?;
            let page: GroupList = response
                .json()
                .await
                .map_err(|e| format!("container group list unreadable: {}", e))?;

            names.extend(
                page.value
                    .iter()
                    .filter(|g| g.is_worker_of(pool))
                    .map(|g| (g.name.clone(), g.ordinal())),
            );

            next = match page.next_link {
                Some(link) => Some(
                    Url::parse(&link).map_err(|e| format!("invalid nextLink {}: {}", link, e))?,
                ),
                None => None,
            };
        }

        Ok(names)
    }

    async fn get_group(&self, name: &str) -> std::result::Result<ContainerGroup, String> {
        let url = self.group_url(Some(name), None)?;
        let response = self.send(self.request(Method::GET, url).await?).await?;
        response
            .json()
            .await
            .map_err(|e| format!("container group unreadable: {}", e))
    }

    /// Follow a long-running operation until it settles
    async fn wait_for(&self, response: Response) -> std::result::Result<(), String> {
        let Some(status_url) = response
            .headers()
            .get(ASYNC_OPERATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
        else {
            return Ok(());
        };
        let status_url =
            Url::parse(&status_url).map_err(|e| format!("invalid operation URL: {}", e))?;

        loop {
            let response = self
                .send(self.request(Method::GET, status_url.clone()).await?)
                .await?;
            let operation: AsyncOperation = response
                .json()
                .await
                .map_err(|e| format!("operation status unreadable: {}", e))?;

            match operation.status.as_str() {
                "Succeeded" => return Ok(()),
                "Failed" | "Canceled" => {
                    let message = operation
                        .error
                        .and_then(|e| e.message)
                        .unwrap_or_else(|| "no details".to_string());
                    return Err(format!("operation {}: {}", operation.status, message));
                }
                status => {
                    debug!(status, "Operation still in progress");
                    tokio::time::sleep(self.poll_interval()).await;
                }
            }
        }
    }

    async fn start_group(&self, name: &str) -> std::result::Result<(), String> {
        let url = self.group_url(Some(name), Some("start"))?;
        let response = self.send(self.request(Method::POST, url).await?).await?;
        self.wait_for(response).await
    }

    async fn stop_group(&self, name: &str) -> std::result::Result<(), String> {
        let url = self.group_url(Some(name), Some("stop"))?;
        self.send(self.request(Method::POST, url).await?).await?;
        Ok(())
    }

    async fn create_group(&self, spec: &WorkerSpec) -> std::result::Result<(), String> {
        let url = self.group_url(Some(&spec.name), None)?;
        let body = self.template.container_group(spec);
        let response = self
            .send(self.request(Method::PUT, url).await?.json(&body))
            .await?;
        self.wait_for(response).await
    }
}

fn parse_endpoint(endpoint: &str) -> Result<Url> {
    let normalized = if endpoint.ends_with('/') {
        endpoint.to_string()
    } else {
        format!("{}/", endpoint)
    };
    Url::parse(&normalized)
        .map_err(|e| ScalerError::Config(format!("invalid Azure endpoint {}: {}", endpoint, e)))
}

async fn error_for_status(response: Response) -> std::result::Result<Response, String> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(format!("Azure API error ({}): {}", status, body))
}

#[async_trait]
impl PoolInspector for ContainerInstances {
    async fn list_instances(&self, pool: &str) -> Result<Vec<PoolInstance>> {
        let names = self
            .list_group_names(pool)
            .await
            .map_err(ScalerError::Inventory)?;

        let details = join_all(names.iter().map(|(name, _)| self.get_group(name))).await;

        // A group whose details failed still holds its ordinal
        let mut instances = Vec::with_capacity(names.len());
        for ((name, ordinal), detail) in names.into_iter().zip(details) {
            match detail {
                Ok(group) => instances.push(group.into_instance()),
                Err(e) => {
                    warn!(worker = %name, error = %e, "Failed to get worker details, keeping as unknown");
                    instances.push(PoolInstance {
                        name,
                        state: InstanceState::Other("Unknown".to_string()),
                        ordinal,
                    });
                }
            }
        }
        instances.sort_by_key(|i| i.ordinal);

        debug!(pool = %pool, count = instances.len(), "Listed worker container groups");
        Ok(instances)
    }
}

#[async_trait]
impl OrchestrationProvider for ContainerInstances {
    async fn start(&self, name: &str) -> Result<()> {
        info!(worker = %name, "Starting stopped worker");
        self.start_group(name)
            .await
            .map_err(|e| ScalerError::provider(Operation::Start, name, e))?;
        info!(worker = %name, "Started worker");
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        info!(worker = %name, "Stopping worker");
        self.stop_group(name)
            .await
            .map_err(|e| ScalerError::provider(Operation::Stop, name, e))?;
        info!(worker = %name, "Stopped worker");
        Ok(())
    }

    async fn create(&self, spec: &WorkerSpec) -> Result<()> {
        info!(worker = %spec.name, ordinal = spec.ordinal, "Creating worker");
        self.create_group(spec)
            .await
            .map_err(|e| ScalerError::provider(Operation::Create, spec.name.clone(), e))?;
        info!(worker = %spec.name, "Created worker");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server, ServerGuard};

    const GROUPS_PATH: &str =
        "/subscriptions/sub-1/resourceGroups/rg-judge/providers/Microsoft.ContainerInstance/containerGroups";

    fn api_version() -> Matcher {
        Matcher::UrlEncoded("api-version".into(), DEFAULT_API_VERSION.into())
    }

    fn backend(server: &ServerGuard) -> ContainerInstances {
        let config = AciConfig {
            subscription_id: "sub-1".to_string(),
            resource_group: "rg-judge".to_string(),
            tenant_id: "tenant-1".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            management_endpoint: server.url(),
            authority_endpoint: server.url(),
            api_version: DEFAULT_API_VERSION.to_string(),
            poll_interval_secs: 0,
        };
        ContainerInstances::new(config, WorkerTemplate::default()).unwrap()
    }

    async fn mock_token(server: &mut ServerGuard, hits: usize) -> mockito::Mock {
        server
            .mock("POST", "/tenant-1/oauth2/v2.0/token")
            .match_body(Matcher::UrlEncoded(
                "grant_type".into(),
                "client_credentials".into(),
            ))
            .with_body(r#"{"access_token": "tok", "expires_in": 3600, "token_type": "Bearer"}"#)
            .expect(hits)
            .create_async()
            .await
    }

    fn group(name: &str, ordinal: u32, state: &str) -> Value {
        json!({
            "name": name,
            "tags": { "Component": "worker", "WorkerInstance": ordinal.to_string() },
            "properties": { "instanceView": { "state": state } }
        })
    }

    #[test]
    fn test_template_tags_and_environment() {
        let template = WorkerTemplate {
            env: vec![("REDIS_HOST".to_string(), "redis".to_string())],
            secure_env: vec![("DATABASE_URL".to_string(), "postgres://".to_string())],
            ..Default::default()
        };
        let body = template.container_group(&WorkerSpec::new("judge0-worker", 3));

        assert_eq!(body["tags"]["Component"], "worker");
        assert_eq!(body["tags"]["ManagedBy"], "autoscaler");
        assert_eq!(body["tags"]["WorkerInstance"], "3");
        assert_eq!(body["properties"]["restartPolicy"], "OnFailure");

        let container = &body["properties"]["containers"][0]["properties"];
        assert_eq!(container["image"], "judge0/judge0:1.13.1");
        assert_eq!(container["securityContext"]["privileged"], true);

        let env = container["environmentVariables"].as_array().unwrap();
        assert!(env.contains(&json!({ "name": "REDIS_HOST", "value": "redis" })));
        assert!(env.contains(&json!({ "name": "WORKER_ID", "value": "3" })));
        assert!(env.contains(&json!({ "name": "DATABASE_URL", "secureValue": "postgres://" })));
    }

    #[tokio::test]
    async fn test_list_filters_paginates_and_keeps_failed_details() {
        let mut server = Server::new_async().await;
        let token = mock_token(&mut server, 1).await;

        let next_link = format!("{}/next-page?token=abc", server.url());
        let _first_page = server
            .mock("GET", GROUPS_PATH)
            .match_query(api_version())
            .match_header("authorization", "Bearer tok")
            .with_body(
                json!({
                    "value": [
                        { "name": "judge0-worker-1", "tags": { "Component": "worker" } },
                        { "name": "judge0-api", "tags": { "Component": "api" } },
                        { "name": "judge0-worker-2", "tags": { "Component": "worker", "WorkerInstance": "2" } }
                    ],
                    "nextLink": next_link
                })
                .to_string(),
            )
            .create_async()
            .await;
        let _second_page = server
            .mock("GET", "/next-page")
            .match_query(Matcher::UrlEncoded("token".into(), "abc".into()))
            .with_body(
                json!({
                    "value": [
                        { "name": "judge0-worker-3", "tags": { "Component": "worker" } },
                        { "name": "other-worker-1", "tags": { "Component": "worker" } }
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let mut details = Vec::new();
        for (name, ordinal, state) in [
            ("judge0-worker-1", 1, "Running"),
            ("judge0-worker-3", 3, "Stopped"),
        ] {
            let mock = server
                .mock("GET", format!("{}/{}", GROUPS_PATH, name).as_str())
                .match_query(api_version())
                .with_body(group(name, ordinal, state).to_string())
                .create_async()
                .await;
            details.push(mock);
        }
        let _broken_detail = server
            .mock("GET", format!("{}/judge0-worker-2", GROUPS_PATH).as_str())
            .match_query(api_version())
            .with_status(500)
            .with_body(r#"{"error": {"code": "InternalServerError"}}"#)
            .create_async()
            .await;

        let aci = backend(&server);
        let instances = aci.list_instances("judge0-worker").await.unwrap();

        assert_eq!(
            instances,
            vec![
                PoolInstance {
                    name: "judge0-worker-1".to_string(),
                    state: InstanceState::Running,
                    ordinal: 1,
                },
                PoolInstance {
                    name: "judge0-worker-2".to_string(),
                    state: InstanceState::Other("Unknown".to_string()),
                    ordinal: 2,
                },
                PoolInstance {
                    name: "judge0-worker-3".to_string(),
                    state: InstanceState::StoppedOrTerminated,
                    ordinal: 3,
                },
            ]
        );
        token.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_detail_keeps_its_ordinal_reserved() {
        let mut server = Server::new_async().await;
        let _token = mock_token(&mut server, 1).await;
        let _list = server
            .mock("GET", GROUPS_PATH)
            .match_query(api_version())
            .with_body(
                json!({
                    "value": [
                        { "name": "judge0-worker-1", "tags": { "Component": "worker", "WorkerInstance": "1" } },
                        { "name": "judge0-worker-2", "tags": { "Component": "worker", "WorkerInstance": "2" } }
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;
        let _healthy = server
            .mock("GET", format!("{}/judge0-worker-1", GROUPS_PATH).as_str())
            .match_query(api_version())
            .with_body(group("judge0-worker-1", 1, "Running").to_string())
            .create_async()
            .await;
        let _broken = server
            .mock("GET", format!("{}/judge0-worker-2", GROUPS_PATH).as_str())
            .match_query(api_version())
            .with_status(503)
            .create_async()
            .await;

        let aci = backend(&server);
        let instances = aci.list_instances("judge0-worker").await.unwrap();
        let plan = crate::reconciler::plan("judge0-worker", &instances, 2, true);

        assert!(plan.restart.is_empty());
        assert_eq!(plan.create, vec![WorkerSpec::new("judge0-worker", 3)]);
    }

    #[test]
    fn test_poll_interval_has_a_floor() {
        let endpoint = "http://127.0.0.1:1";
        let config = AciConfig {
            subscription_id: "sub-1".to_string(),
            resource_group: "rg-judge".to_string(),
            tenant_id: "tenant-1".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            management_endpoint: endpoint.to_string(),
            authority_endpoint: endpoint.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            poll_interval_secs: 0,
        };
        let aci = ContainerInstances::new(config.clone(), WorkerTemplate::default()).unwrap();
        assert_eq!(aci.poll_interval(), MIN_POLL_INTERVAL);

        let aci = ContainerInstances::new(
            AciConfig {
                poll_interval_secs: 7,
                ..config
            },
            WorkerTemplate::default(),
        )
        .unwrap();
        assert_eq!(aci.poll_interval(), Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_listing_failure_is_an_inventory_error() {
        let mut server = Server::new_async().await;
        let _token = mock_token(&mut server, 1).await;
        let _forbidden = server
            .mock("GET", GROUPS_PATH)
            .match_query(api_version())
            .with_status(403)
            .with_body(r#"{"error": {"code": "AuthorizationFailed"}}"#)
            .create_async()
            .await;

        let err = backend(&server)
            .list_instances("judge0-worker")
            .await
            .unwrap_err();
        assert!(matches!(err, ScalerError::Inventory(_)));
        assert!(err.to_string().contains("AuthorizationFailed"));
    }

    #[tokio::test]
    async fn test_start_polls_async_operation() {
        let mut server = Server::new_async().await;
        let _token = mock_token(&mut server, 1).await;

        let operation_url = format!("{}/operations/op-1", server.url());
        let _start = server
            .mock("POST", format!("{}/judge0-worker-2/start", GROUPS_PATH).as_str())
            .match_query(api_version())
            .with_status(202)
            .with_header("Azure-AsyncOperation", &operation_url)
            .create_async()
            .await;
        let poll = server
            .mock("GET", "/operations/op-1")
            .with_body(r#"{"status": "Succeeded"}"#)
            .expect(1)
            .create_async()
            .await;

        backend(&server).start("judge0-worker-2").await.unwrap();
        poll.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_operation_is_a_provider_error() {
        let mut server = Server::new_async().await;
        let _token = mock_token(&mut server, 1).await;

        let operation_url = format!("{}/operations/op-2", server.url());
        let _create = server
            .mock("PUT", format!("{}/judge0-worker-4", GROUPS_PATH).as_str())
            .match_query(api_version())
            .match_body(Matcher::PartialJson(json!({
                "tags": { "WorkerInstance": "4", "Component": "worker" }
            })))
            .with_status(201)
            .with_header("Azure-AsyncOperation", &operation_url)
            .with_body("{}")
            .create_async()
            .await;
        let _operation = server
            .mock("GET", "/operations/op-2")
            .with_body(r#"{"status": "Failed", "error": {"message": "quota exceeded"}}"#)
            .create_async()
            .await;

        let err = backend(&server)
            .create(&WorkerSpec::new("judge0-worker", 4))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ScalerError::Provider {
                operation: Operation::Create,
                ..
            }
        ));
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[tokio::test]
    async fn test_token_is_cached_across_operations() {
        let mut server = Server::new_async().await;
        let token = mock_token(&mut server, 1).await;

        let mut stops = Vec::new();
        for name in ["judge0-worker-1", "judge0-worker-2"] {
            let mock = server
                .mock("POST", format!("{}/{}/stop", GROUPS_PATH, name).as_str())
                .match_query(api_version())
                .with_status(204)
                .create_async()
                .await;
            stops.push(mock);
        }

        let aci = backend(&server);
        aci.stop("judge0-worker-1").await.unwrap();
        aci.stop("judge0-worker-2").await.unwrap();
        token.assert_async().await;
        for mock in stops {
            mock.assert_async().await;
        }
    }
}
