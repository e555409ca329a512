//! Kapacitor HTTP client.
//!
//! Only the slice of the Kapacitor v1 API that the task resource needs is
//! covered: ping, task creation, lookup, patch and deletion. The surface is
//! expressed as the [`KapacitorApi`] trait so resources can be exercised
//! against [`crate::testing::InMemoryKapacitor`] without a server.

use std::fmt;

use reqwest::{Client as ReqwestClient, Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::KapacitorError;

/// Path prefix of every Kapacitor v1 endpoint.
pub const BASE_PATH: &str = "/kapacitor/v1";

/// Header carrying the server version on ping responses.
pub const VERSION_HEADER: &str = "X-Kapacitor-Version";

/// Script format that returns the TICKscript exactly as it was submitted.
pub const SCRIPT_FORMAT_RAW: &str = "raw";

/// Kind of a Kapacitor task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Processes points as they are written.
    Stream,
    /// Periodically queries stored data.
    Batch,
    /// A type this client does not know about.
    #[serde(other)]
    Unknown,
}

/// Whether a task is running on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// The task is executing.
    Enabled,
    /// The task is stored but not executing.
    Disabled,
}

impl From<bool> for TaskStatus {
    fn from(enabled: bool) -> Self {
        if enabled {
            Self::Enabled
        } else {
            Self::Disabled
        }
    }
}

/// A database/retention policy pair as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dbrp {
    /// Database name.
    #[serde(rename = "db")]
    pub database: String,
    /// Retention policy name.
    #[serde(rename = "rp")]
    pub retention_policy: String,
}

/// A hypermedia link to a Kapacitor object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Relation, `self` for object links.
    pub rel: String,
    /// Path of the object relative to the server root.
    pub href: String,
}

impl Link {
    /// The `self` link of the task with the given ID.
    pub fn task(id: &str) -> Self {
        Self {
            rel: "self".to_string(),
            href: format!("{}/tasks/{}", BASE_PATH, id),
        }
    }
}

/// Body of a task creation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateTaskOptions {
    /// Requested ID; the server generates one when empty.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Task type.
    #[serde(rename = "type")]
    pub task_type: TaskType,
    /// Databases and retention policies the task reads from.
    pub dbrps: Vec<Dbrp>,
    /// TICKscript body.
    #[serde(rename = "script")]
    pub tick_script: String,
    /// Initial status.
    pub status: TaskStatus,
}

/// Body of a task patch request. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpdateTaskOptions {
    /// New status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
}

impl UpdateTaskOptions {
    /// Whether the patch would change anything.
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
    }
}

/// Query options for fetching a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOptions {
    /// `formatted` or `raw`.
    pub script_format: String,
}

impl TaskOptions {
    /// Request the script body exactly as stored.
    pub fn raw() -> Self {
        Self {
            script_format: SCRIPT_FORMAT_RAW.to_string(),
        }
    }
}

/// A task as returned by Kapacitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Link to the task itself.
    pub link: Link,
    /// Task ID.
    pub id: String,
    /// Task type.
    #[serde(rename = "type")]
    pub task_type: TaskType,
    /// Databases and retention policies.
    #[serde(default)]
    pub dbrps: Vec<Dbrp>,
    /// TICKscript body in the requested format.
    #[serde(rename = "script", default)]
    pub tick_script: String,
    /// Current status.
    pub status: TaskStatus,
    /// Whether the task is currently executing.
    #[serde(default)]
    pub executing: bool,
    /// Last execution error, empty when healthy.
    #[serde(default)]
    pub error: String,
}

/// How credentials are presented to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationMethod {
    /// HTTP basic authentication with username and password.
    UserAuthentication,
}

/// Credentials attached to every request.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Username.
    pub username: String,
    /// Password. Never printed.
    pub password: String,
    /// Authentication method.
    pub method: AuthenticationMethod,
}

impl Credentials {
    /// Username/password credentials.
    pub fn user(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            method: AuthenticationMethod::UserAuthentication,
        }
    }

    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self.method {
            AuthenticationMethod::UserAuthentication => {
                request.basic_auth(&self.username, Some(&self.password))
            },
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("method", &self.method)
            .finish()
    }
}

/// Settings for constructing an [`HttpClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server root, e.g. `http://localhost:9092`.
    pub url: Url,
    /// Value of the `User-Agent` header.
    pub user_agent: String,
    /// Optional credentials.
    pub credentials: Option<Credentials>,
}

impl ClientConfig {
    /// Unauthenticated config for the given server root.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            user_agent: default_user_agent(),
            credentials: None,
        }
    }

    /// Attach credentials.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

/// `kapacitor-provider/<version>`.
pub fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

/// Operations the task resource performs against Kapacitor.
#[async_trait::async_trait]
pub trait KapacitorApi: Send + Sync {
    /// Check that the server is reachable. Returns the server version.
    async fn ping(&self) -> Result<String, KapacitorError>;

    /// Build the link of the task with the given ID.
    fn task_link(&self, id: &str) -> Link {
        Link::task(id)
    }

    /// Create a task.
    async fn create_task(&self, opts: CreateTaskOptions) -> Result<Task, KapacitorError>;

    /// Fetch a task.
    async fn task(&self, link: &Link, opts: &TaskOptions) -> Result<Task, KapacitorError>;

    /// Patch a task.
    async fn update_task(
        &self,
        link: &Link,
        opts: UpdateTaskOptions,
    ) -> Result<Task, KapacitorError>;

    /// Delete a task.
    async fn delete_task(&self, link: &Link) -> Result<(), KapacitorError>;
}

/// [`KapacitorApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpClient {
    http_client: ReqwestClient,
    config: ClientConfig,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl HttpClient {
    /// Create a new client. No request is made.
    pub fn new(config: ClientConfig) -> Result<Self, KapacitorError> {
        let http_client = ReqwestClient::builder()
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            http_client,
            config,
        })
    }

    /// The server root this client talks to.
    pub fn url(&self) -> &Url {
        &self.config.url
    }

    /// Whether requests carry credentials.
    pub fn is_authenticated(&self) -> bool {
        self.config.credentials.is_some()
    }

    /// Resolve a server-relative path against the configured root, keeping
    /// any path prefix the root already has.
    fn resolve(&self, href: &str) -> Url {
        let mut url = self.config.url.clone();
        let path = format!("{}{}", url.path().trim_end_matches('/'), href);
        url.set_path(&path);
        url
    }

    async fn send<B: Serialize>(
        &self,
        method: Method,
        href: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<Response, KapacitorError> {
        let url = self.resolve(href);
        debug!(%method, %url, "Sending Kapacitor request");

        let mut request = self.http_client.request(method, url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(credentials) = &self.config.credentials {
            request = credentials.apply(request);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        check_response(href, response).await
    }

    async fn send_json<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        href: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<T, KapacitorError> {
        let response = self.send(method, href, query, body).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(KapacitorError::from)
    }
}

async fn check_response(href: &str, response: Response) -> Result<Response, KapacitorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await?;
    let message = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => body.error,
        Err(_) => text,
    };

    if status == reqwest::StatusCode::NOT_FOUND {
        let message = if message.is_empty() {
            href.to_string()
        } else {
            message
        };
        return Err(KapacitorError::NotFound(message));
    }

    Err(KapacitorError::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait::async_trait]
impl KapacitorApi for HttpClient {
    async fn ping(&self) -> Result<String, KapacitorError> {
        let href = format!("{}/ping", BASE_PATH);
        let response = self.send(Method::GET, &href, &[], None::<&()>).await?;
        let version = response
            .headers()
            .get(VERSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        Ok(version)
    }

    async fn create_task(&self, opts: CreateTaskOptions) -> Result<Task, KapacitorError> {
        let href = format!("{}/tasks", BASE_PATH);
        self.send_json(Method::POST, &href, &[], Some(&opts)).await
    }

    async fn task(&self, link: &Link, opts: &TaskOptions) -> Result<Task, KapacitorError> {
        let query = [("script-format", opts.script_format.as_str())];
        self.send_json(Method::GET, &link.href, &query, None::<&()>)
            .await
    }

    async fn update_task(
        &self,
        link: &Link,
        opts: UpdateTaskOptions,
    ) -> Result<Task, KapacitorError> {
        self.send_json(Method::PATCH, &link.href, &[], Some(&opts))
            .await
    }

    async fn delete_task(&self, link: &Link) -> Result<(), KapacitorError> {
        self.send(Method::DELETE, &link.href, &[], None::<&()>)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::{Path, Query},
        http::{HeaderMap, StatusCode},
        routing::get,
        Json, Router,
    };
    use serde_json::{json, Value};
    use std::collections::HashMap;

    async fn spawn_server(router: Router) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Url::parse(&format!("http://{}", addr)).unwrap()
    }

    fn task_json(id: &str, status: &str) -> Value {
        json!({
            "link": {"rel": "self", "href": format!("/kapacitor/v1/tasks/{}", id)},
            "id": id,
            "type": "stream",
            "dbrps": [{"db": "telegraf", "rp": "autogen"}],
            "script": "stream\n    |from()",
            "status": status,
            "executing": status == "enabled",
            "error": ""
        })
    }

    #[test]
    fn test_task_link() {
        let link = Link::task("cpu_alert");
        assert_eq!(link.rel, "self");
        assert_eq!(link.href, "/kapacitor/v1/tasks/cpu_alert");
    }

    #[test]
    fn test_create_options_serialization() {
        let opts = CreateTaskOptions {
            id: String::new(),
            task_type: TaskType::Batch,
            dbrps: vec![Dbrp {
                database: "telegraf".to_string(),
                retention_policy: "autogen".to_string(),
            }],
            tick_script: "batch".to_string(),
            status: TaskStatus::Disabled,
        };
        let value = serde_json::to_value(&opts).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "batch",
                "dbrps": [{"db": "telegraf", "rp": "autogen"}],
                "script": "batch",
                "status": "disabled"
            })
        );
    }

    #[test]
    fn test_update_options_serialization() {
        let opts = UpdateTaskOptions {
            status: Some(TaskStatus::Disabled),
        };
        assert_eq!(
            serde_json::to_value(&opts).unwrap(),
            json!({"status": "disabled"})
        );
        assert!(UpdateTaskOptions::default().is_empty());
        assert_eq!(
            serde_json::to_value(UpdateTaskOptions::default()).unwrap(),
            json!({})
        );
    }

    #[test]
    fn test_unknown_task_type_deserializes() {
        let mut value = task_json("x", "enabled");
        value["type"] = json!("invalid");
        let task: Task = serde_json::from_value(value).unwrap();
        assert_eq!(task.task_type, TaskType::Unknown);
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::user("admin", "hunter2");
        let printed = format!("{:?}", creds);
        assert!(printed.contains("admin"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn test_resolve_keeps_prefix() {
        let config = ClientConfig::new(Url::parse("http://kapacitor.local:9092/proxy/").unwrap());
        let client = HttpClient::new(config).unwrap();
        assert_eq!(
            client.resolve("/kapacitor/v1/ping").as_str(),
            "http://kapacitor.local:9092/proxy/kapacitor/v1/ping"
        );
    }

    #[tokio::test]
    async fn test_ping_returns_version() {
        let router = Router::new().route(
            "/kapacitor/v1/ping",
            get(|| async { (StatusCode::NO_CONTENT, [("x-kapacitor-version", "1.7.1")]) }),
        );
        let url = spawn_server(router).await;
        let client = HttpClient::new(ClientConfig::new(url.clone())).unwrap();
        assert_eq!(client.url(), &url);

        assert_eq!(client.ping().await.unwrap(), "1.7.1");
    }

    #[tokio::test]
    async fn test_ping_sends_basic_auth() {
        let router = Router::new().route(
            "/kapacitor/v1/ping",
            get(|headers: HeaderMap| async move {
                match headers.get("authorization").and_then(|v| v.to_str().ok()) {
                    Some("Basic dXNlcjpzZWNyZXQ=") => StatusCode::NO_CONTENT,
                    _ => StatusCode::UNAUTHORIZED,
                }
            }),
        );
        let url = spawn_server(router).await;

        let anonymous = HttpClient::new(ClientConfig::new(url.clone())).unwrap();
        assert!(!anonymous.is_authenticated());
        let err = anonymous.ping().await.unwrap_err();
        assert!(matches!(err, KapacitorError::Api { status: 401, .. }));

        let config = ClientConfig::new(url).with_credentials(Credentials::user("user", "secret"));
        let client = HttpClient::new(config).unwrap();
        assert!(client.is_authenticated());
        client.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_task_lifecycle_requests() {
        let router = Router::new()
            .route(
                "/kapacitor/v1/tasks",
                axum::routing::post(|Json(body): Json<Value>| async move {
                    let id = body["id"].as_str().unwrap_or("generated").to_string();
                    Json(task_json(&id, body["status"].as_str().unwrap()))
                }),
            )
            .route(
                "/kapacitor/v1/tasks/{id}",
                get(
                    |Path(id): Path<String>, Query(query): Query<HashMap<String, String>>| async move {
                        assert_eq!(query.get("script-format").map(String::as_str), Some("raw"));
                        Json(task_json(&id, "enabled"))
                    },
                )
                .patch(|Path(id): Path<String>, Json(body): Json<Value>| async move {
                    Json(task_json(&id, body["status"].as_str().unwrap()))
                })
                .delete(|| async { StatusCode::NO_CONTENT }),
            );
        let url = spawn_server(router).await;
        let client = HttpClient::new(ClientConfig::new(url)).unwrap();

        let created = client
            .create_task(CreateTaskOptions {
                id: String::new(),
                task_type: TaskType::Stream,
                dbrps: vec![Dbrp {
                    database: "telegraf".to_string(),
                    retention_policy: "autogen".to_string(),
                }],
                tick_script: "stream\n    |from()".to_string(),
                status: TaskStatus::Enabled,
            })
            .await
            .unwrap();
        assert_eq!(created.id, "generated");
        assert_eq!(created.status, TaskStatus::Enabled);

        let link = client.task_link(&created.id);
        let fetched = client.task(&link, &TaskOptions::raw()).await.unwrap();
        assert_eq!(fetched.tick_script, "stream\n    |from()");
        assert_eq!(fetched.dbrps.len(), 1);

        let patched = client
            .update_task(
                &link,
                UpdateTaskOptions {
                    status: Some(TaskStatus::Disabled),
                },
            )
            .await
            .unwrap();
        assert_eq!(patched.status, TaskStatus::Disabled);

        client.delete_task(&link).await.unwrap();
    }

    #[tokio::test]
    async fn test_error_responses() {
        let router = Router::new()
            .route(
                "/kapacitor/v1/tasks/{id}",
                get(|| async {
                    (
                        StatusCode::NOT_FOUND,
                        Json(json!({"error": "no task exists"})),
                    )
                }),
            )
            .route(
                "/kapacitor/v1/tasks",
                axum::routing::post(|| async {
                    (
                        StatusCode::BAD_REQUEST,
                        Json(json!({"error": "invalid TICKscript"})),
                    )
                }),
            );
        let url = spawn_server(router).await;
        let client = HttpClient::new(ClientConfig::new(url)).unwrap();

        let err = client
            .task(&Link::task("missing"), &TaskOptions::raw())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "not found: no task exists");

        let err = client
            .create_task(CreateTaskOptions {
                id: "bad".to_string(),
                task_type: TaskType::Stream,
                dbrps: vec![],
                tick_script: "nonsense".to_string(),
                status: TaskStatus::Enabled,
            })
            .await
            .unwrap_err();
        match err {
            KapacitorError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "invalid TICKscript");
            },
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
