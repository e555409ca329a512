//! The `kapacitor_task` resource.
//!
//! [`TaskResource`] maps between [`TaskState`], the attribute bag the caller
//! stores, and the Kapacitor task API.
//!
//! Reading a task back only reports the first DBRP pair the server returns.
//! That pair is exposed through the computed `database` and
//! `retention_policy` attributes. The configured `dbrp` set is kept on
//! refresh as long as it still contains the reported pair, see
//! [`TaskState::with_known_dbrp`].

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use crate::client::{CreateTaskOptions, Dbrp, TaskOptions, TaskStatus, TaskType, UpdateTaskOptions};
use crate::connection::Connection;
use crate::error::ProviderError;
use crate::schema::{Attribute, Block, NestedBlock, Schema};

/// Retention policy used when a DBRP block does not name one.
pub const DEFAULT_RETENTION_POLICY: &str = "autogen";

fn default_retention_policy() -> String {
    DEFAULT_RETENTION_POLICY.to_string()
}

fn default_enabled() -> bool {
    true
}

/// A database and retention policy a task reads from.
///
/// Ordering and equality are structural over both fields, so a
/// `BTreeSet<DbrpPair>` holds each pair once regardless of insertion order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DbrpPair {
    /// Database name.
    pub database: String,
    /// Retention policy name.
    #[serde(default = "default_retention_policy")]
    pub retention_policy: String,
}

impl DbrpPair {
    /// Create a pair.
    pub fn new(database: impl Into<String>, retention_policy: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            retention_policy: retention_policy.into(),
        }
    }

    /// A pair on the default retention policy.
    pub fn with_default_policy(database: impl Into<String>) -> Self {
        Self::new(database, DEFAULT_RETENTION_POLICY)
    }

    /// Stable identity of the pair: the first four bytes of the SHA-256 of
    /// `"<database>.<retention_policy>"`, read big-endian.
    ///
    /// The values are not CRC32 checksums and do not match hashes computed by
    /// other Kapacitor tooling; only stability and equality matter here.
    pub fn hash_code(&self) -> i64 {
        let key = format!("{}.{}", self.database, self.retention_policy);
        let digest = Sha256::digest(key.as_bytes());
        i64::from(u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]))
    }
}

impl From<&DbrpPair> for Dbrp {
    fn from(pair: &DbrpPair) -> Self {
        Self {
            database: pair.database.clone(),
            retention_policy: pair.retention_policy.clone(),
        }
    }
}

impl From<&Dbrp> for DbrpPair {
    fn from(dbrp: &Dbrp) -> Self {
        Self::new(dbrp.database.clone(), dbrp.retention_policy.clone())
    }
}

/// State of a `kapacitor_task` resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    /// Resource identifier; equal to the task ID once created.
    #[serde(default)]
    pub id: Option<String>,
    /// Task ID. Generated by the server when unset.
    #[serde(default)]
    pub name: Option<String>,
    /// `stream` or `batch`.
    #[serde(rename = "type")]
    pub task_type: String,
    /// TICKscript body.
    pub tick_script: String,
    /// Databases and retention policies.
    pub dbrp: BTreeSet<DbrpPair>,
    /// Whether the task runs.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Database of the first DBRP Kapacitor reports.
    #[serde(default)]
    pub database: Option<String>,
    /// Retention policy of the first DBRP Kapacitor reports.
    #[serde(default)]
    pub retention_policy: Option<String>,
}

impl TaskState {
    /// A new, not yet created task.
    pub fn new(
        task_type: impl Into<String>,
        tick_script: impl Into<String>,
        dbrp: impl IntoIterator<Item = DbrpPair>,
    ) -> Self {
        Self {
            id: None,
            name: None,
            task_type: task_type.into(),
            tick_script: tick_script.into(),
            dbrp: dbrp.into_iter().collect(),
            enabled: true,
            database: None,
            retention_policy: None,
        }
    }

    /// Request a specific task ID.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the enabled flag.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Record `pair` as the first DBRP Kapacitor reports.
    pub fn with_reported_dbrp(mut self, pair: Option<&Dbrp>) -> Self {
        self.database = pair.map(|p| p.database.clone());
        self.retention_policy = pair.map(|p| p.retention_policy.clone());
        self
    }

    /// Replace the read-back `dbrp` with `known` when `known` still contains
    /// every pair the server reported. A task whose reported pair left the
    /// known set keeps the server's view.
    pub fn with_known_dbrp(mut self, known: BTreeSet<DbrpPair>) -> Self {
        if !self.dbrp.is_empty() && self.dbrp.is_subset(&known) {
            self.dbrp = known;
        }
        self
    }
}

/// Parse the `type` attribute.
pub fn parse_task_type(value: &str) -> Result<TaskType, ProviderError> {
    match value {
        "stream" => Ok(TaskType::Stream),
        "batch" => Ok(TaskType::Batch),
        _ => Err(ProviderError::unknown_task_type()),
    }
}

/// Render a server task type as the `type` attribute.
pub fn task_type_name(task_type: TaskType) -> Result<&'static str, ProviderError> {
    match task_type {
        TaskType::Stream => Ok("stream"),
        TaskType::Batch => Ok("batch"),
        TaskType::Unknown => Err(ProviderError::unknown_task_type()),
    }
}

/// Lifecycle operations of a managed resource.
#[async_trait::async_trait]
pub trait Resource: Send + Sync {
    /// Attribute bag stored by the caller.
    type State;

    /// Type name, e.g. `kapacitor_task`.
    fn type_name(&self) -> &'static str;

    /// Schema of the resource's attributes.
    fn schema(&self) -> Schema;

    /// Create the remote object described by `planned`.
    async fn create(
        &self,
        conn: &Connection,
        planned: Self::State,
    ) -> Result<Self::State, ProviderError>;

    /// Fetch the remote object. `None` means it no longer exists.
    async fn read(&self, conn: &Connection, id: &str)
        -> Result<Option<Self::State>, ProviderError>;

    /// Apply in-place changes from `prior` to `planned`.
    async fn update(
        &self,
        conn: &Connection,
        id: &str,
        prior: &Self::State,
        planned: Self::State,
    ) -> Result<Self::State, ProviderError>;

    /// Delete the remote object.
    async fn delete(&self, conn: &Connection, id: &str) -> Result<(), ProviderError>;
}

/// The `kapacitor_task` resource.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskResource;

impl TaskResource {
    /// Resource type name.
    pub const TYPE_NAME: &'static str = "kapacitor_task";
}

#[async_trait::async_trait]
impl Resource for TaskResource {
    type State = TaskState;

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "name",
                Attribute::optional_computed_string()
                    .with_description("Task ID; generated by Kapacitor when omitted")
                    .with_force_new(),
            )
            .with_attribute(
                "type",
                Attribute::required_string()
                    .with_one_of(["stream", "batch"])
                    .with_force_new(),
            )
            .with_attribute(
                "tick_script",
                Attribute::required_string()
                    .with_description("TICKscript body")
                    .with_force_new(),
            )
            .with_attribute(
                "enabled",
                Attribute::optional_bool().with_default(serde_json::json!(true)),
            )
            .with_attribute(
                "database",
                Attribute::computed_string()
                    .with_description("Database of the first DBRP reported by Kapacitor"),
            )
            .with_attribute(
                "retention_policy",
                Attribute::computed_string()
                    .with_description("Retention policy of the first DBRP reported by Kapacitor"),
            )
            .with_block(
                "dbrp",
                NestedBlock::set(
                    Block::new()
                        .with_description("Database and retention policy the task reads from")
                        .with_attribute("database", Attribute::required_string().with_force_new())
                        .with_attribute(
                            "retention_policy",
                            Attribute::optional_string()
                                .with_default(serde_json::json!(DEFAULT_RETENTION_POLICY))
                                .with_force_new(),
                        ),
                )
                .with_min_items(1)
                .with_force_new(),
            )
    }

    #[instrument(skip(self, conn, planned), fields(name = ?planned.name))]
    async fn create(&self, conn: &Connection, planned: TaskState) -> Result<TaskState, ProviderError> {
        let task_type = parse_task_type(&planned.task_type)?;

        let opts = CreateTaskOptions {
            id: planned.name.clone().unwrap_or_default(),
            task_type,
            dbrps: planned.dbrp.iter().map(Dbrp::from).collect(),
            tick_script: planned.tick_script.clone(),
            status: TaskStatus::from(planned.enabled),
        };

        let task = conn.client().create_task(opts).await?;
        info!(id = %task.id, "Created task");

        Ok(TaskState {
            id: Some(task.id.clone()),
            name: Some(task.id.clone()),
            ..planned
        }
        .with_reported_dbrp(task.dbrps.first()))
    }

    #[instrument(skip(self, conn))]
    async fn read(&self, conn: &Connection, id: &str) -> Result<Option<TaskState>, ProviderError> {
        let client = conn.client();
        let link = client.task_link(id);

        let task = match client.task(&link, &TaskOptions::raw()).await {
            Ok(task) => task,
            Err(e) if e.is_not_found() => {
                warn!(id, "Task no longer exists");
                return Ok(None);
            },
            Err(e) => return Err(e.into()),
        };

        let task_type = task_type_name(task.task_type)?;
        if task.dbrps.len() > 1 {
            debug!(id, count = task.dbrps.len(), "Only the first DBRP is read back");
        }

        Ok(Some(TaskState {
            id: Some(id.to_string()),
            name: Some(id.to_string()),
            task_type: task_type.to_string(),
            tick_script: task.tick_script,
            dbrp: task.dbrps.first().map(DbrpPair::from).into_iter().collect(),
            enabled: task.status == TaskStatus::Enabled,
            database: None,
            retention_policy: None,
        }
        .with_reported_dbrp(task.dbrps.first())))
    }

    #[instrument(skip(self, conn, prior, planned))]
    async fn update(
        &self,
        conn: &Connection,
        id: &str,
        prior: &TaskState,
        planned: TaskState,
    ) -> Result<TaskState, ProviderError> {
        let mut opts = UpdateTaskOptions::default();
        if prior.enabled != planned.enabled {
            opts.status = Some(TaskStatus::from(planned.enabled));
        }

        if opts.is_empty() {
            debug!(id, "Nothing to update");
        } else {
            let client = conn.client();
            client.update_task(&client.task_link(id), opts).await?;
            info!(id, enabled = planned.enabled, "Updated task status");
        }

        Ok(TaskState {
            id: Some(id.to_string()),
            name: planned.name.or_else(|| prior.name.clone()),
            ..planned
        })
    }

    #[instrument(skip(self, conn))]
    async fn delete(&self, conn: &Connection, id: &str) -> Result<(), ProviderError> {
        let client = conn.client();
        client.delete_task(&client.task_link(id)).await?;
        info!(id, "Deleted task");
        Ok(())
    }
}
