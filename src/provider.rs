//! The Kapacitor provider.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ProviderConfig;
use crate::connection::{http_client_factory, ClientFactory, Connection};
use crate::error::ProviderError;
use crate::resource::{DbrpPair, Resource, TaskResource, TaskState};
use crate::schema::{Diagnostic, ProviderSchema, Schema};
use crate::service::ProviderService;
use crate::types::{AttributeChange, ImportedResource, PlanResult};
use crate::validation::validate;

/// Provider managing `kapacitor_task` resources.
///
/// The connection is established once by [`ProviderService::configure`] and
/// shared by every later call.
pub struct KapacitorProvider {
    factory: Box<ClientFactory>,
    connection: OnceLock<Connection>,
    task: TaskResource,
}

impl KapacitorProvider {
    /// Provider talking HTTP to Kapacitor.
    pub fn new() -> Self {
        Self::with_client_factory(http_client_factory())
    }

    /// Provider building its client with `factory`.
    pub fn with_client_factory(factory: Box<ClientFactory>) -> Self {
        Self {
            factory,
            connection: OnceLock::new(),
            task: TaskResource,
        }
    }

    /// The connection established by `configure`.
    pub fn connection(&self) -> Result<&Connection, ProviderError> {
        self.connection.get().ok_or_else(|| {
            ProviderError::FailedPrecondition("provider has not been configured".to_string())
        })
    }

    fn check_resource_type(&self, resource_type: &str) -> Result<(), ProviderError> {
        if resource_type == self.task.type_name() {
            Ok(())
        } else {
            Err(ProviderError::UnknownResource(resource_type.to_string()))
        }
    }

    fn plan_task(
        &self,
        prior_state: Option<Value>,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        let schema = self.task.schema();
        let prior: Option<TaskState> = prior_state
            .filter(|v| !v.is_null())
            .map(serde_json::from_value)
            .transpose()?;
        let before = prior
            .as_ref()
            .map(|p| attribute_values(&schema, p))
            .transpose()?;

        if proposed_state.is_null() {
            let changes = before
                .unwrap_or_default()
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(path, v)| AttributeChange::removed(path, v))
                .collect();
            return Ok(PlanResult::with_changes(Value::Null, changes, false));
        }

        let mut planned: TaskState = serde_json::from_value(proposed_state)?;
        if let Some(prior) = &prior {
            // `name` is computed when omitted; keep what the server assigned.
            if planned.name.is_none() {
                planned.name = prior.name.clone();
            }
            planned.id = prior.id.clone();
            planned.database = prior.database.clone();
            planned.retention_policy = prior.retention_policy.clone();
        }

        let after = attribute_values(&schema, &planned)?;
        let mut changes = Vec::new();
        let mut requires_replace = false;

        for (path, after_value) in after {
            match before.as_ref().and_then(|b| b.get(&path)) {
                None => {
                    if !after_value.is_null() {
                        changes.push(AttributeChange::added(path, after_value));
                    }
                },
                Some(before_value) if *before_value != after_value => {
                    if schema.forces_new(&path) {
                        requires_replace = true;
                    }
                    changes.push(AttributeChange::modified(
                        path,
                        before_value.clone(),
                        after_value,
                    ));
                },
                Some(_) => {},
            }
        }

        let planned_state = serde_json::to_value(&planned)?;
        if changes.is_empty() {
            return Ok(PlanResult::no_change(planned_state));
        }
        Ok(PlanResult::with_changes(
            planned_state,
            changes,
            requires_replace,
        ))
    }
}

impl Default for KapacitorProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Configurable attributes of `state`, keyed by name.
fn attribute_values(
    schema: &Schema,
    state: &TaskState,
) -> Result<BTreeMap<String, Value>, ProviderError> {
    let mut value = serde_json::to_value(state)?;
    let mut values = BTreeMap::new();
    for name in schema.configurable_names() {
        let v = value.get_mut(&name).map(Value::take).unwrap_or(Value::Null);
        values.insert(name, v);
    }
    Ok(values)
}

/// The `dbrp` set recorded in a resource state, if any.
fn known_dbrp(state: &Value) -> Result<Option<BTreeSet<DbrpPair>>, ProviderError> {
    match state.get("dbrp") {
        Some(v) if !v.is_null() => Ok(Some(serde_json::from_value(v.clone())?)),
        _ => Ok(None),
    }
}

/// Identifier stored in a resource state, falling back to `name`.
fn state_id(state: &Value) -> Result<String, ProviderError> {
    ["id", "name"]
        .iter()
        .filter_map(|key| state.get(*key).and_then(Value::as_str))
        .find(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ProviderError::InvalidRequest("resource state has no id".to_string()))
}

#[async_trait::async_trait]
impl ProviderService for KapacitorProvider {
    fn schema(&self) -> ProviderSchema {
        ProviderSchema::new()
            .with_provider_config(ProviderConfig::schema())
            .with_resource(self.task.type_name(), self.task.schema())
    }

    #[instrument(skip(self, config), name = "provider.validate_provider_config")]
    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let mut diagnostics = validate(&ProviderConfig::schema(), &config);

        let has_username = config.get("username").is_some_and(|v| !v.is_null());
        let has_password = config.get("password").is_some_and(|v| !v.is_null());
        if has_password && !has_username {
            diagnostics.push(
                Diagnostic::warning("password is ignored without a username")
                    .with_attribute("password"),
            );
        }

        debug!(diagnostics = diagnostics.len(), "ValidateProviderConfig completed");
        Ok(diagnostics)
    }

    #[instrument(skip(self, config), name = "provider.configure")]
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        if self.connection.get().is_some() {
            return Err(ProviderError::Configuration(
                "provider is already configured".to_string(),
            ));
        }

        let config = ProviderConfig::from_value(config)?;
        debug!(
            url = %config.url,
            authenticated = config.credentials().is_some(),
            "Configure called"
        );

        let connection = match Connection::open(&config, self.factory.as_ref()).await {
            Ok(connection) => connection,
            Err(e) => {
                error!(error = %e, "Configure failed");
                return Err(e);
            },
        };

        self.connection.set(connection).map_err(|_| {
            ProviderError::Configuration("provider is already configured".to_string())
        })?;
        info!("Configure completed successfully");
        Ok(vec![])
    }

    #[instrument(skip(self, config), name = "provider.validate_resource_config")]
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        self.check_resource_type(resource_type)?;
        let diagnostics = validate(&self.task.schema(), &config);
        if diagnostics.iter().any(Diagnostic::is_error) {
            warn!(
                diagnostics = diagnostics.len(),
                "ValidateResourceConfig completed with errors"
            );
        }
        Ok(diagnostics)
    }

    #[instrument(skip(self, prior_state, proposed_state), name = "provider.plan")]
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.check_resource_type(resource_type)?;
        let plan = self.plan_task(prior_state, proposed_state)?;
        debug!(
            changes = plan.changes.len(),
            requires_replace = plan.requires_replace,
            "Plan completed"
        );
        Ok(plan)
    }

    #[instrument(skip(self, planned_state), name = "provider.create")]
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        self.check_resource_type(resource_type)?;
        let conn = self.connection()?;
        let planned: TaskState = serde_json::from_value(planned_state)?;
        let state = self.task.create(conn, planned).await?;
        Ok(serde_json::to_value(state)?)
    }

    #[instrument(skip(self, current_state), name = "provider.read")]
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        self.check_resource_type(resource_type)?;
        let conn = self.connection()?;
        let id = state_id(&current_state)?;
        let known = known_dbrp(&current_state)?;
        match self.task.read(conn, &id).await? {
            Some(state) => {
                let state = match known {
                    Some(known) => state.with_known_dbrp(known),
                    None => state,
                };
                Ok(serde_json::to_value(state)?)
            },
            None => {
                info!(id = %id, "Resource is gone, clearing state");
                Ok(Value::Null)
            },
        }
    }

    #[instrument(skip(self, prior_state, planned_state), name = "provider.update")]
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.check_resource_type(resource_type)?;
        let conn = self.connection()?;
        let id = state_id(&prior_state)?;
        let prior: TaskState = serde_json::from_value(prior_state)?;
        let planned: TaskState = serde_json::from_value(planned_state)?;
        let state = self.task.update(conn, &id, &prior, planned).await?;
        Ok(serde_json::to_value(state)?)
    }

    #[instrument(skip(self, current_state), name = "provider.delete")]
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        self.check_resource_type(resource_type)?;
        let conn = self.connection()?;
        let id = state_id(&current_state)?;
        self.task.delete(conn, &id).await
    }

    #[instrument(skip(self), name = "provider.import_resource")]
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.check_resource_type(resource_type)?;
        let conn = self.connection()?;
        let state = self
            .task
            .read(conn, id)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("task '{}'", id)))?;
        Ok(vec![ImportedResource::new(
            resource_type,
            serde_json::to_value(state)?,
        )])
    }
}
