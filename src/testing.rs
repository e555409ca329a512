//! Testing utilities for the provider.
//!
//! [`InMemoryKapacitor`] implements [`KapacitorApi`] over a map of tasks and
//! records every call, so tests can assert which requests a lifecycle step
//! issued. [`ProviderTester`] drives a [`ProviderService`] through whole
//! lifecycles.
//!
//! # Example
//!
//! ```ignore
//! use kapacitor_provider::testing::{InMemoryKapacitor, ProviderTester};
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn test_create_task() {
//!     let kapacitor = InMemoryKapacitor::new();
//!     let tester = ProviderTester::new(kapacitor.provider());
//!     tester.configure(json!({"url": "http://localhost:9092"})).await.unwrap();
//!
//!     let state = tester.lifecycle_create("kapacitor_task", json!({
//!         "type": "stream",
//!         "tick_script": "stream\n    |from()",
//!         "dbrp": [{"database": "telegraf"}]
//!     })).await.unwrap();
//!
//!     assert_eq!(state["enabled"], true);
//! }
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

use crate::client::{
    ClientConfig, CreateTaskOptions, KapacitorApi, Link, Task, TaskOptions, TaskStatus,
    UpdateTaskOptions, BASE_PATH,
};
use crate::error::{KapacitorError, ProviderError};
use crate::provider::KapacitorProvider;
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::service::ProviderService;
use crate::types::{ImportedResource, PlanResult};

/// A request received by [`InMemoryKapacitor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `ping`
    Ping,
    /// `create_task` with the requested ID (empty when server-assigned).
    CreateTask {
        /// Requested ID.
        id: String,
    },
    /// `task`
    Task {
        /// Task ID.
        id: String,
        /// Requested script format.
        script_format: String,
    },
    /// `update_task`
    UpdateTask {
        /// Task ID.
        id: String,
        /// Requested status change.
        status: Option<TaskStatus>,
    },
    /// `delete_task`
    DeleteTask {
        /// Task ID.
        id: String,
    },
}

#[derive(Debug, Default)]
struct State {
    tasks: BTreeMap<String, Task>,
    calls: Vec<Call>,
    unreachable: bool,
    next_id: u64,
}

/// In-memory stand-in for a Kapacitor server.
///
/// Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryKapacitor {
    state: Arc<Mutex<State>>,
}

impl InMemoryKapacitor {
    /// Version reported by `ping`.
    pub const VERSION: &'static str = "1.7.0-memory";

    /// An empty server.
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider whose connections all point at this server.
    pub fn provider(&self) -> KapacitorProvider {
        let server = self.clone();
        KapacitorProvider::with_client_factory(Box::new(
            move |_: ClientConfig| -> Result<Box<dyn KapacitorApi>, KapacitorError> {
                Ok(Box::new(server.clone()))
            },
        ))
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make `ping` fail (or succeed again).
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().unreachable = !reachable;
    }

    /// Store a task directly, bypassing the API.
    pub fn insert(&self, task: Task) {
        self.lock().tasks.insert(task.id.clone(), task);
    }

    /// A stored task.
    pub fn get(&self, id: &str) -> Option<Task> {
        self.lock().tasks.get(id).cloned()
    }

    /// Every call received, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Calls other than `ping`, in order.
    pub fn task_calls(&self) -> Vec<Call> {
        self.lock()
            .calls
            .iter()
            .filter(|c| !matches!(c, Call::Ping))
            .cloned()
            .collect()
    }

    /// Number of pings received.
    pub fn ping_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::Ping))
            .count()
    }
}

fn task_id(link: &Link) -> Result<String, KapacitorError> {
    let prefix = format!("{}/tasks/", BASE_PATH);
    link.href
        .strip_prefix(&prefix)
        .map(str::to_string)
        .ok_or_else(|| KapacitorError::NotFound(link.href.clone()))
}

fn no_task(id: &str) -> KapacitorError {
    KapacitorError::NotFound(format!("no task exists with id {}", id))
}

#[async_trait::async_trait]
impl KapacitorApi for InMemoryKapacitor {
    async fn ping(&self) -> Result<String, KapacitorError> {
        let mut state = self.lock();
        state.calls.push(Call::Ping);
        if state.unreachable {
            return Err(KapacitorError::Api {
                status: 503,
                message: "service unavailable".to_string(),
            });
        }
        Ok(Self::VERSION.to_string())
    }

    async fn create_task(&self, opts: CreateTaskOptions) -> Result<Task, KapacitorError> {
        let mut state = self.lock();
        state.calls.push(Call::CreateTask {
            id: opts.id.clone(),
        });

        let id = if opts.id.is_empty() {
            state.next_id += 1;
            format!("task-{}", state.next_id)
        } else {
            opts.id
        };
        if state.tasks.contains_key(&id) {
            return Err(KapacitorError::Api {
                status: 409,
                message: format!("task {} already exists", id),
            });
        }

        let task = Task {
            link: Link::task(&id),
            id: id.clone(),
            task_type: opts.task_type,
            dbrps: opts.dbrps,
            tick_script: opts.tick_script,
            status: opts.status,
            executing: opts.status == TaskStatus::Enabled,
            error: String::new(),
        };
        state.tasks.insert(id, task.clone());
        Ok(task)
    }

    async fn task(&self, link: &Link, opts: &TaskOptions) -> Result<Task, KapacitorError> {
        let id = task_id(link)?;
        let mut state = self.lock();
        state.calls.push(Call::Task {
            id: id.clone(),
            script_format: opts.script_format.clone(),
        });
        state.tasks.get(&id).cloned().ok_or_else(|| no_task(&id))
    }

    async fn update_task(
        &self,
        link: &Link,
        opts: UpdateTaskOptions,
    ) -> Result<Task, KapacitorError> {
        let id = task_id(link)?;
        let mut state = self.lock();
        state.calls.push(Call::UpdateTask {
            id: id.clone(),
            status: opts.status,
        });

        let task = state.tasks.get_mut(&id).ok_or_else(|| no_task(&id))?;
        if let Some(status) = opts.status {
            task.status = status;
            task.executing = status == TaskStatus::Enabled;
        }
        Ok(task.clone())
    }

    async fn delete_task(&self, link: &Link) -> Result<(), KapacitorError> {
        let id = task_id(link)?;
        let mut state = self.lock();
        state.calls.push(Call::DeleteTask { id: id.clone() });
        state.tasks.remove(&id).map(|_| ()).ok_or_else(|| no_task(&id))
    }
}

/// A test harness for provider implementations.
///
/// This wraps a `ProviderService` implementation and provides
/// simplified methods for testing lifecycles end to end.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a new tester for the given provider.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Get a reference to the underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Get the provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Get the list of resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate provider configuration.
    ///
    /// Returns `Err` with the diagnostics if there are errors.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Configure the provider.
    ///
    /// Returns `Err` with the diagnostics if there are errors.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource configuration.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a resource creation (no prior state).
    pub async fn plan_create(
        &self,
        resource_type: &str,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider.plan(resource_type, None, proposed_state).await
    }

    /// Plan a resource update.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), proposed_state)
            .await
    }

    /// Plan a resource deletion.
    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), Value::Null)
            .await
    }

    /// Create a new resource.
    pub async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    /// Read the current state of a resource.
    pub async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.read(resource_type, current_state).await
    }

    /// Update an existing resource.
    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    /// Delete a resource.
    pub async fn delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    /// Import an existing resource.
    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    // =========================================================================
    // Lifecycle Helpers
    // =========================================================================

    /// Run a full create lifecycle: plan → create → read.
    ///
    /// Returns the final state after read.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan_result = self.plan_create(resource_type, config).await?;
        let created_state = self
            .create(resource_type, plan_result.planned_state)
            .await?;
        self.read(resource_type, created_state).await
    }

    /// Run a full update lifecycle: plan → update → read.
    ///
    /// Returns the final state after read.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<Value, ProviderError> {
        let plan_result = self
            .plan_update(resource_type, prior_state.clone(), proposed_state)
            .await?;
        if plan_result.requires_replace {
            return Err(ProviderError::InvalidRequest(
                "plan requires replacement, not an in-place update".to_string(),
            ));
        }
        let updated_state = self
            .update(resource_type, prior_state, plan_result.planned_state)
            .await?;
        self.read(resource_type, updated_state).await
    }

    /// Run a full delete lifecycle: plan → delete.
    pub async fn lifecycle_delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        let _ = self
            .plan_delete(resource_type, current_state.clone())
            .await?;
        self.delete(resource_type, current_state).await
    }
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The operation failed with diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation failed with a provider error.
    Provider(ProviderError),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  [{:?}] {}", diag.severity, diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            },
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

/// Check diagnostics and return an error if there are any errors.
fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics
        .into_iter()
        .filter(|d| matches!(d.severity, DiagnosticSeverity::Error))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Assert that a plan result indicates the resource will be created.
///
/// # Panics
///
/// Panics if the plan has no changes or requires replacement.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(
        !plan.changes.is_empty(),
        "Expected plan to have changes for create, but got no changes"
    );
    assert!(
        !plan.requires_replace,
        "Expected plan to create, not replace"
    );
}

/// Assert that a plan result indicates no changes.
///
/// # Panics
///
/// Panics if the plan has any changes.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "Expected no changes, but got {} change(s): {:?}",
        plan.changes.len(),
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan requires resource replacement.
///
/// # Panics
///
/// Panics if the plan does not require replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "Expected plan to require replacement, but it does not"
    );
}

/// Assert that a plan does not require resource replacement.
///
/// # Panics
///
/// Panics if the plan requires replacement.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(
        !plan.requires_replace,
        "Expected plan to update in place, but it requires replacement"
    );
}

/// Assert that a plan has a change for a specific attribute path.
///
/// # Panics
///
/// Panics if the plan does not have a change for the given path.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    let has_change = plan.changes.iter().any(|c| c.path == path);
    assert!(
        has_change,
        "Expected plan to change attribute '{}', but it was not changed. Changed attributes: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan does not have a change for a specific attribute path.
///
/// # Panics
///
/// Panics if the plan has a change for the given path.
pub fn assert_plan_does_not_change_attribute(plan: &PlanResult, path: &str) {
    let has_change = plan.changes.iter().any(|c| c.path == path);
    assert!(
        !has_change,
        "Expected plan to not change attribute '{}', but it was changed",
        path
    );
}

/// Assert that diagnostics contain no errors.
///
/// # Panics
///
/// Panics if there are any error diagnostics.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<_> = diagnostics.iter().filter(|d| d.is_error()).collect();

    assert!(
        errors.is_empty(),
        "Expected no errors, but got {} error(s): {:?}",
        errors.len(),
        errors.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain at least one error.
///
/// # Panics
///
/// Panics if there are no error diagnostics.
pub fn assert_has_errors(diagnostics: &[Diagnostic]) {
    assert!(
        diagnostics.iter().any(Diagnostic::is_error),
        "Expected at least one error, but got none"
    );
}

/// Assert that diagnostics contain an error whose summary contains the given substring.
///
/// # Panics
///
/// Panics if no error diagnostic contains the given substring.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let has_matching_error = diagnostics
        .iter()
        .any(|d| d.is_error() && d.summary.contains(substring));

    assert!(
        has_matching_error,
        "Expected an error containing '{}', but got: {:?}",
        substring,
        diagnostics.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}
