//! Kapacitor Provider
//!
//! An infrastructure provider that manages [Kapacitor](https://docs.influxdata.com/kapacitor/)
//! tasks declaratively. A host configures the provider with a server URL and
//! optional credentials, then drives each `kapacitor_task` through the usual
//! plan / create / read / update / delete lifecycle.
//!
//! # Overview
//!
//! - **Client**: a typed client for the Kapacitor v1 HTTP API ([`client`])
//! - **Configuration**: URL and basic-auth credentials with environment fallbacks ([`config`])
//! - **Connection**: the verified client shared by every resource operation ([`connection`])
//! - **Resources**: mapping between task state and API calls ([`resource`])
//! - **ProviderService trait**: the lifecycle surface a host drives ([`service`])
//! - **Validation**: schema-driven configuration checks ([`validation`])
//! - **Testing**: an in-memory Kapacitor and a lifecycle harness ([`testing`])
//!
//! # Quick Start
//!
//! ```ignore
//! use kapacitor_provider::{KapacitorProvider, ProviderService};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     kapacitor_provider::init_logging();
//!
//!     let provider = KapacitorProvider::new();
//!     provider
//!         .configure(json!({"url": "http://localhost:9092", "username": "admin"}))
//!         .await?;
//!
//!     let plan = provider
//!         .plan("kapacitor_task", None, json!({
//!             "name": "cpu_alert",
//!             "type": "stream",
//!             "tick_script": "stream\n    |from()\n        .measurement('cpu')",
//!             "dbrp": [{"database": "telegraf", "retention_policy": "autogen"}]
//!         }))
//!         .await?;
//!     let state = provider.create("kapacitor_task", plan.planned_state).await?;
//!     tracing::info!(id = %state["id"], "task created");
//!     Ok(())
//! }
//! ```
//!
//! # Task Resource
//!
//! | Attribute     | Kind                         | Notes                                  |
//! |---------------|------------------------------|----------------------------------------|
//! | `id`          | computed                     | task ID assigned or echoed by the server |
//! | `name`        | optional, computed, replaces | requested task ID                      |
//! | `type`        | required, replaces           | `stream` or `batch`                    |
//! | `tick_script` | required, replaces           | TICKscript body                        |
//! | `enabled`     | optional, default `true`     | the only in-place change               |
//! | `dbrp`        | set, at least one, replaces  | `database` + `retention_policy` (`autogen`) |

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod provider;
pub mod resource;
pub mod schema;
pub mod service;
pub mod testing;
pub mod types;
pub mod validation;

// Re-export main types at crate root
pub use client::{HttpClient, KapacitorApi};
pub use config::ProviderConfig;
pub use connection::Connection;
pub use error::{KapacitorError, ProviderError};
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::KapacitorProvider;
pub use resource::{DbrpPair, Resource, TaskResource, TaskState};
pub use schema::ProviderSchema;
pub use service::ProviderService;
pub use types::{AttributeChange, ImportedResource, PlanResult, ProviderMetadata};
pub use validation::{is_valid, validate, validate_result};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tracing;
