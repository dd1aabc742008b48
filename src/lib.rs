//! Atlas Provider
//!
//! An infrastructure provider for MongoDB Atlas teams and project IP access
//! lists. It implements the [`ProviderService`] lifecycle (validate, plan,
//! create, read, update, delete, import) over the Atlas Admin API.
//!
//! # Overview
//!
//! - **`atlas_team`**: a team within an organization and its members, keyed by
//!   username. Membership changes are applied by replacing the member list.
//!   Deleting a team that is still assigned to a project unassigns it and
//!   retries until the team is gone or the delete timeout runs out.
//! - **`atlas_project_ip_access_list`**: one entry of a project's access list,
//!   named by exactly one of an IP address, a CIDR block or an AWS security
//!   group. Also available as a data source for lookups.
//! - **State IDs**: resources store a composite ID that encodes the keys
//!   needed to find them again (see [`state_id`]).
//! - **Testing**: [`client::FakeAtlas`] is an in-memory backend, and
//!   [`testing`] drives providers in-process or against a live organization.
//!
//! # Quick Start
//!
//! ```no_run
//! use atlas_provider::{AtlasProvider, ProviderService};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), atlas_provider::ProviderError> {
//! atlas_provider::init_logging();
//!
//! let provider = AtlasProvider::new();
//! provider.configure(json!({"access_token": "..."})).await?;
//!
//! let state = provider
//!     .create(
//!         "atlas_team",
//!         json!({"org_id": "5f1a...", "name": "eng", "usernames": ["alice@example.com"]}),
//!     )
//!     .await?;
//! println!("created team {}", state["team_id"]);
//! # Ok(())
//! # }
//! ```
//!
//! # Read convention
//!
//! `read` returns [`serde_json::Value::Null`] when the remote object no longer
//! exists, so the caller can drop it from state and plan a re-create.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod data_sources;
pub mod error;
pub mod logging;
pub mod membership;
pub mod provider;
pub mod resources;
pub mod retry;
pub mod schema;
pub mod service;
pub mod state_id;
pub mod testing;
pub mod types;
pub mod validation;

// Re-export main types at crate root
pub use config::ProviderConfig;
pub use error::{ApiError, ProviderError};
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::AtlasProvider;
pub use schema::ProviderSchema;
pub use service::ProviderService;
pub use state_id::StateId;
pub use types::{AttributeChange, ImportedResource, PlanResult, ProviderMetadata};
pub use validation::{is_valid, validate, validate_result};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tracing;
