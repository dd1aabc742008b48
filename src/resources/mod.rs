//! Managed resources.
//!
//! Each resource module exposes its type name, schema, and the lifecycle
//! functions [`crate::AtlasProvider`] dispatches to. Handlers receive a
//! [`ResourceContext`] carrying the configured API client and the
//! cancellation and timing settings for long-running operations.

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::client::AtlasApi;
use crate::error::ProviderError;
use crate::retry::{Clock, RetryPolicy};
use crate::state_id::StateId;

pub mod ip_access_list;
pub mod team;

/// Everything a lifecycle handler needs besides its payload.
#[derive(Clone, Copy)]
pub struct ResourceContext<'a> {
    /// The Atlas API.
    pub api: &'a dyn AtlasApi,
    /// Time source for retry loops.
    pub clock: &'a dyn Clock,
    /// Fired when the provider is stopped.
    pub cancel: &'a CancellationToken,
    /// Budget and backoff for team deletion.
    pub delete_policy: RetryPolicy,
}

/// Decode the composite `id` attribute of a resource state.
pub(crate) fn state_id_of(state: &Value) -> Result<StateId, ProviderError> {
    state
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(StateId::decode)
        .ok_or_else(|| ProviderError::InvalidRequest("resource state has no id".to_string()))
}
