//! The Atlas provider.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::client::{AtlasApi, AtlasClient};
use crate::config::ProviderConfig;
use crate::data_sources;
use crate::error::ProviderError;
use crate::resources::{ip_access_list, team, ResourceContext};
use crate::retry::{Clock, RetryPolicy, TokioClock};
use crate::schema::{has_errors, Diagnostic, ProviderSchema};
use crate::service::ProviderService;
use crate::types::{ImportedResource, PlanResult};
use crate::validation;

/// Serves `atlas_team` and `atlas_project_ip_access_list`.
///
/// A provider built with [`AtlasProvider::new`] talks to the Atlas Admin API
/// once [`ProviderService::configure`] has supplied credentials. Tests inject
/// a client with [`AtlasProvider::with_client`] instead.
pub struct AtlasProvider {
    api: RwLock<Option<Arc<dyn AtlasApi>>>,
    delete_policy: RwLock<RetryPolicy>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl Default for AtlasProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl AtlasProvider {
    /// An unconfigured provider.
    pub fn new() -> Self {
        Self {
            api: RwLock::new(None),
            delete_policy: RwLock::new(RetryPolicy::default()),
            clock: Arc::new(TokioClock),
            cancel: CancellationToken::new(),
        }
    }

    /// A provider that is already configured with `api`.
    pub fn with_client(api: Arc<dyn AtlasApi>) -> Self {
        Self {
            api: RwLock::new(Some(api)),
            ..Self::new()
        }
    }

    /// Replace the time source used by retry loops.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the team delete retry policy.
    pub fn with_delete_policy(self, policy: RetryPolicy) -> Self {
        Self {
            delete_policy: RwLock::new(policy),
            ..self
        }
    }

    /// Token that [`ProviderService::stop`] cancels.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    async fn api(&self) -> Result<Arc<dyn AtlasApi>, ProviderError> {
        self.api.read().await.clone().ok_or_else(|| {
            ProviderError::FailedPrecondition("provider has not been configured".to_string())
        })
    }

    fn context<'a>(&'a self, api: &'a dyn AtlasApi, delete_policy: RetryPolicy) -> ResourceContext<'a> {
        ResourceContext {
            api,
            clock: self.clock.as_ref(),
            cancel: &self.cancel,
            delete_policy,
        }
    }
}

fn unknown_resource(resource_type: &str) -> ProviderError {
    ProviderError::UnknownResource(resource_type.to_string())
}

fn unknown_data_source(data_source_type: &str) -> ProviderError {
    ProviderError::UnknownResource(format!("data source {}", data_source_type))
}

#[async_trait::async_trait]
impl ProviderService for AtlasProvider {
    fn schema(&self) -> ProviderSchema {
        ProviderSchema::new()
            .with_provider_config(ProviderConfig::schema())
            .with_resource(team::TYPE_NAME, team::schema())
            .with_resource(ip_access_list::TYPE_NAME, ip_access_list::schema())
            .with_data_source(
                data_sources::ip_access_list::TYPE_NAME,
                data_sources::ip_access_list::schema(),
            )
    }

    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(validation::validate(&ProviderConfig::schema(), &config))
    }

    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let config = ProviderConfig::from_value(config)?;
        let diagnostics = config.diagnostics();
        if has_errors(&diagnostics) {
            return Ok(diagnostics);
        }

        let token = config.access_token.clone().unwrap_or_default();
        let client = AtlasClient::new(config.base_url(), token, config.request_timeout())
            .map_err(|e| ProviderError::Configuration(format!("invalid Atlas API settings: {}", e)))?;

        *self.api.write().await = Some(Arc::new(client));
        self.delete_policy.write().await.timeout = config.delete_timeout();
        info!(base_url = %config.base_url(), "Configured Atlas provider");
        Ok(diagnostics)
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        info!("Stopping Atlas provider");
        self.cancel.cancel();
        Ok(())
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        match resource_type {
            team::TYPE_NAME => Ok(team::validate(&config)),
            ip_access_list::TYPE_NAME => Ok(ip_access_list::validate(&config)),
            other => Err(unknown_resource(other)),
        }
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        match resource_type {
            team::TYPE_NAME => team::plan(prior_state, proposed_state),
            ip_access_list::TYPE_NAME => ip_access_list::plan(prior_state, proposed_state),
            other => Err(unknown_resource(other)),
        }
    }

    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        let api = self.api().await?;
        let ctx = self.context(api.as_ref(), *self.delete_policy.read().await);
        match resource_type {
            team::TYPE_NAME => team::create(ctx, planned_state).await,
            ip_access_list::TYPE_NAME => ip_access_list::create(ctx, planned_state).await,
            other => Err(unknown_resource(other)),
        }
    }

    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        let api = self.api().await?;
        let ctx = self.context(api.as_ref(), *self.delete_policy.read().await);
        match resource_type {
            team::TYPE_NAME => team::read(ctx, current_state).await,
            ip_access_list::TYPE_NAME => ip_access_list::read(ctx, current_state).await,
            other => Err(unknown_resource(other)),
        }
    }

    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let api = self.api().await?;
        let ctx = self.context(api.as_ref(), *self.delete_policy.read().await);
        match resource_type {
            team::TYPE_NAME => team::update(ctx, prior_state, planned_state).await,
            ip_access_list::TYPE_NAME => ip_access_list::update(ctx, prior_state, planned_state).await,
            other => Err(unknown_resource(other)),
        }
    }

    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        let api = self.api().await?;
        let ctx = self.context(api.as_ref(), *self.delete_policy.read().await);
        match resource_type {
            team::TYPE_NAME => team::delete(ctx, current_state).await,
            ip_access_list::TYPE_NAME => ip_access_list::delete(ctx, current_state).await,
            other => Err(unknown_resource(other)),
        }
    }

    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let api = self.api().await?;
        let ctx = self.context(api.as_ref(), *self.delete_policy.read().await);
        match resource_type {
            team::TYPE_NAME => team::import(ctx, id).await,
            ip_access_list::TYPE_NAME => ip_access_list::import(ctx, id).await,
            other => Err(unknown_resource(other)),
        }
    }

    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        match data_source_type {
            data_sources::ip_access_list::TYPE_NAME => Ok(data_sources::ip_access_list::validate(&config)),
            other => Err(unknown_data_source(other)),
        }
    }

    async fn read_data_source(&self, data_source_type: &str, config: Value) -> Result<Value, ProviderError> {
        match data_source_type {
            data_sources::ip_access_list::TYPE_NAME => {
                let api = self.api().await?;
                data_sources::ip_access_list::read(api.as_ref(), config).await
            },
            other => Err(unknown_data_source(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{FakeAtlas, FakeCall};
    use crate::retry::ManualClock;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_metadata() {
        let metadata = AtlasProvider::new().metadata();
        assert_eq!(
            metadata.resources,
            vec!["atlas_project_ip_access_list", "atlas_team"]
        );
        assert_eq!(metadata.data_sources, vec!["atlas_project_ip_access_list"]);
    }

    #[tokio::test]
    async fn test_unconfigured_provider_fails_precondition() {
        let provider = AtlasProvider::new();
        let err = provider
            .read(team::TYPE_NAME, json!({"id": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::FailedPrecondition(_)));
    }

    #[tokio::test]
    async fn test_configure_missing_token_reports_diagnostic() {
        std::env::remove_var(crate::config::ACCESS_TOKEN_ENV);
        let provider = AtlasProvider::new();
        let diagnostics = provider.configure(json!({})).await.unwrap();
        assert!(has_errors(&diagnostics));
        assert!(provider.api().await.is_err());
    }

    #[tokio::test]
    async fn test_configure_builds_client() {
        let provider = AtlasProvider::new();
        let diagnostics = provider
            .configure(json!({
                "access_token": "tok",
                "base_url": "http://127.0.0.1:9",
                "delete_timeout_secs": 120
            }))
            .await
            .unwrap();
        assert!(!has_errors(&diagnostics));
        assert_eq!(diagnostics[0].summary, "base_url does not use TLS");
        assert!(provider.api().await.is_ok());
        assert_eq!(
            provider.delete_policy.read().await.timeout,
            Duration::from_secs(120)
        );
    }

    #[tokio::test]
    async fn test_unknown_types() {
        let provider = AtlasProvider::with_client(Arc::new(FakeAtlas::new()));
        assert!(matches!(
            provider.create("atlas_cluster", json!({})).await,
            Err(ProviderError::UnknownResource(_))
        ));
        assert!(matches!(
            provider.read_data_source("atlas_cluster", json!({})).await,
            Err(ProviderError::UnknownResource(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_cancels_team_delete() {
        let fake = Arc::new(FakeAtlas::new());
        fake.seed_team("o1", "eng", &[]).await;
        // Never resolvable: no listed project holds the assignment.
        fake.assign_team_to_project("hidden", "t1").await;

        let provider = AtlasProvider::with_client(fake.clone())
            .with_clock(Arc::new(ManualClock::new()));
        provider.stop().await.unwrap();

        let id = crate::state_id::StateId::new()
            .with("org_id", "o1")
            .with("id", "t1");
        let state = json!({ "id": id.encode() });
        let err = provider.delete(team::TYPE_NAME, state).await.unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled(_)));
        assert_eq!(fake.calls(FakeCall::RemoveTeamFromOrg).await, 0);
    }

    #[tokio::test]
    async fn test_stop_interrupts_running_delete_attempt() {
        let fake = Arc::new(FakeAtlas::new());
        fake.seed_team("o1", "eng", &[]).await;
        fake.add_project("o1", "p1", "prod").await;
        fake.assign_team_to_project("p1", "t1").await;
        fake.hang_project_team_listing().await;

        let provider = Arc::new(
            AtlasProvider::with_client(fake.clone()).with_clock(Arc::new(ManualClock::new())),
        );
        let stopper = provider.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stopper.stop().await
        });

        let id = crate::state_id::StateId::new()
            .with("org_id", "o1")
            .with("id", "t1");
        let err = provider
            .delete(team::TYPE_NAME, json!({ "id": id.encode() }))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled(_)));
        assert_eq!(fake.calls(FakeCall::ListProjectTeams).await, 1);
        assert_eq!(fake.calls(FakeCall::RemoveTeamFromProject).await, 0);
        assert!(fake.has_team("t1").await);
    }

    #[tokio::test]
    async fn test_configure_rejects_unbounded_delete_timeout() {
        let provider = AtlasProvider::new();
        let diagnostics = provider
            .configure(json!({
                "access_token": "tok",
                "base_url": "http://127.0.0.1:9/api",
                "delete_timeout_secs": u64::MAX
            }))
            .await
            .unwrap();
        assert!(diagnostics
            .iter()
            .any(|d| d.is_error() && d.attribute.as_deref() == Some("delete_timeout_secs")));

        let id = crate::state_id::StateId::new()
            .with("org_id", "o1")
            .with("id", "t1");
        let err = provider
            .delete(team::TYPE_NAME, json!({ "id": id.encode() }))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::FailedPrecondition(_)));
    }

    #[tokio::test]
    async fn test_delete_with_maximal_timeout_policy() {
        let fake = Arc::new(FakeAtlas::new());
        fake.seed_team("o1", "eng", &[]).await;
        fake.add_project("o1", "p1", "prod").await;
        fake.assign_team_to_project("p1", "t1").await;

        let provider = AtlasProvider::with_client(fake.clone())
            .with_clock(Arc::new(ManualClock::new()))
            .with_delete_policy(RetryPolicy::with_timeout(Duration::from_secs(u64::MAX)));

        let id = crate::state_id::StateId::new()
            .with("org_id", "o1")
            .with("id", "t1");
        provider
            .delete(team::TYPE_NAME, json!({ "id": id.encode() }))
            .await
            .unwrap();
        assert!(!fake.has_team("t1").await);
    }

    #[tokio::test]
    async fn test_dispatches_to_resources() {
        let fake = Arc::new(FakeAtlas::new());
        fake.add_user("alice").await;
        let provider = AtlasProvider::with_client(fake.clone());

        let state = provider
            .create(
                team::TYPE_NAME,
                json!({"org_id": "o1", "name": "eng", "usernames": ["alice"]}),
            )
            .await
            .unwrap();
        assert_eq!(state["team_id"], "t1");

        let imported = provider.import_resource(team::TYPE_NAME, "o1-t1").await.unwrap();
        assert_eq!(imported[0].state, state);

        provider.delete(team::TYPE_NAME, state.clone()).await.unwrap();
        assert!(provider.read(team::TYPE_NAME, state).await.unwrap().is_null());
    }
}
