//! Testing utilities for provider implementations.
//!
//! [`ProviderTester`] drives a [`ProviderService`] in-process: plan, apply,
//! refresh and destroy without a host process. The [`acceptance`] module builds
//! multi-step cases on top of it for runs against a live Atlas organization.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use atlas_provider::client::FakeAtlas;
//! use atlas_provider::testing::ProviderTester;
//! use atlas_provider::AtlasProvider;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let fake = Arc::new(FakeAtlas::new());
//! fake.add_user("alice").await;
//! let tester = ProviderTester::new(AtlasProvider::with_client(fake));
//!
//! let state = tester
//!     .lifecycle_create(
//!         "atlas_team",
//!         json!({"org_id": "o1", "name": "eng", "usernames": ["alice"]}),
//!     )
//!     .await
//!     .unwrap();
//! assert_eq!(state["team_id"], "t1");
//! # });
//! ```

use crate::error::ProviderError;
use crate::schema::{Diagnostic, ProviderSchema};
use crate::service::ProviderService;
use crate::types::{ImportedResource, PlanResult};
use serde_json::Value;

pub mod acceptance;

/// A test harness for provider implementations.
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

    /// Get the provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Get the list of resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    /// Get the list of data source type names.
    pub fn data_source_types(&self) -> Vec<String> {
        self.provider.metadata().data_sources
    }

    /// Validate provider configuration, failing on any error diagnostic.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Configure the provider, failing on any error diagnostic.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Stop the provider.
    pub async fn stop(&self) -> Result<(), ProviderError> {
        self.provider.stop().await
    }

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
        self.provider
            .plan(resource_type, None, proposed_state.clone(), proposed_state)
            .await
    }

    /// Plan a resource update.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(
                resource_type,
                Some(prior_state),
                proposed_state.clone(),
                proposed_state,
            )
            .await
    }

    /// Plan a resource deletion.
    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), Value::Null, Value::Null)
            .await
    }

    /// Full plan operation with explicit config.
    pub async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, prior_state, proposed_state, config)
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

    /// Validate a data source configuration.
    pub async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_data_source_config(data_source_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Read data from a data source.
    pub async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .read_data_source(data_source_type, config)
            .await
    }

    /// Validate, plan, create, then read back.
    ///
    /// Fails if the freshly created resource does not survive a refresh.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, TestError> {
        self.validate_resource_config(resource_type, config.clone())
            .await?;
        let plan = self.plan_create(resource_type, config).await?;
        let created = self.create(resource_type, plan.planned_state).await?;
        self.refresh(resource_type, created).await
    }

    /// Plan and apply `proposed_state` over `prior_state`, then read back.
    ///
    /// A plan that requires replacement is applied as delete then create, the
    /// way a host would.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<Value, TestError> {
        self.validate_resource_config(resource_type, proposed_state.clone())
            .await?;
        let plan = self
            .plan_update(resource_type, prior_state.clone(), proposed_state.clone())
            .await?;

        if plan.is_no_op() {
            return self.refresh(resource_type, prior_state).await;
        }
        if plan.requires_replace {
            self.lifecycle_delete(resource_type, prior_state).await?;
            return self.lifecycle_create(resource_type, proposed_state).await;
        }

        let updated = self
            .update(resource_type, prior_state, plan.planned_state)
            .await?;
        self.refresh(resource_type, updated).await
    }

    /// Delete, then confirm a refresh reports the resource gone.
    pub async fn lifecycle_delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), TestError> {
        self.plan_delete(resource_type, current_state.clone())
            .await?;
        self.delete(resource_type, current_state.clone()).await?;

        let after = self.read(resource_type, current_state).await?;
        if after.is_null() {
            Ok(())
        } else {
            Err(TestError::StillExists {
                resource_type: resource_type.to_string(),
                state: after,
            })
        }
    }

    /// Create, update, then delete.
    ///
    /// Returns the state after the update (before delete).
    pub async fn lifecycle_crud(
        &self,
        resource_type: &str,
        initial_config: Value,
        updated_config: Value,
    ) -> Result<Value, TestError> {
        let created = self.lifecycle_create(resource_type, initial_config).await?;
        let updated = self
            .lifecycle_update(resource_type, created, updated_config)
            .await?;
        self.lifecycle_delete(resource_type, updated.clone()).await?;
        Ok(updated)
    }

    /// Read `state` back, failing if the resource has gone.
    pub async fn refresh(&self, resource_type: &str, state: Value) -> Result<Value, TestError> {
        let refreshed = self.read(resource_type, state).await?;
        if refreshed.is_null() {
            return Err(TestError::Vanished {
                resource_type: resource_type.to_string(),
            });
        }
        Ok(refreshed)
    }
}

/// Error type for test operations.
#[derive(Debug)]
pub enum TestError {
    /// The operation failed with diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation failed with a provider error.
    Provider(ProviderError),
    /// A refresh reported the resource gone when it should exist.
    Vanished {
        /// The resource type.
        resource_type: String,
    },
    /// A refresh after delete still found the resource.
    StillExists {
        /// The resource type.
        resource_type: String,
        /// What the refresh returned.
        state: Value,
    },
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
            TestError::Vanished { resource_type } => {
                write!(f, "{} no longer exists after apply", resource_type)
            },
            TestError::StillExists {
                resource_type,
                state,
            } => write!(f, "{} still exists after delete: {}", resource_type, state),
        }
    }
}

impl std::error::Error for TestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TestError::Provider(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

/// Keep only error diagnostics; any left means failure.
fn check_diagnostics(mut diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    diagnostics.retain(Diagnostic::is_error);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(diagnostics))
    }
}

fn changed_paths(plan: &PlanResult) -> Vec<&str> {
    plan.changes.iter().map(|c| c.path.as_str()).collect()
}

fn error_summaries(diagnostics: &[Diagnostic]) -> Vec<&str> {
    diagnostics
        .iter()
        .filter(|d| d.is_error())
        .map(|d| d.summary.as_str())
        .collect()
}

/// Panics unless `plan` creates a new resource: some changes, no replacement.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(!plan.changes.is_empty(), "Expected a create plan, but it has no changes");
    assert!(!plan.requires_replace, "Expected a create plan, got a replacement");
}

/// Panics if `plan` changes anything.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "Expected no changes, got {:?}",
        changed_paths(plan)
    );
}

/// Panics if `plan` changes nothing.
pub fn assert_plan_has_changes(plan: &PlanResult) {
    assert!(!plan.changes.is_empty(), "Expected changes, got none");
}

/// Panics unless `plan` replaces the resource.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "Expected a replacement, changes were {:?}",
        changed_paths(plan)
    );
}

/// Panics if `plan` replaces the resource.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(
        !plan.requires_replace,
        "Expected an in-place update, changes were {:?}",
        changed_paths(plan)
    );
}

/// Panics unless `plan` changes the attribute at `path`.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    let paths = changed_paths(plan);
    assert!(
        paths.contains(&path),
        "Expected '{}' to change, changed attributes: {:?}",
        path,
        paths
    );
}

/// Panics if `plan` changes the attribute at `path`.
pub fn assert_plan_does_not_change_attribute(plan: &PlanResult, path: &str) {
    assert!(
        !changed_paths(plan).contains(&path),
        "Expected '{}' to stay unchanged",
        path
    );
}

/// Panics if any diagnostic is an error.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors = error_summaries(diagnostics);
    assert!(errors.is_empty(), "Expected no errors, got {:?}", errors);
}

/// Panics unless at least one diagnostic is an error.
pub fn assert_has_errors(diagnostics: &[Diagnostic]) {
    assert!(
        diagnostics.iter().any(Diagnostic::is_error),
        "Expected at least one error, got none"
    );
}

/// Panics unless some error diagnostic's summary contains `substring`.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let errors = error_summaries(diagnostics);
    assert!(
        errors.iter().any(|summary| summary.contains(substring)),
        "Expected an error containing '{}', got {:?}",
        substring,
        errors
    );
}
