//! The provider lifecycle contract.
//!
//! An infrastructure-as-code engine drives a provider through this trait:
//! validate and configure the provider once, then plan, create, read, update,
//! delete and import resources and read data sources. Every payload is a JSON
//! object shaped by the schema the provider returns from
//! [`ProviderService::schema`].
//!
//! # Reading a resource that no longer exists
//!
//! [`ProviderService::read`] returns [`serde_json::Value::Null`] when the
//! remote object is gone. The caller drops the resource from its state and
//! plans to create it again; this is not an error.

use crate::error::ProviderError;
use crate::schema::{Diagnostic, ProviderSchema};
use crate::types::{ImportedResource, PlanResult, ProviderMetadata};

/// Trait that provider implementations must implement.
///
/// # Example
///
/// ```
/// use atlas_provider::{ProviderError, PlanResult, ProviderService};
/// use atlas_provider::schema::{Attribute, Diagnostic, ProviderSchema, Schema};
/// use serde_json::Value;
///
/// struct Echo;
///
/// #[async_trait::async_trait]
/// impl ProviderService for Echo {
///     fn schema(&self) -> ProviderSchema {
///         ProviderSchema::new().with_resource(
///             "echo",
///             Schema::v0().with_attribute("name", Attribute::required_string()),
///         )
///     }
///
///     async fn configure(&self, _config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
///         Ok(vec![])
///     }
///
///     async fn plan(
///         &self,
///         _resource_type: &str,
///         _prior_state: Option<Value>,
///         proposed_state: Value,
///         _config: Value,
///     ) -> Result<PlanResult, ProviderError> {
///         Ok(PlanResult::no_change(proposed_state))
///     }
///
///     async fn create(&self, _resource_type: &str, planned: Value) -> Result<Value, ProviderError> {
///         Ok(planned)
///     }
///
///     async fn read(&self, _resource_type: &str, current: Value) -> Result<Value, ProviderError> {
///         Ok(current)
///     }
///
///     async fn update(
///         &self,
///         _resource_type: &str,
///         _prior: Value,
///         planned: Value,
///     ) -> Result<Value, ProviderError> {
///         Ok(planned)
///     }
///
///     async fn delete(&self, _resource_type: &str, _current: Value) -> Result<(), ProviderError> {
///         Ok(())
///     }
/// }
///
/// assert_eq!(Echo.metadata().resources, vec!["echo".to_string()]);
/// ```
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    /// Return the provider's schema including all resources and data sources.
    fn schema(&self) -> ProviderSchema;

    /// Return the resource and data source names, derived from the schema.
    fn metadata(&self) -> ProviderMetadata {
        let schema = self.schema();
        let mut resources: Vec<String> = schema.resources.keys().cloned().collect();
        let mut data_sources: Vec<String> = schema.data_sources.keys().cloned().collect();
        resources.sort();
        data_sources.sort();
        ProviderMetadata {
            resources,
            data_sources,
        }
    }

    /// Validate the provider configuration before configuring.
    async fn validate_provider_config(
        &self,
        config: serde_json::Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = config;
        Ok(vec![])
    }

    /// Configure the provider with credentials and settings.
    async fn configure(&self, config: serde_json::Value) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Stop the provider, aborting long-running operations.
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Validate a resource's configuration before planning.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: serde_json::Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (resource_type, config);
        Ok(vec![])
    }

    /// Plan changes for a resource.
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<serde_json::Value>,
        proposed_state: serde_json::Value,
        config: serde_json::Value,
    ) -> Result<PlanResult, ProviderError>;

    /// Create a new resource.
    async fn create(
        &self,
        resource_type: &str,
        planned_state: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError>;

    /// Read the current state of a resource, or `Null` if it is gone.
    async fn read(
        &self,
        resource_type: &str,
        current_state: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError>;

    /// Update an existing resource.
    async fn update(
        &self,
        resource_type: &str,
        prior_state: serde_json::Value,
        planned_state: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError>;

    /// Delete a resource.
    async fn delete(
        &self,
        resource_type: &str,
        current_state: serde_json::Value,
    ) -> Result<(), ProviderError>;

    /// Import existing infrastructure into management.
    async fn import_resource(
        &self,
        resource_type: &str,
        _id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        Err(ProviderError::Unimplemented(format!(
            "Import not supported for resource type: {}",
            resource_type
        )))
    }

    /// Validate a data source's configuration.
    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: serde_json::Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (data_source_type, config);
        Ok(vec![])
    }

    /// Read data from an external source.
    async fn read_data_source(
        &self,
        data_source_type: &str,
        _config: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        Err(ProviderError::UnknownResource(format!(
            "data source {}",
            data_source_type
        )))
    }
}
