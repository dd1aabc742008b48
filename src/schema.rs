//! Schema types describing the provider configuration, resources and data sources.
//!
//! Schemas drive [`crate::validation`] and plan computation: they say which
//! attributes a caller must set, which ones the provider computes, and which
//! ones force a resource to be replaced when they change.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Value type of an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    /// UTF-8 string.
    String,
    /// Signed 64-bit integer.
    Int64,
    /// Unordered collection without duplicates, carried as a JSON array.
    Set(Box<AttributeType>),
}

impl AttributeType {
    /// A set of `element_type`.
    pub fn set(element_type: AttributeType) -> Self {
        Self::Set(Box::new(element_type))
    }
}

/// Who sets an attribute: the caller, the provider, or either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AttributeFlags {
    /// Must be present in configuration.
    pub required: bool,
    /// May be present in configuration.
    pub optional: bool,
    /// Filled in by the provider.
    pub computed: bool,
    /// Never echoed in logs or plan output.
    pub sensitive: bool,
}

impl AttributeFlags {
    /// Caller must set it.
    pub fn required() -> Self {
        Self {
            required: true,
            ..Default::default()
        }
    }

    /// Caller may set it.
    pub fn optional() -> Self {
        Self {
            optional: true,
            ..Default::default()
        }
    }

    /// Provider sets it; configuration values are ignored.
    pub fn computed() -> Self {
        Self {
            computed: true,
            ..Default::default()
        }
    }

    /// Caller may set it, otherwise the provider does.
    pub fn optional_computed() -> Self {
        Self {
            optional: true,
            computed: true,
            ..Default::default()
        }
    }
}

/// One attribute of a [`Schema`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// Value type.
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    /// Configurability.
    #[serde(flatten)]
    pub flags: AttributeFlags,
    /// Shown in generated documentation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// A change to this attribute replaces the resource.
    #[serde(default)]
    pub force_new: bool,
}

impl Attribute {
    /// An attribute of `attr_type` with `flags`.
    pub fn new(attr_type: AttributeType, flags: AttributeFlags) -> Self {
        Self {
            attr_type,
            flags,
            description: None,
            force_new: false,
        }
    }

    /// `String`, required.
    pub fn required_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::required())
    }

    /// `String`, optional.
    pub fn optional_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::optional())
    }

    /// `String`, computed.
    pub fn computed_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::computed())
    }

    /// `String`, optional and computed.
    pub fn optional_computed_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::optional_computed())
    }

    /// `Int64`, optional.
    pub fn optional_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::optional())
    }

    /// Set of `String`, required.
    pub fn required_string_set() -> Self {
        Self::new(
            AttributeType::set(AttributeType::String),
            AttributeFlags::required(),
        )
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Replace the resource when this attribute changes.
    pub fn with_force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    /// Hide the value from logs and plan output.
    pub fn sensitive(mut self) -> Self {
        self.flags.sensitive = true;
        self
    }
}

/// Attributes and constraints of a resource, data source, or provider block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Bumped when persisted state changes shape.
    #[serde(default)]
    pub version: u64,
    /// The attributes, keyed by name.
    #[serde(default)]
    pub attributes: HashMap<String, Attribute>,
    /// Groups of attributes of which exactly one must be set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exactly_one_of: Vec<Vec<String>>,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Schema {
    /// An empty schema at `version`.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            attributes: HashMap::new(),
            exactly_one_of: Vec::new(),
            description: None,
        }
    }

    /// An empty schema at version 0.
    pub fn v0() -> Self {
        Self::new(0)
    }

    /// Add or replace attribute `name`.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.attributes.insert(name.into(), attr);
        self
    }

    /// Require exactly one of the named attributes to be set.
    pub fn with_exactly_one_of<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exactly_one_of
            .push(names.into_iter().map(Into::into).collect());
        self
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Names of the attributes that force replacement when they change, sorted.
    pub fn force_new_attributes(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .attributes
            .iter()
            .filter(|(_, attr)| attr.force_new)
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::v0()
    }
}

/// Everything a provider declares: its configuration block plus one schema
/// per resource and data source type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProviderSchema {
    /// The `configure` payload.
    #[serde(default)]
    pub provider: Schema,
    /// Keyed by resource type name.
    #[serde(default)]
    pub resources: HashMap<String, Schema>,
    /// Keyed by data source type name.
    #[serde(default)]
    pub data_sources: HashMap<String, Schema>,
}

impl ProviderSchema {
    /// Create a new empty provider schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the provider configuration schema.
    pub fn with_provider_config(mut self, schema: Schema) -> Self {
        self.provider = schema;
        self
    }

    /// Add a resource schema.
    pub fn with_resource(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.resources.insert(name.into(), schema);
        self
    }

    /// Add a data source schema.
    pub fn with_data_source(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.data_sources.insert(name.into(), schema);
        self
    }
}

/// Diagnostic severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    /// An error that prevents the operation from completing.
    Error,
    /// A warning that doesn't prevent the operation but should be addressed.
    Warning,
}

/// A diagnostic message from the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// The severity of the diagnostic.
    pub severity: DiagnosticSeverity,
    /// A short summary of the issue.
    pub summary: String,
    /// A detailed description of the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// The attribute path where the issue occurred.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl Diagnostic {
    /// Create an error diagnostic.
    pub fn error(summary: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Error,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    /// Create a warning diagnostic.
    pub fn warning(summary: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Warning,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    /// Add detail to this diagnostic.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Set the attribute path for this diagnostic.
    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    /// Whether this diagnostic is an error.
    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }
}

/// Whether any diagnostic in the slice is an error.
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_flags() {
        let required = AttributeFlags::required();
        assert!(required.required);
        assert!(!required.optional);
        assert!(!required.computed);

        let optional_computed = AttributeFlags::optional_computed();
        assert!(!optional_computed.required);
        assert!(optional_computed.optional);
        assert!(optional_computed.computed);
    }

    #[test]
    fn test_attribute_builders() {
        let attr = Attribute::required_string()
            .with_description("Organization that owns the team")
            .with_force_new();

        assert_eq!(attr.attr_type, AttributeType::String);
        assert!(attr.flags.required);
        assert!(attr.force_new);

        let usernames = Attribute::required_string_set();
        assert_eq!(
            usernames.attr_type,
            AttributeType::Set(Box::new(AttributeType::String))
        );

        let token = Attribute::optional_string().sensitive();
        assert!(token.flags.sensitive);
    }

    #[test]
    fn test_schema_force_new_attributes_sorted() {
        let schema = Schema::v0()
            .with_attribute("project_id", Attribute::required_string().with_force_new())
            .with_attribute("comment", Attribute::optional_string().with_force_new())
            .with_attribute("id", Attribute::computed_string());

        assert_eq!(schema.force_new_attributes(), vec!["comment", "project_id"]);
    }

    #[test]
    fn test_schema_exactly_one_of() {
        let schema = Schema::v0().with_exactly_one_of(["ip_address", "cidr_block"]);
        assert_eq!(
            schema.exactly_one_of,
            vec![vec!["ip_address".to_string(), "cidr_block".to_string()]]
        );
    }

    #[test]
    fn test_provider_schema() {
        let provider_schema = ProviderSchema::new()
            .with_provider_config(
                Schema::v0().with_attribute("access_token", Attribute::optional_string().sensitive()),
            )
            .with_resource(
                "atlas_team",
                Schema::v0().with_attribute("name", Attribute::required_string()),
            )
            .with_data_source(
                "atlas_project_ip_access_list",
                Schema::v0().with_attribute("project_id", Attribute::required_string()),
            );

        assert!(provider_schema.provider.attributes.contains_key("access_token"));
        assert!(provider_schema.resources.contains_key("atlas_team"));
        assert!(provider_schema
            .data_sources
            .contains_key("atlas_project_ip_access_list"));
    }

    #[test]
    fn test_diagnostic() {
        let err = Diagnostic::error("Invalid configuration")
            .with_detail("Exactly one address must be set")
            .with_attribute("ip_address");

        assert!(err.is_error());
        assert_eq!(err.detail, Some("Exactly one address must be set".to_string()));
        assert_eq!(err.attribute, Some("ip_address".to_string()));
        assert!(has_errors(&[Diagnostic::warning("w"), err]));
        assert!(!has_errors(&[Diagnostic::warning("w")]));
    }
}
