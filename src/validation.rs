//! Schema validation helpers.
//!
//! Checks a `serde_json::Value` against a [`Schema`] and reports problems as
//! [`Diagnostic`]s rather than failing on the first one.
//!
//! # Example
//!
//! ```
//! use atlas_provider::schema::{Attribute, Schema};
//! use atlas_provider::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("project_id", Attribute::required_string())
//!     .with_attribute("ip_address", Attribute::optional_string())
//!     .with_attribute("cidr_block", Attribute::optional_string())
//!     .with_exactly_one_of(["ip_address", "cidr_block"]);
//!
//! let diagnostics = validate(&schema, &json!({"project_id": "p1", "ip_address": "10.0.0.1"}));
//! assert!(diagnostics.is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"project_id": "p1"}));
//! assert_eq!(diagnostics.len(), 1);
//! ```

use crate::schema::{Attribute, AttributeType, Diagnostic, Schema};
use serde_json::Value;
use std::collections::HashSet;

/// Validate a JSON value against a schema.
///
/// Returns a list of diagnostics; an empty list means the value is valid.
///
/// # Validation Rules
///
/// - Required attributes must be present and non-null
/// - Computed-only attributes are skipped (the provider sets these)
/// - Attribute types must match the schema, and sets must not repeat elements
/// - Each `exactly_one_of` group must have exactly one non-null member
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let obj = match value {
        Value::Object(map) => map,
        _ => {
            diagnostics.push(
                Diagnostic::error("Expected object").with_detail(format!("Got {}", value_type_name(value))),
            );
            return diagnostics;
        },
    };

    let mut names: Vec<&String> = schema.attributes.keys().collect();
    names.sort();
    for name in names {
        validate_attribute(&schema.attributes[name], obj.get(name), name, &mut diagnostics);
    }

    for group in &schema.exactly_one_of {
        validate_exactly_one_of(group, obj, &mut diagnostics);
    }

    diagnostics
}

/// Validate a JSON value against a schema, returning Ok if valid or Err with diagnostics.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Check if a JSON value is valid against a schema.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    validate(schema, value).is_empty()
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if attr.flags.computed && !attr.flags.optional && !attr.flags.required {
        return;
    }

    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        },
        Some(v) => validate_attribute_type(&attr.attr_type, v, path, diagnostics),
    }
}

fn validate_attribute_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match attr_type {
        AttributeType::String => {
            if !value.is_string() {
                diagnostics.push(type_error(path, "string", value));
            }
        },
        AttributeType::Int64 => {
            if value.as_i64().is_none() {
                diagnostics.push(type_error(path, "int64", value));
            }
        },
        AttributeType::Set(element_type) => match value.as_array() {
            Some(arr) => {
                validate_elements(element_type, arr, path, diagnostics);
                let mut seen = HashSet::new();
                for elem in arr {
                    if !seen.insert(elem.to_string()) {
                        diagnostics.push(
                            Diagnostic::error(format!("Duplicate element in set '{}'", path))
                                .with_detail(format!("{} appears more than once", elem))
                                .with_attribute(path),
                        );
                    }
                }
            },
            None => diagnostics.push(type_error(path, "set", value)),
        },
    }
}

fn validate_elements(
    element_type: &AttributeType,
    arr: &[Value],
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for (i, elem) in arr.iter().enumerate() {
        let elem_path = format!("{}.{}", path, i);
        validate_attribute_type(element_type, elem, &elem_path, diagnostics);
    }
}

fn validate_exactly_one_of(
    group: &[String],
    obj: &serde_json::Map<String, Value>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let set: Vec<&String> = group
        .iter()
        .filter(|name| obj.get(name.as_str()).is_some_and(|v| !v.is_null()))
        .collect();

    if set.len() == 1 {
        return;
    }

    let expected = group.join(", ");
    let diagnostic = if set.is_empty() {
        Diagnostic::error(format!("Exactly one of [{}] must be set", expected))
            .with_detail("None of them were provided")
    } else {
        let given: Vec<&str> = set.iter().map(|s| s.as_str()).collect();
        Diagnostic::error(format!("Exactly one of [{}] must be set", expected))
            .with_detail(format!("Got {}", given.join(", ")))
            .with_attribute(given[1])
    };
    diagnostics.push(diagnostic);
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic::error(format!("Invalid type for attribute '{}'", path))
        .with_detail(format!("Expected {}, got {}", expected, value_type_name(got)))
        .with_attribute(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn team_schema() -> Schema {
        Schema::v0()
            .with_attribute("org_id", Attribute::required_string().with_force_new())
            .with_attribute("name", Attribute::required_string())
            .with_attribute("usernames", Attribute::required_string_set())
            .with_attribute("team_id", Attribute::computed_string())
    }

    fn access_list_schema() -> Schema {
        Schema::v0()
            .with_attribute("project_id", Attribute::required_string())
            .with_attribute("ip_address", Attribute::optional_string())
            .with_attribute("cidr_block", Attribute::optional_string())
            .with_attribute("aws_security_group", Attribute::optional_string())
            .with_exactly_one_of(["ip_address", "cidr_block", "aws_security_group"])
    }

    #[test]
    fn test_validate_required_string() {
        let schema = team_schema();

        let diagnostics = validate(
            &schema,
            &json!({"org_id": "o1", "name": "eng", "usernames": ["alice"]}),
        );
        assert!(diagnostics.is_empty());

        let diagnostics = validate(&schema, &json!({"org_id": "o1", "usernames": []}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("name".to_string()));

        let diagnostics = validate(
            &schema,
            &json!({"org_id": "o1", "name": 7, "usernames": []}),
        );
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Invalid type"));
    }

    #[test]
    fn test_validate_computed_attribute_skipped() {
        let diagnostics = validate(
            &team_schema(),
            &json!({"org_id": "o1", "name": "eng", "usernames": [], "team_id": 5}),
        );
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_validate_set_elements_and_duplicates() {
        let schema = team_schema();

        let diagnostics = validate(
            &schema,
            &json!({"org_id": "o1", "name": "eng", "usernames": ["alice", 3]}),
        );
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("usernames.1".to_string()));

        let diagnostics = validate(
            &schema,
            &json!({"org_id": "o1", "name": "eng", "usernames": ["alice", "alice"]}),
        );
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Duplicate"));

        let diagnostics = validate(
            &schema,
            &json!({"org_id": "o1", "name": "eng", "usernames": "alice"}),
        );
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn test_validate_exactly_one_of() {
        let schema = access_list_schema();

        assert!(is_valid(&schema, &json!({"project_id": "p1", "cidr_block": "10.0.0.0/24"})));
        assert!(is_valid(
            &schema,
            &json!({"project_id": "p1", "aws_security_group": "sg-1", "ip_address": null})
        ));

        let diagnostics = validate(&schema, &json!({"project_id": "p1"}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Exactly one of"));

        let diagnostics = validate(
            &schema,
            &json!({"project_id": "p1", "ip_address": "10.0.0.1", "cidr_block": "10.0.0.0/24"}),
        );
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("cidr_block".to_string()));
    }

    #[test]
    fn test_validate_int() {
        let schema = Schema::v0()
            .with_attribute("request_timeout_secs", Attribute::optional_int64())
            .with_attribute("delete_timeout_secs", Attribute::optional_int64());

        assert!(is_valid(&schema, &json!({"request_timeout_secs": 30})));

        let diagnostics = validate(
            &schema,
            &json!({"request_timeout_secs": 1.5, "delete_timeout_secs": "1h"}),
        );
        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics.iter().all(|d| d.summary.contains("Invalid type")));
    }

    #[test]
    fn test_validate_result_helper() {
        let schema = team_schema();
        assert!(validate_result(&schema, &json!({"org_id": "o1", "name": "n", "usernames": []})).is_ok());

        let result = validate_result(&schema, &json!({}));
        assert_eq!(result.unwrap_err().len(), 3);
    }

    #[test]
    fn test_validate_root_not_object() {
        let diagnostics = validate(&team_schema(), &json!("not an object"));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Expected object"));
    }
}
