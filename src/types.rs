//! Value types exchanged with the provider lifecycle.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::Schema;

/// A change to a single attribute during a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// The path to the attribute that changed.
    pub path: String,
    /// The value before the change (None if creating).
    pub before: Option<Value>,
    /// The value after the change (None if deleting or not yet known).
    pub after: Option<Value>,
}

impl AttributeChange {
    /// Create a new attribute change.
    pub fn new(path: impl Into<String>, before: Option<Value>, after: Option<Value>) -> Self {
        Self {
            path: path.into(),
            before,
            after,
        }
    }

    /// Create a change for a new attribute.
    pub fn added(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, None, Some(value))
    }

    /// Create a change for a removed attribute.
    pub fn removed(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, Some(value), None)
    }

    /// Create a change for a modified attribute.
    pub fn modified(path: impl Into<String>, before: Value, after: Value) -> Self {
        Self::new(path, Some(before), Some(after))
    }
}

/// The result of a plan operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    /// The planned state after the operation.
    pub planned_state: Value,
    /// The list of attribute changes.
    pub changes: Vec<AttributeChange>,
    /// Whether the resource requires replacement.
    pub requires_replace: bool,
}

impl PlanResult {
    /// Create a plan result with no changes.
    pub fn no_change(state: Value) -> Self {
        Self {
            planned_state: state,
            changes: Vec::new(),
            requires_replace: false,
        }
    }

    /// Create a plan result with changes.
    pub fn with_changes(
        planned_state: Value,
        changes: Vec<AttributeChange>,
        requires_replace: bool,
    ) -> Self {
        Self {
            planned_state,
            changes,
            requires_replace,
        }
    }

    /// Whether the plan leaves the resource untouched.
    pub fn is_no_op(&self) -> bool {
        self.changes.is_empty() && !self.requires_replace
    }
}

/// Diff `prior` against `proposed` over the schema's configurable attributes.
///
/// Attributes are compared in name order. A change to a force-new attribute
/// marks the plan as requiring replacement. When `prior` is `None` every set
/// attribute is reported as added.
pub fn diff_attributes(schema: &Schema, prior: Option<&Value>, proposed: &Value) -> PlanResult {
    let mut names: Vec<&String> = schema
        .attributes
        .iter()
        .filter(|(_, attr)| attr.flags.required || attr.flags.optional)
        .map(|(name, _)| name)
        .collect();
    names.sort();

    let mut changes = Vec::new();
    let mut requires_replace = false;

    for name in names {
        let after = proposed.get(name).filter(|v| !v.is_null());
        let before = prior.and_then(|p| p.get(name)).filter(|v| !v.is_null());
        if before == after {
            continue;
        }
        if prior.is_some() && schema.attributes[name].force_new {
            requires_replace = true;
        }
        changes.push(AttributeChange::new(
            name.as_str(),
            before.cloned(),
            after.cloned(),
        ));
    }

    PlanResult::with_changes(proposed.clone(), changes, requires_replace)
}

/// An imported resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedResource {
    /// The resource type.
    pub resource_type: String,
    /// The imported state.
    pub state: Value,
}

impl ImportedResource {
    /// Create a new imported resource.
    pub fn new(resource_type: impl Into<String>, state: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            state,
        }
    }
}

/// Resource and data source names a provider serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderMetadata {
    /// Resource type names, sorted.
    pub resources: Vec<String>,
    /// Data source type names, sorted.
    pub data_sources: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Attribute;
    use serde_json::json;

    #[test]
    fn test_attribute_change_constructors() {
        let added = AttributeChange::added("name", json!("eng"));
        assert!(added.before.is_none());
        assert_eq!(added.after, Some(json!("eng")));

        let removed = AttributeChange::removed("comment", json!("old"));
        assert_eq!(removed.before, Some(json!("old")));
        assert!(removed.after.is_none());

        let modified = AttributeChange::modified("name", json!("eng"), json!("platform"));
        assert_eq!(modified.before, Some(json!("eng")));
        assert_eq!(modified.after, Some(json!("platform")));
    }

    #[test]
    fn test_plan_result() {
        let no_change = PlanResult::no_change(json!({"id": "123"}));
        assert!(no_change.is_no_op());

        let with_changes = PlanResult::with_changes(
            json!({"name": "platform"}),
            vec![AttributeChange::modified("name", json!("eng"), json!("platform"))],
            false,
        );
        assert_eq!(with_changes.changes.len(), 1);
        assert!(!with_changes.is_no_op());
    }

    fn schema() -> Schema {
        Schema::v0()
            .with_attribute("org_id", Attribute::required_string().with_force_new())
            .with_attribute("name", Attribute::required_string())
            .with_attribute("team_id", Attribute::computed_string())
    }

    #[test]
    fn test_diff_attributes_update() {
        let prior = json!({"org_id": "o1", "name": "eng", "team_id": "t1"});
        let proposed = json!({"org_id": "o1", "name": "platform", "team_id": "t1"});

        let plan = diff_attributes(&schema(), Some(&prior), &proposed);
        assert!(!plan.requires_replace);
        assert_eq!(
            plan.changes,
            vec![AttributeChange::modified("name", json!("eng"), json!("platform"))]
        );

        let moved = json!({"org_id": "o2", "name": "eng"});
        let plan = diff_attributes(&schema(), Some(&prior), &moved);
        assert!(plan.requires_replace);
        assert_eq!(plan.changes[0].path, "org_id");
    }

    #[test]
    fn test_diff_attributes_create() {
        let plan = diff_attributes(&schema(), None, &json!({"org_id": "o1", "name": "eng"}));
        assert!(!plan.requires_replace);
        assert_eq!(plan.changes.len(), 2);
        assert!(plan.changes.iter().all(|c| c.before.is_none()));
    }

    #[test]
    fn test_imported_resource() {
        let imported = ImportedResource::new("atlas_team", json!({"team_id": "t1"}));
        assert_eq!(imported.resource_type, "atlas_team");
        assert_eq!(imported.state["team_id"], "t1");
    }
}
