//! `atlas_project_ip_access_list` data source: look up one access-list entry.

use serde_json::{json, Value};
use tracing::debug;

use crate::client::AtlasApi;
use crate::error::ProviderError;
use crate::resources::ip_access_list::{AccessListState, ADDRESS_FIELDS};
use crate::schema::{has_errors, Attribute, Diagnostic, Schema};
use crate::validation;

/// Data source type name.
pub const TYPE_NAME: &str = "atlas_project_ip_access_list";

/// Schema of the data source.
pub fn schema() -> Schema {
    Schema::v0()
        .with_description("Look up an entry of a project's IP access list")
        .with_attribute("project_id", Attribute::required_string())
        .with_attribute("ip_address", Attribute::optional_computed_string())
        .with_attribute("cidr_block", Attribute::optional_computed_string())
        .with_attribute("aws_security_group", Attribute::optional_computed_string())
        .with_attribute("comment", Attribute::computed_string())
        .with_attribute("id", Attribute::computed_string())
        .with_exactly_one_of(ADDRESS_FIELDS)
}

/// Check a lookup configuration against the schema.
pub fn validate(config: &Value) -> Vec<Diagnostic> {
    validation::validate(&schema(), config)
}

/// Fetch the entry named by `config`.
pub async fn read(api: &dyn AtlasApi, config: Value) -> Result<Value, ProviderError> {
    let diagnostics = validate(&config);
    if has_errors(&diagnostics) {
        let summary: Vec<String> = diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| d.summary.clone())
            .collect();
        return Err(ProviderError::Validation(summary.join("; ")));
    }

    let lookup = AccessListState::from_value(config)?;
    let address = lookup.address()?;
    debug!(project_id = %lookup.project_id, entry = address, "Looking up access list entry");

    let entry = api
        .get_access_list_entry(&lookup.project_id, address)
        .await
        .map_err(|e| {
            if e.is_not_found() {
                ProviderError::NotFound(format!(
                    "access list entry ({}) in project ({})",
                    address, lookup.project_id
                ))
            } else {
                ProviderError::api(
                    format!(
                        "error getting access list entry ({}) in project ({})",
                        address, lookup.project_id
                    ),
                    e,
                )
            }
        })?;

    Ok(json!({
        "project_id": lookup.project_id,
        "ip_address": entry.ip_address,
        "cidr_block": entry.cidr_block,
        "aws_security_group": entry.aws_security_group,
        "comment": entry.comment,
        "id": address,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{AccessListEntry, FakeAtlas, FakeCall};

    async fn fake_with_entries() -> FakeAtlas {
        let fake = FakeAtlas::new();
        let entries = [
            AccessListEntry {
                ip_address: Some("179.154.226.12".into()),
                comment: Some("TestAcc for ipAddress (179.154.226.12)".into()),
                ..Default::default()
            },
            AccessListEntry {
                cidr_block: Some("179.154.226.40/32".into()),
                comment: Some("office".into()),
                ..Default::default()
            },
            AccessListEntry {
                aws_security_group: Some("sg-0123456789".into()),
                comment: Some("peered vpc".into()),
                ..Default::default()
            },
        ];
        for entry in &entries {
            fake.create_access_list_entry("p1", entry).await.unwrap();
        }
        fake
    }

    #[tokio::test]
    async fn test_lookup_by_ip_address() {
        let fake = fake_with_entries().await;
        let out = read(&fake, json!({"project_id": "p1", "ip_address": "179.154.226.12"}))
            .await
            .unwrap();
        assert_eq!(out["ip_address"], "179.154.226.12");
        assert_eq!(out["cidr_block"], "179.154.226.12/32");
        assert_eq!(out["comment"], "TestAcc for ipAddress (179.154.226.12)");
        assert_eq!(out["id"], "179.154.226.12");
    }

    #[tokio::test]
    async fn test_lookup_by_cidr_and_security_group() {
        let fake = fake_with_entries().await;
        let out = read(&fake, json!({"project_id": "p1", "cidr_block": "179.154.226.40/32"}))
            .await
            .unwrap();
        assert_eq!(out["comment"], "office");

        let out = read(&fake, json!({"project_id": "p1", "aws_security_group": "sg-0123456789"}))
            .await
            .unwrap();
        assert_eq!(out["aws_security_group"], "sg-0123456789");
        assert_eq!(out["comment"], "peered vpc");
    }

    #[tokio::test]
    async fn test_exactly_one_address_required() {
        let fake = fake_with_entries().await;
        let err = read(&fake, json!({"project_id": "p1"})).await.unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));

        let err = read(
            &fake,
            json!({"project_id": "p1", "ip_address": "179.154.226.12", "cidr_block": "179.154.226.40/32"}),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Exactly one of"));
        assert_eq!(fake.calls(FakeCall::GetAccessListEntry).await, 0);
    }

    #[tokio::test]
    async fn test_missing_entry_names_project_and_entry() {
        let fake = fake_with_entries().await;
        let err = read(&fake, json!({"project_id": "p1", "ip_address": "10.0.0.1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
        assert!(err.to_string().contains("(10.0.0.1) in project (p1)"));
    }
}
