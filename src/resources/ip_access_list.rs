//! `atlas_project_ip_access_list`: one entry of a project's IP access list.
//!
//! An entry is addressed by exactly one of `ip_address`, `cidr_block` or
//! `aws_security_group`. Atlas echoes a `/32` CIDR block for single addresses;
//! state keeps only the field the entry was created or imported with, so the
//! echo never shows up as a diff. Entries cannot be modified in place.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{state_id_of, ResourceContext};
use crate::client::AccessListEntry;
use crate::error::ProviderError;
use crate::schema::{Attribute, Diagnostic, Schema};
use crate::state_id::{split_import_id, StateId};
use crate::types::{diff_attributes, ImportedResource, PlanResult};
use crate::validation;

/// Resource type name.
pub const TYPE_NAME: &str = "atlas_project_ip_access_list";

/// The mutually exclusive address attributes.
pub const ADDRESS_FIELDS: [&str; 3] = ["ip_address", "cidr_block", "aws_security_group"];

const IMPORT_FORMAT: &str = "{project_id}-{entry}";

/// Attributes of an access-list entry, as configured and as persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessListState {
    /// Project the entry belongs to.
    pub project_id: String,
    /// Single IP address.
    #[serde(default)]
    pub ip_address: Option<String>,
    /// CIDR range.
    #[serde(default)]
    pub cidr_block: Option<String>,
    /// AWS security group id.
    #[serde(default)]
    pub aws_security_group: Option<String>,
    /// Free-form note.
    #[serde(default)]
    pub comment: Option<String>,
    /// Encoded composite state id.
    #[serde(default)]
    pub id: Option<String>,
}

impl AccessListState {
    /// Parse a state or configuration object.
    pub fn from_value(value: Value) -> Result<Self, ProviderError> {
        Ok(serde_json::from_value(value)?)
    }

    /// The one address the entry is keyed by.
    pub fn address(&self) -> Result<&str, ProviderError> {
        let set: Vec<&str> = [&self.ip_address, &self.cidr_block, &self.aws_security_group]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .filter(|s| !s.is_empty())
            .collect();
        match set.as_slice() {
            [address] => Ok(*address),
            _ => Err(ProviderError::Validation(format!(
                "exactly one of {} must be set",
                ADDRESS_FIELDS.join(", ")
            ))),
        }
    }

    /// Build state from a remote entry, keeping only the field `key` names.
    fn from_entry(project_id: &str, key: &str, entry: &AccessListEntry, id: &StateId) -> Self {
        let mut state = Self {
            project_id: project_id.to_string(),
            comment: entry.comment.clone(),
            id: Some(id.encode()),
            ..Default::default()
        };
        if entry.aws_security_group.as_deref() == Some(key) {
            state.aws_security_group = Some(key.to_string());
        } else if key.contains('/') {
            state.cidr_block = Some(key.to_string());
        } else {
            state.ip_address = Some(key.to_string());
        }
        state
    }
}

/// Schema of `atlas_project_ip_access_list`.
pub fn schema() -> Schema {
    Schema::v0()
        .with_description("An entry of a project's IP access list")
        .with_attribute(
            "project_id",
            Attribute::required_string().with_force_new(),
        )
        .with_attribute(
            "ip_address",
            Attribute::optional_string()
                .with_force_new()
                .with_description("Single IPv4 or IPv6 address"),
        )
        .with_attribute(
            "cidr_block",
            Attribute::optional_string()
                .with_force_new()
                .with_description("Address range in CIDR notation"),
        )
        .with_attribute(
            "aws_security_group",
            Attribute::optional_string()
                .with_force_new()
                .with_description("Security group of a peered AWS VPC"),
        )
        .with_attribute("comment", Attribute::optional_string().with_force_new())
        .with_attribute("id", Attribute::computed_string())
        .with_exactly_one_of(ADDRESS_FIELDS)
}

/// Check an entry configuration against the schema.
pub fn validate(config: &Value) -> Vec<Diagnostic> {
    validation::validate(&schema(), config)
}

fn entry_state_id(project_id: &str, entry: &str) -> StateId {
    StateId::new().with("project_id", project_id).with("entry", entry)
}

/// Plan a create or an update. Any change replaces the entry.
pub fn plan(prior: Option<Value>, proposed: Value) -> Result<PlanResult, ProviderError> {
    let prior = prior.filter(|p| !p.is_null());
    let mut plan = diff_attributes(&schema(), prior.as_ref(), &proposed);
    if prior.is_some() && !plan.changes.is_empty() {
        plan.requires_replace = true;
    }

    let id = match &prior {
        Some(prior) if !plan.requires_replace => prior.get("id").cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    };
    if let Some(planned) = plan.planned_state.as_object_mut() {
        planned.insert("id".to_string(), id);
    }
    Ok(plan)
}

/// Add the entry, then read it back.
pub async fn create(ctx: ResourceContext<'_>, planned: Value) -> Result<Value, ProviderError> {
    let planned = AccessListState::from_value(planned)?;
    let address = planned.address()?;

    let entry = AccessListEntry {
        ip_address: planned.ip_address.clone(),
        cidr_block: planned.cidr_block.clone(),
        aws_security_group: planned.aws_security_group.clone(),
        comment: planned.comment.clone(),
        group_id: None,
    };
    ctx.api
        .create_access_list_entry(&planned.project_id, &entry)
        .await
        .map_err(|e| {
            ProviderError::api(
                format!(
                    "error creating access list entry ({}) in project ({})",
                    address, planned.project_id
                ),
                e,
            )
        })?;
    info!(project_id = %planned.project_id, entry = address, "Created access list entry");

    let id = entry_state_id(&planned.project_id, address);
    match read_state(ctx, &id).await? {
        Some(state) => Ok(serde_json::to_value(state)?),
        None => Err(ProviderError::NotFound(format!(
            "access list entry ({}) in project ({})",
            address, planned.project_id
        ))),
    }
}

/// Refresh the state, or return `Null` if the entry no longer exists.
pub async fn read(ctx: ResourceContext<'_>, current: Value) -> Result<Value, ProviderError> {
    let id = state_id_of(&current)?;
    match read_state(ctx, &id).await? {
        Some(state) => Ok(serde_json::to_value(state)?),
        None => Ok(Value::Null),
    }
}

async fn read_state(
    ctx: ResourceContext<'_>,
    id: &StateId,
) -> Result<Option<AccessListState>, ProviderError> {
    let project_id = id.require("project_id")?;
    let key = id.require("entry")?;

    match ctx.api.get_access_list_entry(project_id, key).await {
        Ok(entry) => Ok(Some(AccessListState::from_entry(project_id, key, &entry, id))),
        Err(e) if e.is_not_found() => {
            info!(project_id, entry = key, "Access list entry no longer exists; dropping from state");
            Ok(None)
        },
        Err(e) => Err(ProviderError::api(
            format!(
                "error getting access list entry ({}) in project ({})",
                key, project_id
            ),
            e,
        )),
    }
}

/// Entries are immutable; every attribute forces replacement.
pub async fn update(
    _ctx: ResourceContext<'_>,
    _prior: Value,
    _planned: Value,
) -> Result<Value, ProviderError> {
    Err(ProviderError::Unimplemented(format!(
        "{} entries cannot be updated in place",
        TYPE_NAME
    )))
}

/// Remove the entry. An entry that is already gone counts as deleted.
pub async fn delete(ctx: ResourceContext<'_>, current: Value) -> Result<(), ProviderError> {
    let id = state_id_of(&current)?;
    let project_id = id.require("project_id")?;
    let key = id.require("entry")?;

    match ctx.api.delete_access_list_entry(project_id, key).await {
        Ok(()) => {
            info!(project_id, entry = key, "Deleted access list entry");
            Ok(())
        },
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(ProviderError::api(
            format!(
                "error deleting access list entry ({}) in project ({})",
                key, project_id
            ),
            e,
        )),
    }
}

/// Import `{project_id}-{entry}`.
pub async fn import(
    ctx: ResourceContext<'_>,
    import_id: &str,
) -> Result<Vec<ImportedResource>, ProviderError> {
    let (project_id, key) = split_import_id(import_id, IMPORT_FORMAT)?;
    match read_state(ctx, &entry_state_id(project_id, key)).await? {
        Some(state) => Ok(vec![ImportedResource::new(
            TYPE_NAME,
            serde_json::to_value(state)?,
        )]),
        None => Err(ProviderError::NotFound(format!(
            "couldn't import access list entry ({}) in project ({})",
            key, project_id
        ))),
    }
}
