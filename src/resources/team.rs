//! `atlas_team`: an organization team and its members.
//!
//! State is keyed by the composite id `{org_id, id}`. Membership is always
//! read from the team's assigned-users endpoint and stored sorted.
//!
//! Changing `usernames` replaces the whole membership: every desired username
//! is resolved first, then all current members are removed and the desired
//! ones added in a single call. A failure after the removals leaves the team
//! empty and is reported as such.
//!
//! Deleting a team that is still assigned to a project fails with
//! [`TEAM_ASSIGNED_TO_PROJECT`]. Delete then looks for the project holding the
//! assignment, removes it, and tries again, within the configured budget.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{state_id_of, ResourceContext};
use crate::client::{AtlasApi, NewTeam, TEAM_ASSIGNED_TO_PROJECT};
use crate::error::{ApiError, ProviderError};
use crate::membership::{index_by_username, resolve_user_ids, MembershipDelta};
use crate::retry::{retry_with_policy, Attempt};
use crate::schema::{Attribute, Diagnostic, Schema};
use crate::state_id::{split_import_id, StateId};
use crate::types::{diff_attributes, ImportedResource, PlanResult};
use crate::validation;

/// Resource type name.
pub const TYPE_NAME: &str = "atlas_team";

const IMPORT_FORMAT: &str = "{org_id}-{team_id}";
const PROJECTS_PAGE_SIZE: u32 = 500;
const COMPUTED: [&str; 2] = ["team_id", "id"];

/// Persisted attributes of a team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamState {
    /// Owning organization.
    pub org_id: String,
    /// Team name.
    pub name: String,
    /// Member usernames.
    #[serde(default)]
    pub usernames: Vec<String>,
    /// Atlas team id.
    #[serde(default)]
    pub team_id: Option<String>,
    /// Encoded composite state id.
    #[serde(default)]
    pub id: Option<String>,
}

impl TeamState {
    fn from_value(value: Value) -> Result<Self, ProviderError> {
        Ok(serde_json::from_value(value)?)
    }

    fn sorted_usernames(&self) -> Vec<String> {
        self.usernames
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Schema of `atlas_team`.
pub fn schema() -> Schema {
    Schema::v0()
        .with_description("A team of users within an Atlas organization")
        .with_attribute(
            "org_id",
            Attribute::required_string()
                .with_force_new()
                .with_description("Organization that owns the team"),
        )
        .with_attribute("name", Attribute::required_string().with_description("Team name"))
        .with_attribute(
            "usernames",
            Attribute::required_string_set().with_description("Usernames of the team members"),
        )
        .with_attribute("team_id", Attribute::computed_string().with_description("Atlas team id"))
        .with_attribute("id", Attribute::computed_string())
}

/// Check a team configuration against the schema.
pub fn validate(config: &Value) -> Vec<Diagnostic> {
    validation::validate(&schema(), config)
}

fn team_state_id(org_id: &str, team_id: &str) -> StateId {
    StateId::new().with("org_id", org_id).with("id", team_id)
}

fn normalize_usernames(state: &mut Value) {
    if let Some(Value::Array(names)) = state.get_mut("usernames") {
        names.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
        names.dedup();
    }
}

/// Plan a create (no `prior`) or an update.
pub fn plan(prior: Option<Value>, mut proposed: Value) -> Result<PlanResult, ProviderError> {
    normalize_usernames(&mut proposed);
    let prior = prior.filter(|p| !p.is_null()).map(|mut p| {
        normalize_usernames(&mut p);
        p
    });

    let mut plan = diff_attributes(&schema(), prior.as_ref(), &proposed);
    let keep_computed = prior.is_some() && !plan.requires_replace;
    if let Some(planned) = plan.planned_state.as_object_mut() {
        for key in COMPUTED {
            let value = match &prior {
                Some(prior) if keep_computed => prior.get(key).cloned().unwrap_or(Value::Null),
                _ => Value::Null,
            };
            planned.insert(key.to_string(), value);
        }
    }
    Ok(plan)
}

/// Create the team, then read it back.
pub async fn create(ctx: ResourceContext<'_>, planned: Value) -> Result<Value, ProviderError> {
    let planned = TeamState::from_value(planned)?;
    let new_team = NewTeam {
        name: planned.name.clone(),
        usernames: planned.sorted_usernames(),
    };

    let team = ctx
        .api
        .create_team(&planned.org_id, &new_team)
        .await
        .map_err(|e| {
            ProviderError::api(
                format!(
                    "error creating team ({}) in organization ({})",
                    planned.name, planned.org_id
                ),
                e,
            )
        })?;
    info!(org_id = %planned.org_id, team_id = %team.id, "Created team");

    read_existing(ctx, &team_state_id(&planned.org_id, &team.id)).await
}

/// Refresh the state, or return `Null` if the team no longer exists.
pub async fn read(ctx: ResourceContext<'_>, current: Value) -> Result<Value, ProviderError> {
    let id = state_id_of(&current)?;
    match read_state(ctx, &id).await? {
        Some(state) => Ok(serde_json::to_value(state)?),
        None => Ok(Value::Null),
    }
}

async fn read_existing(ctx: ResourceContext<'_>, id: &StateId) -> Result<Value, ProviderError> {
    match read_state(ctx, id).await? {
        Some(state) => Ok(serde_json::to_value(state)?),
        None => Err(ProviderError::NotFound(format!(
            "team ({}) in organization ({})",
            id.get("id").unwrap_or_default(),
            id.get("org_id").unwrap_or_default()
        ))),
    }
}

async fn read_state(
    ctx: ResourceContext<'_>,
    id: &StateId,
) -> Result<Option<TeamState>, ProviderError> {
    let org_id = id.require("org_id")?;
    let team_id = id.require("id")?;

    let team = match ctx.api.get_team(org_id, team_id).await {
        Ok(team) => team,
        Err(e) if e.is_not_found() => {
            info!(org_id, team_id, "Team no longer exists; dropping from state");
            return Ok(None);
        },
        Err(e) => {
            return Err(ProviderError::api(
                format!(
                    "error getting team ({}) in organization ({})",
                    team_id, org_id
                ),
                e,
            ))
        },
    };

    let users = ctx
        .api
        .list_team_users(org_id, team_id)
        .await
        .map_err(|e| {
            ProviderError::api(
                format!(
                    "error getting users of team ({}) in organization ({})",
                    team_id, org_id
                ),
                e,
            )
        })?;
    let usernames: BTreeSet<String> = users.into_iter().map(|u| u.username).collect();

    Ok(Some(TeamState {
        org_id: org_id.to_string(),
        name: team.name,
        usernames: usernames.into_iter().collect(),
        team_id: Some(team.id),
        id: Some(id.encode()),
    }))
}

/// Apply name and membership changes, then read the team back.
pub async fn update(
    ctx: ResourceContext<'_>,
    prior: Value,
    planned: Value,
) -> Result<Value, ProviderError> {
    let id = state_id_of(&prior)?;
    let org_id = id.require("org_id")?;
    let team_id = id.require("id")?;
    let prior = TeamState::from_value(prior)?;
    let planned = TeamState::from_value(planned)?;

    if prior.name != planned.name {
        ctx.api
            .rename_team(org_id, team_id, &planned.name)
            .await
            .map_err(|e| {
                ProviderError::api(
                    format!(
                        "error renaming team ({}) in organization ({}) to ({})",
                        team_id, org_id, planned.name
                    ),
                    e,
                )
            })?;
        info!(org_id, team_id, name = %planned.name, "Renamed team");
    }

    let desired = planned.sorted_usernames();
    if desired != prior.sorted_usernames() {
        replace_members(ctx, org_id, team_id, &desired).await?;
    }

    read_existing(ctx, &id).await
}

async fn replace_members(
    ctx: ResourceContext<'_>,
    org_id: &str,
    team_id: &str,
    desired: &[String],
) -> Result<(), ProviderError> {
    let current = ctx
        .api
        .list_team_users(org_id, team_id)
        .await
        .map_err(|e| {
            ProviderError::api(
                format!(
                    "error getting users of team ({}) in organization ({})",
                    team_id, org_id
                ),
                e,
            )
        })?;

    let delta = MembershipDelta::between(desired, current.iter().map(|u| u.username.as_str()));
    debug!(
        org_id,
        team_id,
        to_add = ?delta.to_add,
        to_remove = ?delta.to_remove,
        retained = delta.retained.len(),
        "Replacing team members"
    );

    // Resolve before touching the team so an unknown user changes nothing.
    let cached = index_by_username(&current);
    let user_ids = resolve_user_ids(ctx.api, desired, &cached).await?;

    for user in &current {
        ctx.api
            .remove_user_from_team(org_id, team_id, &user.id)
            .await
            .map_err(|e| {
                ProviderError::api(
                    format!(
                        "error removing user ({}) from team ({}) in organization ({})",
                        user.username, team_id, org_id
                    ),
                    e,
                )
            })?;
    }

    if !user_ids.is_empty() {
        ctx.api
            .add_users_to_team(org_id, team_id, &user_ids)
            .await
            .map_err(|e| {
                ProviderError::api(
                    format!(
                        "error adding users to team ({}) in organization ({}); \
                         previous members were already removed and the team was left without members",
                        team_id, org_id
                    ),
                    e,
                )
            })?;
    }

    info!(org_id, team_id, members = user_ids.len(), "Replaced team members");
    Ok(())
}

/// Delete the team, unassigning it from projects as needed.
pub async fn delete(ctx: ResourceContext<'_>, current: Value) -> Result<(), ProviderError> {
    let id = state_id_of(&current)?;
    let org_id = id.require("org_id")?;
    let team_id = id.require("id")?;
    let api = ctx.api;

    let operation = format!("delete team ({}) in organization ({})", team_id, org_id);
    retry_with_policy(&ctx.delete_policy, ctx.clock, ctx.cancel, &operation, move || {
        delete_attempt(api, org_id, team_id)
    })
    .await
}

async fn delete_attempt(api: &dyn AtlasApi, org_id: &str, team_id: &str) -> Attempt<()> {
    match api.remove_team_from_org(org_id, team_id).await {
        Ok(()) => {
            info!(org_id, team_id, "Deleted team");
            Attempt::Done(())
        },
        Err(e) if e.is_not_found() => {
            info!(org_id, team_id, "Team already deleted");
            Attempt::Done(())
        },
        Err(e) if e.error_code() == Some(TEAM_ASSIGNED_TO_PROJECT) => {
            resolve_assignment(api, org_id, team_id, e).await
        },
        Err(e) => Attempt::Abort(ProviderError::api(
            format!(
                "error deleting team ({}) in organization ({})",
                team_id, org_id
            ),
            e,
        )),
    }
}

async fn resolve_assignment(
    api: &dyn AtlasApi,
    org_id: &str,
    team_id: &str,
    conflict: ApiError,
) -> Attempt<()> {
    let project_id = match find_assigned_project(api, team_id).await {
        Ok(Some(project_id)) => project_id,
        Ok(None) => {
            warn!(
                org_id,
                team_id, "Team is reported as assigned to a project, but no project lists it"
            );
            return Attempt::Retry(ProviderError::api(
                format!(
                    "error deleting team ({}) in organization ({}); no assigned project found",
                    team_id, org_id
                ),
                conflict,
            ));
        },
        Err(e) => return Attempt::Abort(e),
    };

    match api.remove_team_from_project(&project_id, team_id).await {
        Ok(()) => {
            info!(org_id, team_id, project_id = %project_id, "Unassigned team from project");
            Attempt::Retry(ProviderError::FailedPrecondition(format!(
                "team ({}) was assigned to project ({})",
                team_id, project_id
            )))
        },
        Err(e) => Attempt::Abort(ProviderError::api(
            format!(
                "error removing team ({}) from project ({})",
                team_id, project_id
            ),
            e,
        )),
    }
}

/// Find the first project, across all pages, that has `team_id` assigned.
async fn find_assigned_project(
    api: &dyn AtlasApi,
    team_id: &str,
) -> Result<Option<String>, ProviderError> {
    let mut page_num = 1;
    let mut seen: u64 = 0;

    loop {
        let page = api
            .list_projects(page_num, PROJECTS_PAGE_SIZE)
            .await
            .map_err(|e| ProviderError::api("error listing projects", e))?;
        let fetched = page.results.len();

        for project in &page.results {
            let teams = api.list_project_teams(&project.id).await.map_err(|e| {
                ProviderError::api(
                    format!("error getting teams assigned to project ({})", project.id),
                    e,
                )
            })?;
            if teams.iter().any(|t| t.team_id == team_id) {
                return Ok(Some(project.id.clone()));
            }
        }

        seen += fetched as u64;
        let more = match page.total_count {
            Some(total) => seen < total,
            None => fetched == PROJECTS_PAGE_SIZE as usize,
        };
        if fetched == 0 || !more {
            return Ok(None);
        }
        page_num += 1;
    }
}

/// Import `{org_id}-{team_id}`.
pub async fn import(
    ctx: ResourceContext<'_>,
    import_id: &str,
) -> Result<Vec<ImportedResource>, ProviderError> {
    let (org_id, team_id) = split_import_id(import_id, IMPORT_FORMAT)?;

    let team = ctx.api.get_team(org_id, team_id).await.map_err(|e| {
        ProviderError::api(
            format!(
                "couldn't import team ({}) in organization ({})",
                team_id, org_id
            ),
            e,
        )
    })?;

    let state = read_existing(ctx, &team_state_id(org_id, &team.id)).await?;
    Ok(vec![ImportedResource::new(TYPE_NAME, state)])
}
