//! Atlas Admin API client.
//!
//! [`AtlasApi`] is the seam between the provider's lifecycle handlers and the
//! remote service. [`AtlasClient`] talks HTTP; [`FakeAtlas`] keeps everything in
//! memory for tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

pub mod fake;
pub mod http;

pub use fake::{FakeAtlas, FakeCall};
pub use http::AtlasClient;

/// Result type for API calls.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Structured error code Atlas returns when a team cannot be deleted because a
/// project still references it.
pub const TEAM_ASSIGNED_TO_PROJECT: &str = "CANNOT_DELETE_TEAM_ASSIGNED_TO_PROJECT";

/// The subset of the Atlas Admin API this provider consumes.
#[async_trait]
pub trait AtlasApi: Send + Sync {
    // Teams

    /// Create a team in an organization.
    async fn create_team(&self, org_id: &str, team: &NewTeam) -> ApiResult<Team>;

    /// Fetch a team.
    async fn get_team(&self, org_id: &str, team_id: &str) -> ApiResult<Team>;

    /// Rename a team.
    async fn rename_team(&self, org_id: &str, team_id: &str, name: &str) -> ApiResult<Team>;

    /// List the users currently assigned to a team, across all pages.
    async fn list_team_users(&self, org_id: &str, team_id: &str) -> ApiResult<Vec<AtlasUser>>;

    /// Add users, by id, to a team.
    async fn add_users_to_team(
        &self,
        org_id: &str,
        team_id: &str,
        user_ids: &[String],
    ) -> ApiResult<Vec<AtlasUser>>;

    /// Remove one user from a team.
    async fn remove_user_from_team(&self, org_id: &str, team_id: &str, user_id: &str)
        -> ApiResult<()>;

    /// Delete a team from its organization.
    async fn remove_team_from_org(&self, org_id: &str, team_id: &str) -> ApiResult<()>;

    /// Unassign a team from a project.
    async fn remove_team_from_project(&self, project_id: &str, team_id: &str) -> ApiResult<()>;

    // Users

    /// Look up a user by username.
    async fn get_user_by_name(&self, username: &str) -> ApiResult<AtlasUser>;

    // Projects

    /// List one page of the projects visible to the caller.
    async fn list_projects(&self, page_num: u32, items_per_page: u32) -> ApiResult<Page<Project>>;

    /// List the teams assigned to a project, across all pages.
    async fn list_project_teams(&self, project_id: &str) -> ApiResult<Vec<AssignedTeam>>;

    // Network access

    /// Add an entry to a project's IP access list.
    async fn create_access_list_entry(
        &self,
        project_id: &str,
        entry: &AccessListEntry,
    ) -> ApiResult<Vec<AccessListEntry>>;

    /// Fetch one access-list entry by its address, CIDR block or security group.
    async fn get_access_list_entry(&self, project_id: &str, entry: &str)
        -> ApiResult<AccessListEntry>;

    /// Remove one access-list entry.
    async fn delete_access_list_entry(&self, project_id: &str, entry: &str) -> ApiResult<()>;
}

/// Request body for team creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTeam {
    /// Team name.
    pub name: String,
    /// Usernames of the initial members.
    pub usernames: Vec<String>,
}

/// A team as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    /// Team id.
    pub id: String,
    /// Team name.
    pub name: String,
}

/// An Atlas user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtlasUser {
    /// User id.
    pub id: String,
    /// Login name.
    pub username: String,
    /// Contact address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
    /// Given name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    /// Family name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

impl AtlasUser {
    /// A user with only the identifying fields set.
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            email_address: None,
            first_name: None,
            last_name: None,
        }
    }
}

/// A project (Atlas "group").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Project id.
    pub id: String,
    /// Project name.
    pub name: String,
    /// Owning organization.
    #[serde(default)]
    pub org_id: String,
}

/// A team's assignment to a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedTeam {
    /// The assigned team.
    pub team_id: String,
    /// Project roles granted to the team.
    #[serde(default)]
    pub role_names: Vec<String>,
}

/// One entry of a project's IP access list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessListEntry {
    /// A single IP address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    /// A CIDR range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr_block: Option<String>,
    /// An AWS security group id, for peered VPCs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_security_group: Option<String>,
    /// Free-form note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Project the entry belongs to, echoed by the API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

impl AccessListEntry {
    /// Whether `key` addresses this entry through any of its address forms.
    pub fn matches(&self, key: &str) -> bool {
        [&self.ip_address, &self.cidr_block, &self.aws_security_group]
            .into_iter()
            .any(|field| field.as_deref() == Some(key))
    }
}

/// A page of list results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    /// Items on this page.
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
    /// Total items across all pages, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_deserializes_camel_case() {
        let user: AtlasUser = serde_json::from_value(json!({
            "id": "u1",
            "username": "alice@example.com",
            "emailAddress": "alice@example.com",
            "firstName": "Alice",
            "roles": []
        }))
        .unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(user.first_name.as_deref(), Some("Alice"));
        assert_eq!(user.last_name, None);
    }

    #[test]
    fn test_access_list_entry_serializes_only_set_fields() {
        let entry = AccessListEntry {
            cidr_block: Some("10.0.0.0/24".into()),
            comment: Some("office".into()),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&entry).unwrap(),
            json!({"cidrBlock": "10.0.0.0/24", "comment": "office"})
        );
    }

    #[test]
    fn test_access_list_entry_matches_any_address_form() {
        let entry = AccessListEntry {
            ip_address: Some("10.0.0.1".into()),
            cidr_block: Some("10.0.0.1/32".into()),
            ..Default::default()
        };
        assert!(entry.matches("10.0.0.1"));
        assert!(entry.matches("10.0.0.1/32"));
        assert!(!entry.matches("10.0.0.2"));
    }

    #[test]
    fn test_page_defaults() {
        let page: Page<Project> = serde_json::from_value(json!({})).unwrap();
        assert!(page.results.is_empty());
        assert_eq!(page.total_count, None);

        let page: Page<AssignedTeam> = serde_json::from_value(json!({
            "results": [{"teamId": "t1", "roleNames": ["GROUP_OWNER"]}],
            "totalCount": 1
        }))
        .unwrap();
        assert_eq!(page.results[0].team_id, "t1");
        assert_eq!(page.total_count, Some(1));
    }
}
