//! In-memory Atlas backend for tests.
//!
//! Behaves like the real service for the calls the provider makes, including
//! the delete conflict when a team is still assigned to a project, and lets a
//! test inject one-shot failures and inspect how often each call was made.
//!
//! # Example
//! ```
//! # tokio_test::block_on(async {
//! use atlas_provider::client::{AtlasApi, FakeAtlas, FakeCall, NewTeam};
//!
//! let fake = FakeAtlas::new();
//! fake.add_user("alice").await;
//!
//! let team = fake
//!     .create_team("o1", &NewTeam { name: "eng".into(), usernames: vec!["alice".into()] })
//!     .await
//!     .unwrap();
//! assert_eq!(team.id, "t1");
//! assert_eq!(fake.calls(FakeCall::CreateTeam).await, 1);
//! # });
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{
    AccessListEntry, ApiResult, AssignedTeam, AtlasApi, AtlasUser, NewTeam, Page, Project, Team,
    TEAM_ASSIGNED_TO_PROJECT,
};
use crate::error::ApiError;

/// The calls [`FakeAtlas`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeCall {
    /// [`AtlasApi::create_team`]
    CreateTeam,
    /// [`AtlasApi::get_team`]
    GetTeam,
    /// [`AtlasApi::rename_team`]
    RenameTeam,
    /// [`AtlasApi::list_team_users`]
    ListTeamUsers,
    /// [`AtlasApi::add_users_to_team`]
    AddUsersToTeam,
    /// [`AtlasApi::remove_user_from_team`]
    RemoveUserFromTeam,
    /// [`AtlasApi::remove_team_from_org`]
    RemoveTeamFromOrg,
    /// [`AtlasApi::remove_team_from_project`]
    RemoveTeamFromProject,
    /// [`AtlasApi::get_user_by_name`]
    GetUserByName,
    /// [`AtlasApi::list_projects`]
    ListProjects,
    /// [`AtlasApi::list_project_teams`]
    ListProjectTeams,
    /// [`AtlasApi::create_access_list_entry`]
    CreateAccessListEntry,
    /// [`AtlasApi::get_access_list_entry`]
    GetAccessListEntry,
    /// [`AtlasApi::delete_access_list_entry`]
    DeleteAccessListEntry,
}

#[derive(Debug, Clone)]
struct FakeTeam {
    org_id: String,
    name: String,
    member_ids: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct State {
    next_team: u64,
    next_user: u64,
    users: BTreeMap<String, AtlasUser>,
    teams: BTreeMap<String, FakeTeam>,
    projects: Vec<Project>,
    project_teams: HashMap<String, Vec<String>>,
    access_lists: HashMap<String, Vec<AccessListEntry>>,
    unauthorized_lookups: HashSet<String>,
    hang_project_teams: bool,
    scripted: HashMap<FakeCall, VecDeque<ApiError>>,
    calls: HashMap<FakeCall, usize>,
}

impl State {
    /// Count the call and pop a scripted failure, if one is queued.
    fn record(&mut self, call: FakeCall) -> ApiResult<()> {
        *self.calls.entry(call).or_default() += 1;
        match self.scripted.get_mut(&call).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn team(&self, org_id: &str, team_id: &str) -> ApiResult<&FakeTeam> {
        self.teams
            .get(team_id)
            .filter(|t| t.org_id == org_id)
            .ok_or_else(|| ApiError::NotFound(format!("team {} not found in org {}", team_id, org_id)))
    }

    fn team_mut(&mut self, org_id: &str, team_id: &str) -> ApiResult<&mut FakeTeam> {
        self.teams
            .get_mut(team_id)
            .filter(|t| t.org_id == org_id)
            .ok_or_else(|| ApiError::NotFound(format!("team {} not found in org {}", team_id, org_id)))
    }

    fn user_by_id(&self, user_id: &str) -> Option<&AtlasUser> {
        self.users.values().find(|u| u.id == user_id)
    }

    fn members(&self, team: &FakeTeam) -> Vec<AtlasUser> {
        team.member_ids
            .iter()
            .filter_map(|id| self.user_by_id(id).cloned())
            .collect()
    }
}

/// In-memory implementation of [`AtlasApi`].
#[derive(Debug, Default)]
pub struct FakeAtlas {
    state: Mutex<State>,
}

impl FakeAtlas {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user and return it. Ids are assigned as `u1`, `u2`, ...
    pub async fn add_user(&self, username: &str) -> AtlasUser {
        let mut state = self.state.lock().await;
        state.next_user += 1;
        let user = AtlasUser::new(format!("u{}", state.next_user), username);
        state.users.insert(username.to_string(), user.clone());
        user
    }

    /// Create a team directly, bypassing call recording.
    pub async fn seed_team(&self, org_id: &str, name: &str, usernames: &[&str]) -> Team {
        let mut state = self.state.lock().await;
        state.next_team += 1;
        let id = format!("t{}", state.next_team);
        let member_ids = usernames
            .iter()
            .filter_map(|u| state.users.get(*u).map(|user| user.id.clone()))
            .collect();
        state.teams.insert(
            id.clone(),
            FakeTeam {
                org_id: org_id.to_string(),
                name: name.to_string(),
                member_ids,
            },
        );
        Team {
            id,
            name: name.to_string(),
        }
    }

    /// Register a project.
    pub async fn add_project(&self, org_id: &str, project_id: &str, name: &str) {
        let mut state = self.state.lock().await;
        state.projects.push(Project {
            id: project_id.to_string(),
            name: name.to_string(),
            org_id: org_id.to_string(),
        });
    }

    /// Assign a team to a project.
    pub async fn assign_team_to_project(&self, project_id: &str, team_id: &str) {
        let mut state = self.state.lock().await;
        state
            .project_teams
            .entry(project_id.to_string())
            .or_default()
            .push(team_id.to_string());
    }

    /// Delete a team out of band, as another actor would.
    pub async fn delete_team_out_of_band(&self, team_id: &str) {
        self.state.lock().await.teams.remove(team_id);
    }

    /// Make every lookup of `username` fail with 401.
    pub async fn deny_user_lookup(&self, username: &str) {
        self.state
            .lock()
            .await
            .unauthorized_lookups
            .insert(username.to_string());
    }

    /// Make every later [`AtlasApi::list_project_teams`] call wait forever,
    /// like a request that never gets an answer.
    pub async fn hang_project_team_listing(&self) {
        self.state.lock().await.hang_project_teams = true;
    }

    /// Queue a failure for the next invocation of `call`.
    pub async fn fail_next(&self, call: FakeCall, err: ApiError) {
        self.state
            .lock()
            .await
            .scripted
            .entry(call)
            .or_default()
            .push_back(err);
    }

    /// How many times `call` was made.
    pub async fn calls(&self, call: FakeCall) -> usize {
        self.state.lock().await.calls.get(&call).copied().unwrap_or(0)
    }

    /// Current member usernames of a team, sorted.
    pub async fn member_usernames(&self, team_id: &str) -> Vec<String> {
        let state = self.state.lock().await;
        let mut names: Vec<String> = state
            .teams
            .get(team_id)
            .map(|team| state.members(team))
            .unwrap_or_default()
            .into_iter()
            .map(|u| u.username)
            .collect();
        names.sort();
        names
    }

    /// Whether a team exists.
    pub async fn has_team(&self, team_id: &str) -> bool {
        self.state.lock().await.teams.contains_key(team_id)
    }

    /// Projects a team is assigned to.
    pub async fn projects_of_team(&self, team_id: &str) -> Vec<String> {
        let state = self.state.lock().await;
        let mut projects: Vec<String> = state
            .project_teams
            .iter()
            .filter(|(_, teams)| teams.iter().any(|t| t == team_id))
            .map(|(p, _)| p.clone())
            .collect();
        projects.sort();
        projects
    }
}

#[async_trait]
impl AtlasApi for FakeAtlas {
    async fn create_team(&self, org_id: &str, team: &NewTeam) -> ApiResult<Team> {
        let mut state = self.state.lock().await;
        state.record(FakeCall::CreateTeam)?;

        let mut member_ids = BTreeSet::new();
        for username in &team.usernames {
            let user = state
                .users
                .get(username)
                .ok_or_else(|| ApiError::NotFound(format!("user {} not found", username)))?;
            member_ids.insert(user.id.clone());
        }

        state.next_team += 1;
        let id = format!("t{}", state.next_team);
        state.teams.insert(
            id.clone(),
            FakeTeam {
                org_id: org_id.to_string(),
                name: team.name.clone(),
                member_ids,
            },
        );
        Ok(Team {
            id,
            name: team.name.clone(),
        })
    }

    async fn get_team(&self, org_id: &str, team_id: &str) -> ApiResult<Team> {
        let mut state = self.state.lock().await;
        state.record(FakeCall::GetTeam)?;
        let team = state.team(org_id, team_id)?;
        Ok(Team {
            id: team_id.to_string(),
            name: team.name.clone(),
        })
    }

    async fn rename_team(&self, org_id: &str, team_id: &str, name: &str) -> ApiResult<Team> {
        let mut state = self.state.lock().await;
        state.record(FakeCall::RenameTeam)?;
        state.team_mut(org_id, team_id)?.name = name.to_string();
        Ok(Team {
            id: team_id.to_string(),
            name: name.to_string(),
        })
    }

    async fn list_team_users(&self, org_id: &str, team_id: &str) -> ApiResult<Vec<AtlasUser>> {
        let mut state = self.state.lock().await;
        state.record(FakeCall::ListTeamUsers)?;
        let team = state.team(org_id, team_id)?;
        Ok(state.members(team))
    }

    async fn add_users_to_team(
        &self,
        org_id: &str,
        team_id: &str,
        user_ids: &[String],
    ) -> ApiResult<Vec<AtlasUser>> {
        let mut state = self.state.lock().await;
        state.record(FakeCall::AddUsersToTeam)?;
        if let Some(unknown) = user_ids.iter().find(|id| state.user_by_id(id).is_none()) {
            return Err(ApiError::NotFound(format!("user {} not found", unknown)));
        }
        let team = state.team_mut(org_id, team_id)?;
        team.member_ids.extend(user_ids.iter().cloned());
        let team = state.team(org_id, team_id)?;
        Ok(state.members(team))
    }

    async fn remove_user_from_team(
        &self,
        org_id: &str,
        team_id: &str,
        user_id: &str,
    ) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        state.record(FakeCall::RemoveUserFromTeam)?;
        if state.team_mut(org_id, team_id)?.member_ids.remove(user_id) {
            Ok(())
        } else {
            Err(ApiError::NotFound(format!(
                "user {} is not a member of team {}",
                user_id, team_id
            )))
        }
    }

    async fn remove_team_from_org(&self, org_id: &str, team_id: &str) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        state.record(FakeCall::RemoveTeamFromOrg)?;
        state.team(org_id, team_id)?;
        let assigned = state
            .project_teams
            .values()
            .any(|teams| teams.iter().any(|t| t == team_id));
        if assigned {
            return Err(ApiError::with_code(
                409,
                TEAM_ASSIGNED_TO_PROJECT,
                format!("team {} is assigned to a project", team_id),
            ));
        }
        state.teams.remove(team_id);
        Ok(())
    }

    async fn remove_team_from_project(&self, project_id: &str, team_id: &str) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        state.record(FakeCall::RemoveTeamFromProject)?;
        let teams = state.project_teams.get_mut(project_id).ok_or_else(|| {
            ApiError::NotFound(format!("project {} has no assigned teams", project_id))
        })?;
        let before = teams.len();
        teams.retain(|t| t != team_id);
        if teams.len() == before {
            return Err(ApiError::NotFound(format!(
                "team {} is not assigned to project {}",
                team_id, project_id
            )));
        }
        Ok(())
    }

    async fn get_user_by_name(&self, username: &str) -> ApiResult<AtlasUser> {
        let mut state = self.state.lock().await;
        state.record(FakeCall::GetUserByName)?;
        if state.unauthorized_lookups.contains(username) {
            return Err(ApiError::Unauthorized(format!(
                "not authorized to read user {}",
                username
            )));
        }
        state
            .users
            .get(username)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("user {} not found", username)))
    }

    async fn list_projects(&self, page_num: u32, items_per_page: u32) -> ApiResult<Page<Project>> {
        let mut state = self.state.lock().await;
        state.record(FakeCall::ListProjects)?;
        let per_page = items_per_page.max(1) as usize;
        let skip = (page_num.max(1) as usize - 1) * per_page;
        Ok(Page {
            results: state.projects.iter().skip(skip).take(per_page).cloned().collect(),
            total_count: Some(state.projects.len() as u64),
        })
    }

    async fn list_project_teams(&self, project_id: &str) -> ApiResult<Vec<AssignedTeam>> {
        let mut state = self.state.lock().await;
        state.record(FakeCall::ListProjectTeams)?;
        if state.hang_project_teams {
            drop(state);
            return std::future::pending().await;
        }
        if !state.projects.iter().any(|p| p.id == project_id) {
            return Err(ApiError::NotFound(format!("project {} not found", project_id)));
        }
        Ok(state
            .project_teams
            .get(project_id)
            .map(|teams| {
                teams
                    .iter()
                    .map(|t| AssignedTeam {
                        team_id: t.clone(),
                        role_names: vec!["GROUP_READ_ONLY".to_string()],
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_access_list_entry(
        &self,
        project_id: &str,
        entry: &AccessListEntry,
    ) -> ApiResult<Vec<AccessListEntry>> {
        let mut state = self.state.lock().await;
        state.record(FakeCall::CreateAccessListEntry)?;

        let mut stored = entry.clone();
        stored.group_id = Some(project_id.to_string());
        if let (Some(ip), None) = (&stored.ip_address, &stored.cidr_block) {
            stored.cidr_block = Some(format!("{}/32", ip));
        }

        let list = state.access_lists.entry(project_id.to_string()).or_default();
        let key = [&entry.ip_address, &entry.cidr_block, &entry.aws_security_group]
            .into_iter()
            .flatten()
            .next()
            .cloned()
            .unwrap_or_default();
        list.retain(|e| !e.matches(&key));
        list.push(stored);
        Ok(list.clone())
    }

    async fn get_access_list_entry(
        &self,
        project_id: &str,
        entry: &str,
    ) -> ApiResult<AccessListEntry> {
        let mut state = self.state.lock().await;
        state.record(FakeCall::GetAccessListEntry)?;
        state
            .access_lists
            .get(project_id)
            .and_then(|list| list.iter().find(|e| e.matches(entry)))
            .cloned()
            .ok_or_else(|| {
                ApiError::NotFound(format!(
                    "access list entry {} not found in project {}",
                    entry, project_id
                ))
            })
    }

    async fn delete_access_list_entry(&self, project_id: &str, entry: &str) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        state.record(FakeCall::DeleteAccessListEntry)?;
        let list = state.access_lists.entry(project_id.to_string()).or_default();
        let before = list.len();
        list.retain(|e| !e.matches(entry));
        if list.len() == before {
            return Err(ApiError::NotFound(format!(
                "access list entry {} not found in project {}",
                entry, project_id
            )));
        }
        Ok(())
    }
}
