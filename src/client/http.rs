//! HTTP implementation of [`AtlasApi`] on top of `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    AccessListEntry, ApiResult, AssignedTeam, AtlasApi, AtlasUser, NewTeam, Page, Project, Team,
};
use crate::error::ApiError;

/// Public Atlas Admin API base URL.
pub const DEFAULT_BASE_URL: &str = "https://cloud.mongodb.com/api/atlas/v1.0";

/// Largest page the list endpoints accept.
const LIST_PAGE_SIZE: u32 = 500;

/// Error body returned by the Atlas API.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

/// Atlas API client authenticating with a bearer access token.
pub struct AtlasClient {
    http: HttpClient,
    base_url: Url,
    access_token: String,
}

impl AtlasClient {
    /// Create a new client.
    pub fn new(base_url: &str, access_token: impl Into<String>, timeout: Duration) -> ApiResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ApiError::Network(format!("invalid base URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::Network(format!(
                "invalid base URL '{}': cannot be a base",
                base_url
            )));
        }

        let http = HttpClient::builder()
            .timeout(timeout)
            .user_agent(concat!("atlas-provider/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            access_token: access_token.into(),
        })
    }

    /// Build a URL from path segments; each segment is percent-encoded, so a
    /// CIDR block's `/` stays inside its segment.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> ApiResult<reqwest::Response> {
        debug!(method = %method, path = url.path(), "Atlas API request");

        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(&self.access_token)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(ApiError::from)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        Err(error_from_response(status, &text))
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> ApiResult<T> {
        self.json(Method::GET, self.url(segments), None).await
    }

    /// Fetch one page of a paginated list.
    async fn get_page<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        page_num: u32,
        items_per_page: u32,
    ) -> ApiResult<Page<T>> {
        let mut url = self.url(segments);
        url.query_pairs_mut()
            .append_pair("pageNum", &page_num.to_string())
            .append_pair("itemsPerPage", &items_per_page.to_string());
        self.json(Method::GET, url, None).await
    }

    /// Fetch every page of a list. Stops once `totalCount` items have been
    /// seen, or at the first short page when the count is not reported.
    async fn get_all<T: DeserializeOwned>(&self, segments: &[&str]) -> ApiResult<Vec<T>> {
        let mut items = Vec::new();
        let mut page_num = 1;
        loop {
            let page: Page<T> = self.get_page(segments, page_num, LIST_PAGE_SIZE).await?;
            let fetched = page.results.len();
            items.extend(page.results);

            let more = match page.total_count {
                Some(total) => (items.len() as u64) < total,
                None => fetched == LIST_PAGE_SIZE as usize,
            };
            if fetched == 0 || !more {
                return Ok(items);
            }
            page_num += 1;
        }
    }

    async fn json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> ApiResult<T> {
        let response = self.send(method, url, body).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("failed to parse response: {}", e)))
    }

    async fn delete(&self, segments: &[&str]) -> ApiResult<()> {
        self.send(Method::DELETE, self.url(segments), None).await?;
        Ok(())
    }
}

/// Map a non-success response to an [`ApiError`].
fn error_from_response(status: StatusCode, text: &str) -> ApiError {
    let body: ErrorBody = serde_json::from_str(text).unwrap_or_default();
    let detail = body
        .detail
        .or(body.reason)
        .unwrap_or_else(|| if text.is_empty() { status.to_string() } else { text.to_string() });

    match status {
        StatusCode::UNAUTHORIZED => ApiError::Unauthorized(detail),
        StatusCode::FORBIDDEN => ApiError::Forbidden(detail),
        StatusCode::NOT_FOUND => ApiError::NotFound(detail),
        _ => ApiError::Api {
            status: status.as_u16(),
            error_code: body.error_code,
            detail,
        },
    }
}

fn to_body<T: Serialize + ?Sized>(value: &T) -> ApiResult<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| ApiError::InvalidResponse(format!("failed to encode request: {}", e)))
}

#[derive(Serialize)]
struct Rename<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct UserRef<'a> {
    id: &'a str,
}

#[async_trait]
impl AtlasApi for AtlasClient {
    async fn create_team(&self, org_id: &str, team: &NewTeam) -> ApiResult<Team> {
        self.json(Method::POST, self.url(&["orgs", org_id, "teams"]), Some(to_body(team)?))
            .await
    }

    async fn get_team(&self, org_id: &str, team_id: &str) -> ApiResult<Team> {
        self.get_json(&["orgs", org_id, "teams", team_id]).await
    }

    async fn rename_team(&self, org_id: &str, team_id: &str, name: &str) -> ApiResult<Team> {
        self.json(
            Method::PATCH,
            self.url(&["orgs", org_id, "teams", team_id]),
            Some(to_body(&Rename { name })?),
        )
        .await
    }

    async fn list_team_users(&self, org_id: &str, team_id: &str) -> ApiResult<Vec<AtlasUser>> {
        self.get_all(&["orgs", org_id, "teams", team_id, "users"])
            .await
    }

    async fn add_users_to_team(
        &self,
        org_id: &str,
        team_id: &str,
        user_ids: &[String],
    ) -> ApiResult<Vec<AtlasUser>> {
        let body: Vec<UserRef<'_>> = user_ids.iter().map(|id| UserRef { id }).collect();
        let page: Page<AtlasUser> = self
            .json(
                Method::POST,
                self.url(&["orgs", org_id, "teams", team_id, "users"]),
                Some(to_body(&body)?),
            )
            .await?;
        Ok(page.results)
    }

    async fn remove_user_from_team(
        &self,
        org_id: &str,
        team_id: &str,
        user_id: &str,
    ) -> ApiResult<()> {
        self.delete(&["orgs", org_id, "teams", team_id, "users", user_id])
            .await
    }

    async fn remove_team_from_org(&self, org_id: &str, team_id: &str) -> ApiResult<()> {
        self.delete(&["orgs", org_id, "teams", team_id]).await
    }

    async fn remove_team_from_project(&self, project_id: &str, team_id: &str) -> ApiResult<()> {
        self.delete(&["groups", project_id, "teams", team_id]).await
    }

    async fn get_user_by_name(&self, username: &str) -> ApiResult<AtlasUser> {
        self.get_json(&["users", "byName", username]).await
    }

    async fn list_projects(&self, page_num: u32, items_per_page: u32) -> ApiResult<Page<Project>> {
        self.get_page(&["groups"], page_num, items_per_page).await
    }

    async fn list_project_teams(&self, project_id: &str) -> ApiResult<Vec<AssignedTeam>> {
        self.get_all(&["groups", project_id, "teams"]).await
    }

    async fn create_access_list_entry(
        &self,
        project_id: &str,
        entry: &AccessListEntry,
    ) -> ApiResult<Vec<AccessListEntry>> {
        let body = [entry];
        let page: Page<AccessListEntry> = self
            .json(
                Method::POST,
                self.url(&["groups", project_id, "accessList"]),
                Some(to_body(&body)?),
            )
            .await?;
        Ok(page.results)
    }

    async fn get_access_list_entry(
        &self,
        project_id: &str,
        entry: &str,
    ) -> ApiResult<AccessListEntry> {
        self.get_json(&["groups", project_id, "accessList", entry])
            .await
    }

    async fn delete_access_list_entry(&self, project_id: &str, entry: &str) -> ApiResult<()> {
        self.delete(&["groups", project_id, "accessList", entry])
            .await
    }
}
