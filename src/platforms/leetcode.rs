//! LeetCode GraphQL client.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::json::parse_json_with_context;
use super::{
    BROWSER_USER_AGENT, DifficultyBreakdown, Platform, PlatformAdapter, PlatformError,
    StatsPayload, http_client,
};

const GRAPHQL_URL: &str = "https://leetcode.com/graphql";

const PROFILE_QUERY: &str = r#"
    query getUserProfile($username: String!) {
      matchedUser(username: $username) {
        username
        submitStats {
          acSubmissionNum { difficulty count }
        }
        profile { ranking }
      }
    }
"#;

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<ProfileData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileData {
    matched_user: Option<MatchedUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatchedUser {
    username: String,
    submit_stats: SubmitStats,
    profile: Option<Profile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitStats {
    ac_submission_num: Vec<DifficultyCount>,
}

#[derive(Debug, Deserialize)]
struct DifficultyCount {
    difficulty: String,
    count: i32,
}

#[derive(Debug, Deserialize)]
struct Profile {
    ranking: Option<i64>,
}

pub struct LeetCodeClient {
    http: reqwest::Client,
}

impl LeetCodeClient {
    pub fn new(timeout: Duration) -> Result<Self, PlatformError> {
        Ok(Self {
            http: http_client(timeout, BROWSER_USER_AGENT)?,
        })
    }

    /// Send the profile query and return the raw response body.
    async fn graphql_request(&self, username: &str) -> Result<String, PlatformError> {
        let body = serde_json::json!({
            "query": PROFILE_QUERY,
            "variables": { "username": username },
        });

        let resp = self
            .http
            .post(GRAPHQL_URL)
            .header("Referer", "https://leetcode.com")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(PlatformError::Transport(format!(
                "LeetCode GraphQL request failed ({status})"
            )));
        }

        Ok(resp.text().await?)
    }
}

#[async_trait]
impl PlatformAdapter for LeetCodeClient {
    fn platform(&self) -> Platform {
        Platform::LeetCode
    }

    async fn fetch(&self, handle: &str) -> Result<StatsPayload, PlatformError> {
        let body = self.graphql_request(handle).await?;
        let payload = parse_profile(handle, &body)?;
        debug!(handle, solved = payload.solved, "Fetched LeetCode stats");
        Ok(payload)
    }

    async fn validate(&self, handle: &str) -> bool {
        self.fetch(handle).await.is_ok()
    }
}

/// Convert a `getUserProfile` response body into a payload.
///
/// GraphQL `errors` and a null `matchedUser` both mean the username does not resolve.
fn parse_profile(username: &str, body: &str) -> Result<StatsPayload, PlatformError> {
    let response: GraphQlResponse = parse_json_with_context(body)
        .map_err(|e| PlatformError::malformed(GRAPHQL_URL, format!("{e:#}")))?;

    if let Some(first) = response.errors.first() {
        return Err(PlatformError::NotFound(format!("{username}: {}", first.message)));
    }

    let user = response
        .data
        .and_then(|d| d.matched_user)
        .ok_or_else(|| PlatformError::NotFound(username.to_string()))?;

    let mut breakdown = DifficultyBreakdown::default();
    let mut total = 0;
    for entry in &user.submit_stats.ac_submission_num {
        match entry.difficulty.as_str() {
            "All" => total = entry.count,
            "Easy" => breakdown.easy = entry.count,
            "Medium" => breakdown.medium = entry.count,
            "Hard" => breakdown.hard = entry.count,
            other => debug!(username = user.username.as_str(), difficulty = other, "Ignoring unknown LeetCode difficulty"),
        }
    }

    Ok(StatsPayload {
        rating: None,
        max_rating: None,
        solved: total,
        breakdown: Some(breakdown),
        rank_title: None,
        global_rank: user.profile.and_then(|p| p.ranking),
    })
}
