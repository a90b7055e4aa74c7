//! Codeforces JSON API client.
//!
//! Two calls per fetch: `user.info` for rating data, then `user.status` for the
//! submission history the solved count is derived from.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time;
use tracing::{debug, warn};

use super::json::parse_json_with_context;
use super::{API_USER_AGENT, Platform, PlatformAdapter, PlatformError, StatsPayload, http_client};

const BASE_URL: &str = "https://codeforces.com/api";

/// Response envelope shared by every Codeforces API method.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    comment: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CfUser {
    handle: String,
    rating: Option<i32>,
    max_rating: Option<i32>,
    rank: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CfSubmission {
    verdict: Option<String>,
    problem: CfProblem,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CfProblem {
    contest_id: Option<i64>,
    problemset_name: Option<String>,
    index: String,
}

pub struct CodeforcesClient {
    http: reqwest::Client,
    base_url: String,
    status_delay: Duration,
}

impl CodeforcesClient {
    pub fn new(timeout: Duration, status_delay: Duration) -> Result<Self, PlatformError> {
        Ok(Self {
            http: http_client(timeout, API_USER_AGENT)?,
            base_url: BASE_URL.to_string(),
            status_delay,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        query: &[(&str, &str)],
    ) -> Result<T, PlatformError> {
        let url = format!("{}/{method}", self.base_url);
        let resp = self.http.get(&url).query(query).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        parse_envelope(&url, status, &body)
    }

    async fn user_info(&self, handle: &str) -> Result<CfUser, PlatformError> {
        let users: Vec<CfUser> = self.call("user.info", &[("handles", handle)]).await?;
        users
            .into_iter()
            .next()
            .ok_or_else(|| PlatformError::NotFound(handle.to_string()))
    }

    /// Count distinct accepted problems. A failure here degrades to zero
    /// instead of failing the whole fetch.
    async fn solved_count(&self, handle: &str) -> i32 {
        match self
            .call::<Vec<CfSubmission>>("user.status", &[("handle", handle)])
            .await
        {
            Ok(submissions) => count_solved(&submissions),
            Err(e) => {
                warn!(handle, error = %e, "Codeforces submission history unavailable, reporting 0 solved");
                0
            }
        }
    }
}

#[async_trait]
impl PlatformAdapter for CodeforcesClient {
    fn platform(&self) -> Platform {
        Platform::Codeforces
    }

    async fn fetch(&self, handle: &str) -> Result<StatsPayload, PlatformError> {
        let user = self.user_info(handle).await?;

        // user.info and user.status share the per-IP call limit
        time::sleep(self.status_delay).await;
        let solved = self.solved_count(handle).await;

        debug!(handle = user.handle.as_str(), rating = ?user.rating, solved, "Fetched Codeforces stats");

        Ok(StatsPayload {
            rating: Some(user.rating.unwrap_or(0)),
            max_rating: Some(user.max_rating.unwrap_or(0)),
            solved,
            breakdown: None,
            rank_title: Some(user.rank.unwrap_or_else(|| "Unrated".to_string())),
            global_rank: None,
        })
    }

    async fn validate(&self, handle: &str) -> bool {
        self.user_info(handle).await.is_ok()
    }
}

/// Unwrap a Codeforces envelope.
///
/// Unknown handles come back as HTTP 400 with a `FAILED` envelope whose
/// comment says "not found"; any other `FAILED` (e.g. call limit) is transient.
fn parse_envelope<T: DeserializeOwned>(
    url: &str,
    status: StatusCode,
    body: &str,
) -> Result<T, PlatformError> {
    let envelope: Envelope<T> = match parse_json_with_context(body) {
        Ok(envelope) => envelope,
        Err(e) if status.is_success() => return Err(PlatformError::malformed(url, format!("{e:#}"))),
        Err(_) => return Err(PlatformError::Transport(format!("HTTP {status} from {url}"))),
    };

    if envelope.status != "OK" {
        let comment = envelope.comment.unwrap_or_default();
        if comment.to_ascii_lowercase().contains("not found") {
            return Err(PlatformError::NotFound(comment));
        }
        return Err(PlatformError::Transport(format!(
            "HTTP {status}, status {}: {comment}",
            envelope.status
        )));
    }

    envelope
        .result
        .ok_or_else(|| PlatformError::malformed(url, "OK response without a result"))
}

/// Number of distinct problems with at least one `OK` verdict.
fn count_solved(submissions: &[CfSubmission]) -> i32 {
    let solved: HashSet<(String, &str)> = submissions
        .iter()
        .filter(|s| s.verdict.as_deref() == Some("OK"))
        .map(|s| {
            let set = match (&s.problem.contest_id, &s.problem.problemset_name) {
                (Some(id), _) => id.to_string(),
                (None, Some(name)) => name.clone(),
                (None, None) => String::new(),
            };
            (set, s.problem.index.as_str())
        })
        .collect();
    i32::try_from(solved.len()).unwrap_or(i32::MAX)
}
