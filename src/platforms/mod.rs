//! Competitive-programming platform adapters.
//!
//! Every platform sits behind [`PlatformAdapter`], so the collector never sees
//! whether the stats came from a JSON API, a GraphQL query, or a scraped page.

pub mod codechef;
pub mod codeforces;
mod errors;
pub mod json;
pub mod leetcode;

pub use codechef::CodeChefClient;
pub use codeforces::CodeforcesClient;
pub use errors::PlatformError;
pub use leetcode::LeetCodeClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Shared user agent for the JSON/GraphQL APIs.
const API_USER_AGENT: &str = concat!("cptrack/", env!("CARGO_PKG_VERSION"));

/// Browser-like user agent; CodeChef and LeetCode reject obvious bots.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// The fixed set of tracked platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "CF")]
    Codeforces,
    #[serde(rename = "LC")]
    LeetCode,
    #[serde(rename = "CC")]
    CodeChef,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Codeforces, Platform::LeetCode, Platform::CodeChef];

    /// Short tag stored in the `platform` column.
    pub fn tag(self) -> &'static str {
        match self {
            Platform::Codeforces => "CF",
            Platform::LeetCode => "LC",
            Platform::CodeChef => "CC",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.tag() == tag)
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Platform::Codeforces => "Codeforces",
            Platform::LeetCode => "LeetCode",
            Platform::CodeChef => "CodeChef",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Platform {
    type Err = String;

    /// Accepts the short tag or the platform name, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cf" | "codeforces" => Ok(Platform::Codeforces),
            "lc" | "leetcode" => Ok(Platform::LeetCode),
            "cc" | "codechef" => Ok(Platform::CodeChef),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

/// Accepted-problem counts split by LeetCode difficulty tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifficultyBreakdown {
    pub easy: i32,
    pub medium: i32,
    pub hard: i32,
}

/// Normalized statistics returned by an adapter.
///
/// Fields a platform does not expose stay `None`; `solved` is always present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsPayload {
    pub rating: Option<i32>,
    pub max_rating: Option<i32>,
    pub solved: i32,
    pub breakdown: Option<DifficultyBreakdown>,
    /// Codeforces rank name or CodeChef star tier.
    pub rank_title: Option<String>,
    /// LeetCode global ranking.
    pub global_rank: Option<i64>,
}

/// Uniform contract for a platform integration.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Fetch current stats for `handle`.
    ///
    /// Must not panic; every failure mode is a [`PlatformError`].
    async fn fetch(&self, handle: &str) -> Result<StatsPayload, PlatformError>;

    /// Registration-time existence check.
    async fn validate(&self, handle: &str) -> bool;
}

/// Per-adapter HTTP settings.
#[derive(Debug, Clone)]
pub struct PlatformSettings {
    pub codeforces_timeout: Duration,
    pub leetcode_timeout: Duration,
    pub codechef_timeout: Duration,
    /// Pause between the Codeforces profile and submission calls.
    pub codeforces_status_delay: Duration,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            codeforces_timeout: Duration::from_secs(10),
            leetcode_timeout: Duration::from_secs(15),
            codechef_timeout: Duration::from_secs(15),
            codeforces_status_delay: Duration::from_millis(500),
        }
    }
}

/// Registered adapters keyed by platform.
#[derive(Clone, Default)]
pub struct PlatformSet {
    adapters: HashMap<Platform, Arc<dyn PlatformAdapter>>,
}

impl PlatformSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the three live HTTP adapters.
    pub fn live(settings: &PlatformSettings) -> Result<Self, PlatformError> {
        let mut set = Self::new();
        set.insert(Arc::new(CodeforcesClient::new(
            settings.codeforces_timeout,
            settings.codeforces_status_delay,
        )?));
        set.insert(Arc::new(LeetCodeClient::new(settings.leetcode_timeout)?));
        set.insert(Arc::new(CodeChefClient::new(settings.codechef_timeout)?));
        Ok(set)
    }

    /// Register an adapter, replacing any existing one for the same platform.
    pub fn insert(&mut self, adapter: Arc<dyn PlatformAdapter>) {
        self.adapters.insert(adapter.platform(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn PlatformAdapter>) -> Self {
        self.insert(adapter);
        self
    }

    pub fn get(&self, platform: Platform) -> Option<&Arc<dyn PlatformAdapter>> {
        self.adapters.get(&platform)
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

/// Build a `reqwest::Client` with a whole-request timeout.
fn http_client(timeout: Duration, user_agent: &str) -> Result<reqwest::Client, PlatformError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .user_agent(user_agent)
        .build()
        .map_err(PlatformError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_tags_round_trip() {
        for platform in Platform::ALL {
            assert_eq!(Platform::from_tag(platform.tag()), Some(platform));
        }
        assert_eq!(Platform::from_tag("XX"), None);
    }

    #[test]
    fn test_platform_from_str_accepts_names_and_tags() {
        assert_eq!("cf".parse::<Platform>(), Ok(Platform::Codeforces));
        assert_eq!("LeetCode".parse::<Platform>(), Ok(Platform::LeetCode));
        assert_eq!(" CC ".parse::<Platform>(), Ok(Platform::CodeChef));
        assert!("atcoder".parse::<Platform>().is_err());
    }

    #[test]
    fn test_platform_serde_uses_short_tags() {
        let json = serde_json::to_string(&Platform::LeetCode).unwrap();
        assert_eq!(json, "\"LC\"");
        let back: Platform = serde_json::from_str("\"CC\"").unwrap();
        assert_eq!(back, Platform::CodeChef);
    }
}
