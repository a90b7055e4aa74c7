//! CodeChef profile scraper.
//!
//! CodeChef has no public stats API, so rating and solved count are pulled out
//! of the HTML profile page. The page layout changes often; each field has a
//! chain of extraction strategies and the first one that yields a value wins.

use async_trait::async_trait;
use html_scraper::{Html, Selector};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

use super::{BROWSER_USER_AGENT, Platform, PlatformAdapter, PlatformError, StatsPayload, http_client};

const BASE_URL: &str = "https://www.codechef.com";

static RATING_NUMBER: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.rating-number").unwrap());
static PROBLEMS_SOLVED_HEADING: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("section.problems-solved h5").unwrap());
static FULLY_SOLVED_MARKERS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h3, span.count").unwrap());
static SCRIPT: LazyLock<Selector> = LazyLock::new(|| Selector::parse("script").unwrap());
static USER_DETAILS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.user-details-container").unwrap());

static LEADING_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)").unwrap());
static RATING_TEXT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Rating\s*:\s*(\d+)").unwrap());
static TOTAL_SOLVED_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Total\s+Problems\s+Solved\s*:\s*(\d+)").unwrap());
static SCRIPT_FULLY_SOLVED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)"fully_solved"\s*:\s*\{?[^0-9{}]*?(\d+)"#).unwrap());

/// Fields recovered from a profile page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProfileStats {
    rating: i32,
    solved: i32,
}

pub struct CodeChefClient {
    http: reqwest::Client,
}

impl CodeChefClient {
    pub fn new(timeout: Duration) -> Result<Self, PlatformError> {
        Ok(Self {
            http: http_client(timeout, BROWSER_USER_AGENT)?,
        })
    }

    async fn profile_page(&self, username: &str) -> Result<String, PlatformError> {
        let url = format!("{BASE_URL}/users/{username}");
        let resp = self.http.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(PlatformError::Transport(format!("HTTP {status} from {url}")));
        }
        Ok(resp.text().await?)
    }
}

#[async_trait]
impl PlatformAdapter for CodeChefClient {
    fn platform(&self) -> Platform {
        Platform::CodeChef
    }

    async fn fetch(&self, handle: &str) -> Result<StatsPayload, PlatformError> {
        let body = self.profile_page(handle).await?;
        let stats = parse_profile(&body).ok_or_else(|| PlatformError::NotFound(handle.to_string()))?;
        debug!(handle, rating = stats.rating, solved = stats.solved, "Fetched CodeChef stats");

        Ok(StatsPayload {
            rating: Some(stats.rating),
            max_rating: None,
            solved: stats.solved,
            breakdown: None,
            rank_title: Some(star_rating(stats.rating).to_string()),
            global_rank: None,
        })
    }

    async fn validate(&self, handle: &str) -> bool {
        self.profile_page(handle).await.is_ok()
    }
}

/// Extract rating and solved count from a profile page.
///
/// Returns `None` when nothing was found and the page has no user details
/// block, which is how CodeChef renders unknown users.
fn parse_profile(body: &str) -> Option<ProfileStats> {
    let html = Html::parse_document(body);
    let rating = extract_rating(&html);
    let solved = extract_solved(&html);

    if rating == 0 && solved == 0 && html.select(&USER_DETAILS).next().is_none() {
        return None;
    }

    Some(ProfileStats { rating, solved })
}

fn extract_rating(html: &Html) -> i32 {
    let from_badge = html
        .select(&RATING_NUMBER)
        .next()
        .and_then(|el| leading_number(&el.text().collect::<String>()));

    from_badge
        .filter(|&r| r > 0)
        .or_else(|| {
            let text = page_text(html);
            RATING_TEXT
                .captures(&text)
                .and_then(|caps| caps[1].parse().ok())
        })
        .unwrap_or(0)
}

fn extract_solved(html: &Html) -> i32 {
    solved_from_heading(html)
        .or_else(|| solved_from_total_text(html))
        .or_else(|| solved_from_fully_solved_count(html))
        .or_else(|| solved_from_scripts(html))
        .unwrap_or(0)
}

fn solved_from_heading(html: &Html) -> Option<i32> {
    let heading = html.select(&PROBLEMS_SOLVED_HEADING).next()?;
    leading_number(&heading.text().collect::<String>()).filter(|&n| n > 0)
}

fn solved_from_total_text(html: &Html) -> Option<i32> {
    TOTAL_SOLVED_TEXT
        .captures(&page_text(html))
        .and_then(|caps| caps[1].parse().ok())
        .filter(|&n| n > 0)
}

/// The `span.count` that follows a "Fully Solved" heading in document order.
fn solved_from_fully_solved_count(html: &Html) -> Option<i32> {
    let mut after_heading = false;
    for el in html.select(&FULLY_SOLVED_MARKERS) {
        let text = el.text().collect::<String>();
        if el.value().name() == "h3" {
            after_heading = text.contains("Fully Solved");
            continue;
        }
        if after_heading {
            let cleaned = text.trim().trim_start_matches('(').trim_end_matches(')');
            return cleaned.trim().parse().ok();
        }
    }
    None
}

fn solved_from_scripts(html: &Html) -> Option<i32> {
    html.select(&SCRIPT).find_map(|script| {
        let source = script.text().collect::<String>();
        SCRIPT_FULLY_SOLVED
            .captures(&source)
            .and_then(|caps| caps[1].parse().ok())
    })
}

fn leading_number(text: &str) -> Option<i32> {
    LEADING_NUMBER
        .captures(text.trim())
        .and_then(|caps| caps[1].parse().ok())
}

fn page_text(html: &Html) -> String {
    html.root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// CodeChef star tier for a rating.
pub fn star_rating(rating: i32) -> &'static str {
    match rating {
        r if r >= 2500 => "7★",
        r if r >= 2200 => "6★",
        r if r >= 1800 => "5★",
        r if r >= 1600 => "4★",
        r if r >= 1400 => "3★",
        r if r >= 1200 => "2★",
        r if r > 0 => "1★",
        _ => "Unrated",
    }
}
