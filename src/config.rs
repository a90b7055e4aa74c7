//! Configuration loaded from the environment.
//!
//! Keys are flat and upper-case (`BATCH_SIZE`, `RETRY_DELAY`, ...). Durations
//! accept either a human string such as `"500ms"` or `"24h"`, or an integer
//! number of seconds.

use anyhow::{Context, Result, bail};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use fundu::DurationParser;
use serde::{Deserialize, Deserializer};
use std::time::Duration;

use crate::collector::{BatchSettings, RetryPolicy};
use crate::platforms::PlatformSettings;

/// Environment variable naming an optional TOML file merged beneath the environment.
pub const CONFIG_FILE_ENV: &str = "CPTRACK_CONFIG";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Log level for this crate's targets; other crates stay at `warn`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Required unless running from a roster file.
    #[serde(default)]
    pub database_url: Option<String>,
    /// How long to wait for an in-flight batch on shutdown.
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,

    #[serde(
        default = "default_fetch_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub fetch_interval: Duration,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_worker_limit")]
    pub worker_limit: usize,
    #[serde(
        default = "default_batch_delay",
        deserialize_with = "deserialize_duration"
    )]
    pub batch_delay: Duration,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(
        default = "default_retry_delay",
        deserialize_with = "deserialize_duration"
    )]
    pub retry_delay: Duration,
    /// Retry a platform's "user not found" answer like any other failure.
    #[serde(default = "default_true")]
    pub retry_unresolvable: bool,

    #[serde(
        default = "default_codeforces_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub codeforces_timeout: Duration,
    #[serde(
        default = "default_leetcode_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub leetcode_timeout: Duration,
    #[serde(
        default = "default_codechef_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub codechef_timeout: Duration,
    #[serde(
        default = "default_codeforces_status_delay",
        deserialize_with = "deserialize_duration"
    )]
    pub codeforces_status_delay: Duration,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_fetch_interval() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_batch_size() -> usize {
    10
}

fn default_worker_limit() -> usize {
    5
}

fn default_batch_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_true() -> bool {
    true
}

fn default_codeforces_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_leetcode_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_codechef_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_codeforces_status_delay() -> Duration {
    Duration::from_millis(500)
}

impl Config {
    /// Load from `.env`-populated environment variables, over the optional TOML file.
    pub fn load() -> Result<Self> {
        let mut figment = Figment::new();
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            figment = figment.merge(Toml::file(path));
        }
        Self::from_figment(figment.merge(Env::raw()))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract().context("Failed to load config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("BATCH_SIZE must be at least 1");
        }
        if self.worker_limit == 0 {
            bail!("WORKER_LIMIT must be at least 1");
        }
        if self.max_attempts == 0 {
            bail!("MAX_ATTEMPTS must be at least 1");
        }
        if self.fetch_interval.is_zero() {
            bail!("FETCH_INTERVAL must be greater than zero");
        }
        Ok(())
    }

    pub fn database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .context("DATABASE_URL is not set (or pass --roster to run without a database)")
    }

    pub fn platform_settings(&self) -> PlatformSettings {
        PlatformSettings {
            codeforces_timeout: self.codeforces_timeout,
            leetcode_timeout: self.leetcode_timeout,
            codechef_timeout: self.codechef_timeout,
            codeforces_status_delay: self.codeforces_status_delay,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.retry_delay)
    }

    pub fn batch_settings(&self) -> BatchSettings {
        BatchSettings {
            batch_size: self.batch_size,
            worker_limit: self.worker_limit,
            batch_delay: self.batch_delay,
        }
    }
}

/// Parse a human duration string such as `"2s"` or `"24h"`.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let parsed = DurationParser::with_all_time_units()
        .parse(input.trim())
        .map_err(|e| format!("invalid duration '{input}': {e}"))?;
    Duration::try_from(parsed).map_err(|e| format!("invalid duration '{input}': {e}"))
}

/// Accepts integer seconds or a duration string.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};
    use std::fmt;

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a duration string like \"2s\" or a number of seconds")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Duration, E> {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Duration, E> {
            u64::try_from(value)
                .map(Duration::from_secs)
                .map_err(|_| E::custom("duration cannot be negative"))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Duration, E> {
            parse_duration(value).map_err(E::custom)
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}
