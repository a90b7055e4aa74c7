//! Error types shared by the platform adapters.

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// Network failure, timeout, or a non-2xx response.
    #[error("request failed: {0}")]
    Transport(String),
    /// The platform says this handle does not exist.
    #[error("user not found: {0}")]
    NotFound(String),
    /// The response arrived but did not have the expected shape.
    #[error("unexpected response from {url}: {reason}")]
    Malformed { url: String, reason: String },
}

impl PlatformError {
    pub fn malformed(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Malformed {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the failure is an unresolvable identifier rather than a
    /// transport or parsing problem.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Transport(format!("timed out: {err}"))
        } else if let Some(status) = err.status() {
            Self::Transport(format!("HTTP {status}"))
        } else {
            Self::Transport(err.to_string())
        }
    }
}
