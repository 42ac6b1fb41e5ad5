use thiserror::Error;

/// Trigger phrases a rate-limited server puts in its error body.
const QUOTA_MARKERS: &[&str] = &["read operation", "quota", "rate limit", "too many requests"];

/// A failed measurement request. None of these stop the feed.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("network error: {0}")]
    Transport(String),
    #[error("unreadable response: {0}")]
    Decode(String),
}

impl FetchError {
    pub fn is_quota_exceeded(&self) -> bool {
        match self {
            FetchError::Http { status, body } => *status == 429 || is_quota_body(body),
            _ => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Decode(err.to_string())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

pub fn is_quota_body(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    QUOTA_MARKERS.iter().any(|m| lower.contains(m))
}

/// Local configuration problems; reported before any request is sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("no endpoint configured")]
    MissingEndpoint,
    #[error("no tags configured and none discovered")]
    NoTags,
    #[error("manual time mode needs both a start and an end time")]
    MissingTimeRange,
    #[error("cannot read time {0:?}; use YYYY-MM-DD HH:mm or ISO-8601")]
    InvalidTime(String),
    #[error("start time {start} is not before end time {end}")]
    EmptyTimeRange { start: String, end: String },
}
