use crate::feed::adaptive::{FactorDecay, Pacing};
use crate::feed::window::{FetchStrategy, ResolutionType, TimeMode};
use crate::feed::FeedMode;
use crate::rain::Charset;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bump when the schema changes.
pub const SETTINGS_VERSION: u32 = 1;

pub const MIN_POLL_INTERVAL_MS: u64 = 200;
pub const MAX_REPEAT: usize = 8;
pub const MIN_REQUEST_TIMEOUT_MS: u64 = 1000;
pub const MAX_RESOLUTION_NUMBER: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeSetting {
    #[default]
    Auto,
    Demo,
    Polling,
    Stream,
}

impl ModeSetting {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModeSetting::Auto => "auto",
            ModeSetting::Demo => "demo",
            ModeSetting::Polling => "polling",
            ModeSetting::Stream => "stream",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub version: u32,

    // source
    pub endpoint: String,
    pub token: String,
    pub mode: ModeSetting,

    // pacing
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub chunk_size: usize,
    pub max_tags: usize,
    pub tags: Vec<String>,

    // window
    pub time_mode: TimeMode,
    pub manual_start: String,
    pub manual_end: String,
    pub lookback_minutes: u32,
    pub resolution_type: ResolutionType,
    pub resolution_number: u32,
    pub timestamp_mode: String,
    pub fetch_strategy: FetchStrategy,
    pub factor_decay: FactorDecay,

    // presentation
    pub charset: Charset,
    pub repeat: usize,
    pub trail: f32,
    pub paused: bool,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,

            endpoint: String::new(),
            token: String::new(),
            mode: ModeSetting::Auto,

            poll_interval_ms: 1000,
            request_timeout_ms: 10_000,
            chunk_size: 5,
            max_tags: 10,
            tags: Vec::new(),

            time_mode: TimeMode::Latest,
            manual_start: String::new(),
            manual_end: String::new(),
            lookback_minutes: 15,
            resolution_type: ResolutionType::Minutes,
            resolution_number: 1,
            timestamp_mode: "Local".to_string(),
            fetch_strategy: FetchStrategy::Windowed,
            factor_decay: FactorDecay::Sticky,

            charset: Charset::Matrix,
            repeat: 2,
            trail: 0.08,
            paused: false,
        }
    }
}

impl FeedSettings {
    /// Copy with every value clamped into its working range.
    pub fn sanitized(&self) -> Self {
        let mut s = self.clone();
        if s.version == 0 {
            s.version = SETTINGS_VERSION;
        }
        s.endpoint = s.endpoint.trim().to_string();
        s.token = s.token.trim().to_string();
        s.tags = s
            .tags
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        s.poll_interval_ms = s.poll_interval_ms.max(MIN_POLL_INTERVAL_MS);
        s.request_timeout_ms = s.request_timeout_ms.max(MIN_REQUEST_TIMEOUT_MS);
        s.max_tags = s.max_tags.max(1);
        s.chunk_size = s.chunk_size.clamp(1, s.max_tags);
        s.lookback_minutes = s.lookback_minutes.max(1);
        s.resolution_number = s.resolution_number.clamp(1, MAX_RESOLUTION_NUMBER);
        s.repeat = s.repeat.clamp(1, MAX_REPEAT);
        if s.timestamp_mode.trim().is_empty() {
            s.timestamp_mode = "Local".to_string();
        }
        if !s.trail.is_finite() {
            s.trail = 0.08;
        }
        s.trail = s.trail.clamp(0.0, 1.0);
        if let FactorDecay::Halve { after_successes } = s.factor_decay {
            s.factor_decay = FactorDecay::Halve {
                after_successes: after_successes.max(1),
            };
        }
        s
    }

    /// `auto` streams from SSE-looking endpoints, polls other endpoints and
    /// falls back to the demo generator without one.
    pub fn resolve_mode(&self) -> FeedMode {
        let endpoint = self.endpoint.trim();
        match self.mode {
            ModeSetting::Demo => FeedMode::Demo,
            ModeSetting::Polling => FeedMode::Polling,
            ModeSetting::Stream => FeedMode::Stream,
            ModeSetting::Auto if endpoint.is_empty() => FeedMode::Demo,
            ModeSetting::Auto => {
                let lower = endpoint.to_ascii_lowercase();
                if lower.contains("sse") || lower.contains("stream") {
                    FeedMode::Stream
                } else {
                    FeedMode::Polling
                }
            }
        }
    }

    pub fn pacing(&self) -> Pacing {
        Pacing {
            chunk_size: self.chunk_size,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
