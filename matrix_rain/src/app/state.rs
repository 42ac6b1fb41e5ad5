use matrix_rain::feed::{FeedMode, StatusLevel};
use matrix_rain::settings::FeedSettings;
use matrix_rain::tokens::BufferDepth;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct AppState {
    pub settings: FeedSettings,
    pub mode: Option<FeedMode>,
    pub paused: bool,

    pub status: String,
    pub level: StatusLevel,
    pub status_at: u64,

    pub factor: u32,
    pub depth: BufferDepth,

    /// Set when the feed must be restarted with `settings`.
    pub restart_requested: bool,
    /// Set when charset or trail changed and the field needs updating.
    pub field_dirty: bool,
}

impl AppState {
    pub fn new(settings: FeedSettings) -> Self {
        Self {
            paused: settings.paused,
            settings,
            mode: None,
            status: "starting".to_string(),
            level: StatusLevel::Info,
            status_at: now_unix(),
            factor: 1,
            depth: BufferDepth::default(),
            restart_requested: false,
            field_dirty: false,
        }
    }

    pub fn status_line(&self, width: usize) -> String {
        let mode = self.mode.map(|m| m.as_str()).unwrap_or("idle");
        let pause = if self.paused { " [paused]" } else { "" };
        let factor = if self.factor > 1 {
            format!(" x{}", self.factor)
        } else {
            String::new()
        };
        let line = format!(
            "[{mode}{factor}{pause}] {} | buf {}c {}v {}p",
            self.status, self.depth.chars, self.depth.values, self.depth.pool
        );
        line.chars().take(width).collect()
    }
}

/// unix seconds
pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
