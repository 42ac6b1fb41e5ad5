//! Quota backoff. Every state change goes through [`apply`], a pure function
//! of the previous state and one request outcome.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

pub const FACTOR_CAP: u32 = 64;
pub const BACKOFF_COOLDOWN: Duration = Duration::from_secs(2);
pub const MIN_CHUNK_SIZE: usize = 1;
pub const POLL_FLOOR: Duration = Duration::from_secs(30);

/// What happens to the factor after a run of successes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FactorDecay {
    /// Backoff lasts until the feed is restarted.
    #[default]
    Sticky,
    Halve { after_successes: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub chunk_size: usize,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptiveState {
    pub factor: u32,
    pub last_backoff_at: Option<Instant>,
    pub last_successful_end: Option<NaiveDateTime>,
    pub success_streak: u32,
    pub pacing: Pacing,
}

impl AdaptiveState {
    pub fn new(pacing: Pacing) -> Self {
        Self {
            factor: 1,
            last_backoff_at: None,
            last_successful_end: None,
            success_streak: 0,
            pacing,
        }
    }

    pub fn in_cooldown(&self, now: Instant) -> bool {
        self.last_backoff_at
            .is_some_and(|at| now.saturating_duration_since(at) < BACKOFF_COOLDOWN)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Data { end: NaiveDateTime },
    Empty { end: NaiveDateTime },
    QuotaExceeded,
    HttpFailure,
    TransportFailure,
}

pub fn apply(state: &AdaptiveState, outcome: &Outcome, now: Instant, decay: FactorDecay) -> AdaptiveState {
    let mut next = state.clone();
    match *outcome {
        Outcome::Data { end } | Outcome::Empty { end } => {
            next.last_successful_end = Some(end);
            next.success_streak = state.success_streak.saturating_add(1);
            if let FactorDecay::Halve { after_successes } = decay {
                if next.factor > 1 && next.success_streak >= after_successes.max(1) {
                    next.factor = (next.factor / 2).max(1);
                    next.success_streak = 0;
                }
            }
        }
        Outcome::QuotaExceeded => {
            next.success_streak = 0;
            if !state.in_cooldown(now) {
                next.factor = state.factor.saturating_mul(2).min(FACTOR_CAP);
                next.pacing.chunk_size = MIN_CHUNK_SIZE;
                next.pacing.poll_interval = state.pacing.poll_interval.max(POLL_FLOOR);
                next.last_backoff_at = Some(now);
            }
        }
        Outcome::HttpFailure | Outcome::TransportFailure => {
            next.success_streak = 0;
        }
    }
    next
}
