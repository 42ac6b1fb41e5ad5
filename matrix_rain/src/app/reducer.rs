use super::event::*;
use super::state::*;
use matrix_rain::feed::{FeedEvent, StatusLevel};
use matrix_rain::settings::FeedSettings;

/// Info messages older than this are replaced by a plain "running" line.
const STATUS_STALE_SECS: u64 = 30;

pub fn reduce(state: &mut AppState, ev: AppEvent) -> bool {
    match ev {
        AppEvent::Feed(f) => reduce_feed(state, f),
        AppEvent::Settings(s) => reduce_settings(state, s),
        AppEvent::Timer(t) => reduce_timer(state, t),
    }
}

fn set_status(state: &mut AppState, level: StatusLevel, message: String) {
    state.status = message;
    state.level = level;
    state.status_at = now_unix();
}

fn reduce_feed(state: &mut AppState, ev: FeedEvent) -> bool {
    match ev {
        FeedEvent::Started { mode } => {
            state.mode = Some(mode);
            state.factor = 1;
            set_status(state, StatusLevel::Info, format!("{} feed started", mode.as_str()));
            true
        }
        FeedEvent::Status { level, message } => {
            set_status(state, level, message);
            true
        }
        FeedEvent::Backoff {
            factor,
            poll_interval,
        } => {
            state.factor = factor;
            set_status(
                state,
                StatusLevel::Warn,
                format!(
                    "quota backoff: factor {factor}, polling every {}s",
                    poll_interval.as_secs()
                ),
            );
            true
        }
    }
}

/// Fields that only change how the rain looks.
fn without_presentation(s: &FeedSettings) -> FeedSettings {
    let defaults = FeedSettings::default();
    FeedSettings {
        charset: defaults.charset,
        trail: defaults.trail,
        paused: defaults.paused,
        ..s.clone()
    }
}

fn reduce_settings(state: &mut AppState, ev: SettingsEvent) -> bool {
    match ev {
        SettingsEvent::Reloaded { settings } => {
            let next = settings.sanitized();
            if next == state.settings {
                return false;
            }
            if without_presentation(&next) != without_presentation(&state.settings) {
                state.restart_requested = true;
            }
            if next.charset != state.settings.charset || next.trail != state.settings.trail {
                state.field_dirty = true;
            }
            state.paused = next.paused;
            state.settings = next;
            set_status(state, StatusLevel::Info, "settings reloaded".to_string());
            true
        }
    }
}

fn reduce_timer(state: &mut AppState, ev: TimerEvent) -> bool {
    match ev {
        TimerEvent::Tick1s { now_unix, depth } => {
            let mut changed = depth != state.depth;
            state.depth = depth;
            if state.level == StatusLevel::Info
                && state.mode.is_some()
                && now_unix.saturating_sub(state.status_at) > STATUS_STALE_SECS
                && state.status != "running"
            {
                state.status = "running".to_string();
                changed = true;
            }
            changed
        }
    }
}
