use matrix_rain::feed::FeedEvent;
use matrix_rain::settings::FeedSettings;
use matrix_rain::tokens::BufferDepth;

#[derive(Debug, Clone)]
pub enum AppEvent {
    Feed(FeedEvent),
    Settings(SettingsEvent),
    Timer(TimerEvent),
}

#[derive(Debug, Clone)]
pub enum SettingsEvent {
    Reloaded { settings: FeedSettings },
}

#[derive(Debug, Clone)]
pub enum TimerEvent {
    Tick1s { now_unix: u64, depth: BufferDepth },
}
