//! Polling loop: one cycle fetches every tag chunk sequentially, then the loop
//! sleeps for the (adaptive) poll interval.

use crate::debug_hooks;
use crate::error::{ConfigError, FetchError};
use crate::feed::adaptive::{self, AdaptiveState, FactorDecay, Outcome};
use crate::feed::api::{HttpApi, MeasurementApi};
use crate::feed::window::{
    build_window, chunk_tags, latest_range, manual_range, FetchStrategy, ResolutionSettings,
    TimeMode, TimeRange,
};
use crate::feed::{FeedEvent, FeedLink, StatusLevel, NO_DATA_MARKER, TRANSPORT_MARKER};
use crate::normalize::normalize;
use crate::settings::FeedSettings;
use crate::tokens::TokenStreams;
use chrono::{Local, NaiveDateTime};
use std::time::{Duration, Instant};

pub const CHUNK_SPACING: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct PollConfig {
    pub tags: Vec<String>,
    pub max_tags: usize,
    pub time_mode: TimeMode,
    pub manual_start: String,
    pub manual_end: String,
    pub lookback_minutes: u32,
    pub strategy: FetchStrategy,
    pub resolution: ResolutionSettings,
    pub repeat: usize,
    pub decay: FactorDecay,
    pub chunk_spacing: Duration,
}

impl PollConfig {
    pub fn from_settings(s: &FeedSettings) -> Self {
        Self {
            tags: s.tags.clone(),
            max_tags: s.max_tags,
            time_mode: s.time_mode,
            manual_start: s.manual_start.clone(),
            manual_end: s.manual_end.clone(),
            lookback_minutes: s.lookback_minutes,
            strategy: s.fetch_strategy,
            resolution: ResolutionSettings {
                resolution_type: s.resolution_type,
                resolution_number: s.resolution_number,
                timestamp_mode: s.timestamp_mode.clone(),
            },
            repeat: s.repeat,
            decay: s.factor_decay,
            chunk_spacing: CHUNK_SPACING,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub requests: usize,
    pub tokens: usize,
    pub empty: usize,
    pub failures: usize,
    pub quota_hits: usize,
    pub config_error: Option<ConfigError>,
    /// The loop was stopped mid-cycle; the rest was dropped.
    pub stale: bool,
}

pub struct Scheduler<A> {
    api: A,
    cfg: PollConfig,
    state: AdaptiveState,
    streams: TokenStreams,
    link: FeedLink,
    discovered: Vec<String>,
    cycle: u64,
}

impl<A: MeasurementApi> Scheduler<A> {
    pub fn new(
        api: A,
        cfg: PollConfig,
        pacing: adaptive::Pacing,
        streams: TokenStreams,
        link: FeedLink,
    ) -> Self {
        Self {
            api,
            cfg,
            state: AdaptiveState::new(pacing),
            streams,
            link,
            discovered: Vec::new(),
            cycle: 0,
        }
    }

    pub fn state(&self) -> &AdaptiveState {
        &self.state
    }

    pub async fn run(mut self) {
        loop {
            if !self.link.is_alive() {
                break;
            }
            let report = self.run_cycle(Local::now().naive_local()).await;
            if report.stale {
                break;
            }
            let wait = self.state.pacing.poll_interval;
            if !self.link.sleep(wait).await {
                break;
            }
        }
    }

    /// Explicit tags win; otherwise the server's tag list, fetched once.
    async fn resolve_tags(&mut self) -> Result<Vec<String>, ConfigError> {
        if !self.cfg.tags.is_empty() {
            return Ok(self.cfg.tags.clone());
        }
        if self.discovered.is_empty() {
            match self.api.list_tags().await {
                Ok(tags) => {
                    debug_hooks::log_tag_discovery(tags.len());
                    self.discovered = tags;
                }
                Err(err) => {
                    self.link
                        .status(StatusLevel::Warn, format!("tag discovery failed: {err}"));
                }
            }
        }
        if self.discovered.is_empty() {
            Err(ConfigError::NoTags)
        } else {
            Ok(self.discovered.clone())
        }
    }

    fn time_range(&self, now: NaiveDateTime) -> Result<TimeRange, ConfigError> {
        match self.cfg.time_mode {
            TimeMode::Manual => manual_range(&self.cfg.manual_start, &self.cfg.manual_end),
            TimeMode::Latest => Ok(latest_range(
                now,
                self.cfg.lookback_minutes,
                self.state.factor,
                self.state.last_successful_end,
                self.cfg.strategy,
                self.cfg.resolution.resolution_type,
                self.cfg.resolution.resolution_number,
            )),
        }
    }

    fn config_failure(&self, err: ConfigError, mut report: CycleReport) -> CycleReport {
        debug_hooks::log_config_error(err.to_string());
        self.link.status(StatusLevel::Error, err.to_string());
        report.config_error = Some(err);
        report
    }

    pub async fn run_cycle(&mut self, now: NaiveDateTime) -> CycleReport {
        let mut report = CycleReport::default();
        self.cycle += 1;

        let tags = match self.resolve_tags().await {
            Ok(tags) => tags,
            Err(err) => return self.config_failure(err, report),
        };
        if !self.link.is_alive() {
            debug_hooks::log_stale_result("polling");
            report.stale = true;
            return report;
        }
        let range = match self.time_range(now) {
            Ok(range) => range,
            Err(err) => return self.config_failure(err, report),
        };

        let chunks = chunk_tags(&tags, self.state.pacing.chunk_size, self.cfg.max_tags);
        debug_hooks::log_cycle_start(self.cycle, tags.len(), chunks.len(), self.state.factor);

        for (i, chunk) in chunks.into_iter().enumerate() {
            if i > 0 && !self.link.sleep(self.cfg.chunk_spacing).await {
                report.stale = true;
                return report;
            }
            let window = build_window(chunk, &range, &self.cfg.resolution, self.state.factor);
            let described = window.describe();

            let started = Instant::now();
            let result = self.api.fetch_window(&window).await;
            let elapsed_ms = started.elapsed().as_millis();
            report.requests += 1;

            if !self.link.is_alive() {
                debug_hooks::log_stale_result("polling");
                report.stale = true;
                return report;
            }

            let outcome = match result {
                Ok(payload) => {
                    let out = normalize(&payload);
                    if out.is_empty() {
                        report.empty += 1;
                        self.streams.push_chars(NO_DATA_MARKER);
                        debug_hooks::log_fetch_empty(&described);
                        self.link
                            .status(StatusLevel::Info, format!("no data {described}"));
                        Outcome::Empty { end: range.end }
                    } else {
                        let n = self.streams.ingest(&out, self.cfg.repeat);
                        report.tokens += n;
                        let depth = self.streams.depth();
                        debug_hooks::log_fetch_ok(&described, elapsed_ms, n);
                        self.link.status(
                            StatusLevel::Info,
                            format!(
                                "ok {elapsed_ms}ms tokens={n} buffer={}c/{}v {described}",
                                depth.chars, depth.values
                            ),
                        );
                        Outcome::Data { end: range.end }
                    }
                }
                Err(err) if err.is_quota_exceeded() => {
                    report.failures += 1;
                    report.quota_hits += 1;
                    let status = err.status().unwrap_or_default();
                    debug_hooks::log_fetch_http(status, elapsed_ms, &described, &err.to_string());
                    self.link.status(
                        StatusLevel::Warn,
                        format!("HTTP {status} after {elapsed_ms}ms {described}; quota exceeded, backing off"),
                    );
                    Outcome::QuotaExceeded
                }
                Err(FetchError::Http { status, body }) => {
                    report.failures += 1;
                    debug_hooks::log_fetch_http(status, elapsed_ms, &described, &body);
                    self.link.status(
                        StatusLevel::Error,
                        format!("HTTP {status} after {elapsed_ms}ms {described}"),
                    );
                    Outcome::HttpFailure
                }
                Err(FetchError::Decode(msg)) => {
                    // malformed payload: nothing to draw, logged only
                    report.failures += 1;
                    debug_hooks::log_fetch_decode(&described, &msg);
                    Outcome::HttpFailure
                }
                Err(FetchError::Transport(msg)) => {
                    report.failures += 1;
                    self.streams.push_chars(TRANSPORT_MARKER);
                    debug_hooks::log_fetch_transport(elapsed_ms, &msg);
                    self.link.status(
                        StatusLevel::Error,
                        format!("cannot reach the measurement API ({elapsed_ms}ms)"),
                    );
                    Outcome::TransportFailure
                }
            };

            self.apply_outcome(&outcome);
        }
        report
    }

    fn apply_outcome(&mut self, outcome: &Outcome) {
        let before = self.state.factor;
        self.state = adaptive::apply(&self.state, outcome, Instant::now(), self.cfg.decay);
        let after = self.state.factor;

        if after > before {
            debug_hooks::log_backoff(
                after,
                self.state.pacing.chunk_size,
                self.state.pacing.poll_interval.as_millis(),
            );
            self.link.emit(FeedEvent::Backoff {
                factor: after,
                poll_interval: self.state.pacing.poll_interval,
            });
        } else if after < before {
            debug_hooks::log_factor_decay(after);
        } else if *outcome == Outcome::QuotaExceeded {
            debug_hooks::log_backoff_suppressed(after);
        }
    }
}

pub async fn run_polling(settings: FeedSettings, streams: TokenStreams, link: FeedLink) {
    let api = match HttpApi::new(&settings.endpoint, &settings.token, settings.request_timeout()) {
        Ok(api) => api,
        Err(err) => {
            link.status(StatusLevel::Error, format!("cannot build HTTP client: {err}"));
            return;
        }
    };
    let cfg = PollConfig::from_settings(&settings);
    Scheduler::new(api, cfg, settings.pacing(), streams, link)
        .run()
        .await;
}
