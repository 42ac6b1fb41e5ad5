//! Producers that fill the token buffers: polling, streaming and the demo
//! generator. At most one runs at a time under a [`FeedController`].

pub mod adaptive;
pub mod api;
pub mod demo;
pub mod poll;
pub mod stream;
pub mod window;

use crate::debug_hooks;
use crate::error::ConfigError;
use crate::settings::FeedSettings;
use crate::tokens::TokenStreams;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Written into the character buffer when a request returned no points.
pub const NO_DATA_MARKER: &str = " NO DATA ";
/// Written into the character buffer on connectivity failures.
pub const TRANSPORT_MARKER: &str = "…";

const ALIVE_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedMode {
    Demo,
    Polling,
    Stream,
}

impl FeedMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedMode::Demo => "demo",
            FeedMode::Polling => "polling",
            FeedMode::Stream => "stream",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Started { mode: FeedMode },
    Status { level: StatusLevel, message: String },
    Backoff { factor: u32, poll_interval: Duration },
}

/// Event sender that goes quiet once its loop has been stopped.
#[derive(Debug, Clone)]
pub struct FeedLink {
    tx: Sender<FeedEvent>,
    alive: Arc<AtomicBool>,
}

impl FeedLink {
    pub fn new(tx: Sender<FeedEvent>, alive: Arc<AtomicBool>) -> Self {
        Self { tx, alive }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn alive_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.alive)
    }

    pub fn emit(&self, event: FeedEvent) {
        if self.is_alive() {
            let _ = self.tx.send(event);
        }
    }

    pub fn status(&self, level: StatusLevel, message: impl Into<String>) {
        self.emit(FeedEvent::Status {
            level,
            message: message.into(),
        });
    }

    /// Sleeps in short slices; false when the loop was stopped meanwhile.
    pub async fn sleep(&self, total: Duration) -> bool {
        let mut left = total;
        while !left.is_zero() {
            if !self.is_alive() {
                return false;
            }
            let step = left.min(ALIVE_POLL);
            tokio::time::sleep(step).await;
            left -= step;
        }
        self.is_alive()
    }
}

struct ActiveFeed {
    mode: FeedMode,
    alive: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Owns the single live producer loop.
pub struct FeedController {
    handle: Handle,
    streams: TokenStreams,
    tx: Sender<FeedEvent>,
    active: Option<ActiveFeed>,
}

impl FeedController {
    pub fn new(handle: Handle, streams: TokenStreams, tx: Sender<FeedEvent>) -> Self {
        Self {
            handle,
            streams,
            tx,
            active: None,
        }
    }

    pub fn streams(&self) -> &TokenStreams {
        &self.streams
    }

    pub fn mode(&self) -> Option<FeedMode> {
        self.active.as_ref().map(|a| a.mode)
    }

    pub fn is_running(&self) -> bool {
        self.active.as_ref().is_some_and(|a| !a.task.is_finished())
    }

    /// Stops the current loop, then starts the one the settings ask for.
    /// Returns the started mode, or `None` when the configuration is unusable.
    pub fn start_from_settings(&mut self, settings: &FeedSettings) -> Option<FeedMode> {
        self.stop();

        let settings = settings.sanitized();
        let mode = settings.resolve_mode();
        let alive = Arc::new(AtomicBool::new(true));
        let link = FeedLink::new(self.tx.clone(), Arc::clone(&alive));

        if mode != FeedMode::Demo && settings.endpoint.is_empty() {
            let err = ConfigError::MissingEndpoint;
            debug_hooks::log_config_error(err.to_string());
            link.status(StatusLevel::Error, err.to_string());
            return None;
        }

        let detail = match mode {
            FeedMode::Demo => format!("repeat={}", settings.repeat),
            _ => format!("endpoint={} poll={}ms", settings.endpoint, settings.poll_interval_ms),
        };
        debug_hooks::log_feed_start(mode.as_str(), detail);

        let streams = self.streams.clone();
        let task = match mode {
            FeedMode::Demo => self
                .handle
                .spawn(demo::run_demo(streams, link.clone(), settings.repeat)),
            FeedMode::Polling => self
                .handle
                .spawn(poll::run_polling(settings, streams, link.clone())),
            FeedMode::Stream => self
                .handle
                .spawn(stream::run_stream(settings, streams, link.clone())),
        };

        link.emit(FeedEvent::Started { mode });
        self.active = Some(ActiveFeed { mode, alive, task });
        Some(mode)
    }

    /// Clears the alive flag, then aborts the task so an in-flight request
    /// does not outlive the switch.
    pub fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.alive.store(false, Ordering::SeqCst);
            active.task.abort();
            debug_hooks::log_feed_stop(active.mode.as_str());
        }
    }
}

impl Drop for FeedController {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ModeSetting;
    use std::sync::mpsc;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn switching_modes_stops_previous_loop() {
        let (tx, rx) = mpsc::channel();
        let mut ctl = FeedController::new(Handle::current(), TokenStreams::default(), tx);

        assert_eq!(ctl.start_from_settings(&FeedSettings::default()), Some(FeedMode::Demo));
        let first = ctl.active.as_ref().map(|a| Arc::clone(&a.alive)).unwrap();
        assert!(first.load(Ordering::SeqCst));

        ctl.start_from_settings(&FeedSettings::default());
        assert!(!first.load(Ordering::SeqCst));
        assert_eq!(ctl.mode(), Some(FeedMode::Demo));

        let started = rx
            .try_iter()
            .filter(|e| matches!(e, FeedEvent::Started { .. }))
            .count();
        assert_eq!(started, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_aborts_a_task_stuck_in_a_request() {
        // accepts the connection but never answers
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, _rx) = mpsc::channel();
        let mut ctl = FeedController::new(Handle::current(), TokenStreams::default(), tx);
        let settings = FeedSettings {
            mode: ModeSetting::Polling,
            endpoint: format!("http://{addr}"),
            tags: vec!["A".into()],
            request_timeout_ms: 60_000,
            ..FeedSettings::default()
        };
        assert_eq!(ctl.start_from_settings(&settings), Some(FeedMode::Polling));
        let task = ctl.active.as_ref().map(|a| a.task.abort_handle()).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!task.is_finished());

        ctl.stop();
        tokio::time::timeout(Duration::from_secs(2), async {
            while !task.is_finished() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("task still running after stop");
        assert!(!ctl.is_running());
        drop(listener);
    }

    #[tokio::test]
    async fn polling_without_endpoint_fails_fast() {
        let (tx, rx) = mpsc::channel();
        let mut ctl = FeedController::new(Handle::current(), TokenStreams::default(), tx);
        let settings = FeedSettings {
            mode: ModeSetting::Polling,
            ..FeedSettings::default()
        };
        assert_eq!(ctl.start_from_settings(&settings), None);
        assert!(!ctl.is_running());
        assert!(matches!(
            rx.try_recv(),
            Ok(FeedEvent::Status { level: StatusLevel::Error, .. })
        ));
    }

    #[tokio::test]
    async fn stopped_link_sends_nothing() {
        let (tx, rx) = mpsc::channel();
        let alive = Arc::new(AtomicBool::new(true));
        let link = FeedLink::new(tx, Arc::clone(&alive));
        link.status(StatusLevel::Info, "one");
        alive.store(false, Ordering::SeqCst);
        link.status(StatusLevel::Info, "two");
        assert!(!link.sleep(Duration::from_secs(5)).await);
        assert_eq!(rx.try_iter().count(), 1);
    }
}
