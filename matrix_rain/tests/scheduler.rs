use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use matrix_rain::error::{ConfigError, FetchError};
use matrix_rain::feed::adaptive::POLL_FLOOR;
use matrix_rain::feed::api::MeasurementApi;
use matrix_rain::feed::poll::{PollConfig, Scheduler};
use matrix_rain::feed::window::{RequestWindow, TimeMode};
use matrix_rain::feed::{FeedEvent, FeedLink, StatusLevel};
use matrix_rain::settings::FeedSettings;
use matrix_rain::tokens::{TokenSource, TokenStreams};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Inner {
    script: Mutex<VecDeque<Result<Value, FetchError>>>,
    windows: Mutex<Vec<RequestWindow>>,
    tags: Vec<String>,
    tag_calls: AtomicUsize,
    /// Cleared while a request is in flight, as a mode switch would.
    kill_on_fetch: Mutex<Option<Arc<AtomicBool>>>,
}

#[derive(Clone, Default)]
struct FakeApi {
    inner: Arc<Inner>,
}

impl FakeApi {
    fn new(tags: &[&str], script: Vec<Result<Value, FetchError>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                script: Mutex::new(script.into()),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                ..Inner::default()
            }),
        }
    }

    fn windows(&self) -> Vec<RequestWindow> {
        self.inner.windows.lock().unwrap().clone()
    }
}

#[async_trait]
impl MeasurementApi for FakeApi {
    async fn list_tags(&self) -> Result<Vec<String>, FetchError> {
        self.inner.tag_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.inner.tags.clone())
    }

    async fn fetch_window(&self, window: &RequestWindow) -> Result<Value, FetchError> {
        self.inner.windows.lock().unwrap().push(window.clone());
        if let Some(flag) = self.inner.kill_on_fetch.lock().unwrap().as_ref() {
            flag.store(false, Ordering::SeqCst);
        }
        self.inner
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(json!({})))
    }
}

struct Harness {
    api: FakeApi,
    sched: Scheduler<FakeApi>,
    streams: TokenStreams,
    events: mpsc::Receiver<FeedEvent>,
    alive: Arc<AtomicBool>,
}

fn harness(settings: FeedSettings, api: FakeApi) -> Harness {
    let settings = settings.sanitized();
    let mut cfg = PollConfig::from_settings(&settings);
    cfg.chunk_spacing = Duration::ZERO;
    let streams = TokenStreams::default();
    let (tx, rx) = mpsc::channel();
    let alive = Arc::new(AtomicBool::new(true));
    let link = FeedLink::new(tx, Arc::clone(&alive));
    let sched = Scheduler::new(api.clone(), cfg, settings.pacing(), streams.clone(), link);
    Harness {
        api,
        sched,
        streams,
        events: rx,
        alive,
    }
}

fn with_tags(tags: &[&str]) -> FeedSettings {
    FeedSettings {
        endpoint: "http://unused".into(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        ..FeedSettings::default()
    }
}

fn at(h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 10)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

fn drain_chars(streams: &TokenStreams) -> String {
    std::iter::from_fn(|| streams.take_char()).collect()
}

fn quota() -> Result<Value, FetchError> {
    Err(FetchError::Http {
        status: 403,
        body: "Read operation limit exceeded".into(),
    })
}

#[tokio::test]
async fn delta_fetch_continues_from_previous_end() {
    let payload = json!({"Flow": [{"Value": 1}]});
    let api = FakeApi::new(&[], vec![Ok(payload.clone()), Ok(payload)]);
    let mut h = harness(with_tags(&["Flow"]), api);

    h.sched.run_cycle(at(12, 0)).await;
    h.sched.run_cycle(at(12, 5)).await;

    let w = h.api.windows();
    assert_eq!(w.len(), 2);
    assert_eq!(w[0].end_time, at(11, 59));
    assert_eq!(w[0].start_time, at(11, 44));
    assert_eq!(w[1].start_time, w[0].end_time);
    assert_eq!(w[1].end_time, at(12, 4));
}

#[tokio::test]
async fn scenario_payload_reaches_buffers() {
    let api = FakeApi::new(
        &[],
        vec![Ok(json!({"Flow": [{"Value": "12,5"}], "Temp": [{"Value": 21}]}))],
    );
    let mut h = harness(with_tags(&["Flow", "Temp"]), api);
    let report = h.sched.run_cycle(at(12, 0)).await;

    assert_eq!(report.tokens, 2);
    let heads: Vec<String> = std::iter::from_fn(|| {
        let depth = h.streams.depth();
        if depth.values == 0 {
            None
        } else {
            h.streams.take_value_or_reuse().map(|t| t.snippet())
        }
    })
    .collect();
    assert_eq!(heads, vec!["Flow=12.50 ", "Temp=21.00 "]);
    assert!(matches!(
        h.events.try_recv(),
        Ok(FeedEvent::Status { level: StatusLevel::Info, .. })
    ));
}

#[tokio::test]
async fn quota_burst_doubles_factor_once() {
    let api = FakeApi::new(&[], (0..5).map(|_| quota()).collect());
    let settings = FeedSettings {
        chunk_size: 1,
        ..with_tags(&["A", "B", "C", "D", "E"])
    };
    let mut h = harness(settings, api);

    let report = h.sched.run_cycle(at(12, 0)).await;
    assert_eq!(report.requests, 5);
    assert_eq!(report.quota_hits, 5);

    let state = h.sched.state();
    assert_eq!(state.factor, 2);
    assert_eq!(state.pacing.chunk_size, 1);
    assert_eq!(state.pacing.poll_interval, POLL_FLOOR);
    assert_eq!(state.last_successful_end, None);

    let events: Vec<FeedEvent> = h.events.try_iter().collect();
    let backoffs = events
        .iter()
        .filter(|e| matches!(e, FeedEvent::Backoff { .. }))
        .count();
    assert_eq!(backoffs, 1);

    let quota_line = events
        .iter()
        .find_map(|e| match e {
            FeedEvent::Status {
                level: StatusLevel::Warn,
                message,
            } => Some(message.clone()),
            _ => None,
        })
        .unwrap();
    assert!(quota_line.contains("HTTP 403"), "{quota_line}");
    assert!(quota_line.contains("[A]"), "{quota_line}");
}

#[tokio::test]
async fn backoff_shrinks_next_window_and_coarsens_resolution() {
    let api = FakeApi::new(&[], vec![quota()]);
    let mut h = harness(with_tags(&["A"]), api);
    h.sched.run_cycle(at(12, 0)).await;
    h.sched.run_cycle(at(12, 0)).await;

    let w = h.api.windows();
    assert_eq!(w[0].resolution_number, 1);
    assert_eq!(w[1].resolution_number, 2);
    // 15 minute lookback halved, integer minutes
    assert_eq!((w[1].end_time - w[1].start_time).num_minutes(), 7);
}

#[tokio::test]
async fn empty_result_injects_marker_and_advances() {
    let api = FakeApi::new(&[], vec![Ok(json!({}))]);
    let mut h = harness(with_tags(&["A"]), api);
    let report = h.sched.run_cycle(at(12, 0)).await;

    assert_eq!(report.empty, 1);
    assert_eq!(drain_chars(&h.streams), "NODATA");
    assert_eq!(h.streams.depth().values, 0);
    assert_eq!(h.sched.state().last_successful_end, Some(at(11, 59)));
}

#[tokio::test]
async fn transport_failure_leaves_state_alone() {
    let api = FakeApi::new(&[], vec![Err(FetchError::Transport("refused".into()))]);
    let mut h = harness(with_tags(&["A"]), api);
    let before = h.sched.state().clone();
    h.sched.run_cycle(at(12, 0)).await;

    assert_eq!(drain_chars(&h.streams), "…");
    assert_eq!(h.sched.state().factor, before.factor);
    assert_eq!(h.sched.state().pacing, before.pacing);
    assert_eq!(h.sched.state().last_successful_end, None);
}

#[tokio::test]
async fn http_failure_is_reported_with_code() {
    let api = FakeApi::new(
        &[],
        vec![Err(FetchError::Http {
            status: 500,
            body: "internal".into(),
        })],
    );
    let mut h = harness(with_tags(&["A"]), api);
    h.sched.run_cycle(at(12, 0)).await;

    let msg = h
        .events
        .try_iter()
        .find_map(|e| match e {
            FeedEvent::Status {
                level: StatusLevel::Error,
                message,
            } => Some(message),
            _ => None,
        })
        .unwrap();
    assert!(msg.contains("HTTP 500"), "{msg}");
    assert!(msg.contains("[A]"), "{msg}");
    assert_eq!(h.sched.state().factor, 1);
}

#[tokio::test]
async fn stopped_loop_drops_in_flight_result() {
    let api = FakeApi::new(&[], vec![Ok(json!({"Flow": [{"Value": 1}]}))]);
    let mut h = harness(with_tags(&["Flow"]), api.clone());
    *api.inner.kill_on_fetch.lock().unwrap() = Some(Arc::clone(&h.alive));

    let report = h.sched.run_cycle(at(12, 0)).await;
    assert!(report.stale);
    assert_eq!(h.streams.depth(), Default::default());
    assert_eq!(h.sched.state().last_successful_end, None);
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn missing_tags_send_no_request() {
    let api = FakeApi::new(&[], vec![]);
    let mut h = harness(with_tags(&[]), api);
    let report = h.sched.run_cycle(at(12, 0)).await;

    assert_eq!(report.config_error, Some(ConfigError::NoTags));
    assert!(h.api.windows().is_empty());
    assert!(matches!(
        h.events.try_recv(),
        Ok(FeedEvent::Status { level: StatusLevel::Error, .. })
    ));
}

#[tokio::test]
async fn discovered_tags_are_fetched_once() {
    let api = FakeApi::new(&["X", "Y"], vec![]);
    let mut h = harness(with_tags(&[]), api);
    h.sched.run_cycle(at(12, 0)).await;
    h.sched.run_cycle(at(12, 1)).await;

    assert_eq!(h.api.inner.tag_calls.load(Ordering::SeqCst), 1);
    let w = h.api.windows();
    assert_eq!(w.len(), 2);
    assert_eq!(w[0].tags, vec!["X".to_string(), "Y".to_string()]);
}

#[tokio::test]
async fn tag_cap_and_chunking() {
    let names: Vec<String> = (0..14).map(|i| format!("T{i}")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let settings = FeedSettings {
        chunk_size: 4,
        max_tags: 10,
        ..with_tags(&refs)
    };
    let mut h = harness(settings, FakeApi::new(&[], vec![]));
    h.sched.run_cycle(at(12, 0)).await;

    let sizes: Vec<usize> = h.api.windows().iter().map(|w| w.tags.len()).collect();
    assert_eq!(sizes, vec![4, 4, 2]);
}

#[tokio::test]
async fn manual_mode_needs_a_range() {
    let settings = FeedSettings {
        time_mode: TimeMode::Manual,
        ..with_tags(&["A"])
    };
    let mut h = harness(settings, FakeApi::new(&[], vec![]));
    let report = h.sched.run_cycle(at(12, 0)).await;
    assert_eq!(report.config_error, Some(ConfigError::MissingTimeRange));
    assert!(h.api.windows().is_empty());
}

#[tokio::test]
async fn manual_mode_uses_normalized_range() {
    let settings = FeedSettings {
        time_mode: TimeMode::Manual,
        manual_start: "2024-03-10T08:00:00".into(),
        manual_end: "2024-03-10 09:30".into(),
        ..with_tags(&["A"])
    };
    let mut h = harness(settings, FakeApi::new(&[], vec![]));
    h.sched.run_cycle(at(12, 0)).await;
    let w = h.api.windows();
    assert_eq!(w[0].start_time, at(8, 0));
    assert_eq!(w[0].end_time, at(9, 30));
}

#[tokio::test(start_paused = true)]
async fn loop_rearms_after_failure_and_ends_when_stopped() {
    let api = FakeApi::new(
        &[],
        vec![
            Err(FetchError::Http {
                status: 500,
                body: "internal".into(),
            }),
            Ok(json!({"Flow": [{"Value": 4}]})),
        ],
    );
    let settings = FeedSettings {
        poll_interval_ms: 5_000,
        ..with_tags(&["Flow"])
    };
    let h = harness(settings, api);
    let task = tokio::spawn(h.sched.run());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.api.windows().len(), 1);
    assert_eq!(h.streams.depth().values, 0);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.api.windows().len(), 2);
    assert_eq!(h.streams.depth().values, 1);

    h.alive.store(false, Ordering::SeqCst);
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("loop kept running after stop")
        .unwrap();
    assert_eq!(h.api.windows().len(), 2);
}

#[tokio::test]
async fn records_without_points_count_as_no_data() {
    let api = FakeApi::new(&[], vec![Ok(json!([{"TagName": "Flow", "Values": []}]))]);
    let mut h = harness(with_tags(&["Flow"]), api);
    let report = h.sched.run_cycle(at(12, 0)).await;

    assert_eq!(report.empty, 1);
    assert_eq!(report.tokens, 0);
    assert_eq!(drain_chars(&h.streams), "NODATA");
    assert_eq!(h.sched.state().last_successful_end, Some(at(11, 59)));
}
