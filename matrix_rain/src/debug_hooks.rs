use chrono::Utc;
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

const ENV_VAR: &str = "MATRIX_DEBUG_HOOKS";

static ENABLED: OnceLock<bool> = OnceLock::new();
static TO_STDERR: OnceLock<bool> = OnceLock::new();
static FILE_HANDLE: OnceLock<Option<Mutex<std::fs::File>>> = OnceLock::new();

fn hooks_enabled() -> bool {
    *ENABLED.get_or_init(|| {
        std::env::var(ENV_VAR)
            .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
            .unwrap_or(false)
    })
}

/// The terminal belongs to the renderer, so stderr mirroring is opt-in.
fn mirror_to_stderr() -> bool {
    *TO_STDERR.get_or_init(|| {
        std::env::var(ENV_VAR)
            .map(|v| v.eq_ignore_ascii_case("stderr"))
            .unwrap_or(false)
    })
}

fn log_file() -> Option<&'static Mutex<std::fs::File>> {
    FILE_HANDLE
        .get_or_init(|| {
            let _ = std::fs::create_dir_all("data");
            let path = Path::new("data").join("debug_hooks.log");
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .or_else(|_| {
                    OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(std::env::temp_dir().join("matrix_rain_debug_hooks.log"))
                })
                .ok()
                .map(Mutex::new)
        })
        .as_ref()
}

struct HookLogger;

impl Log for HookLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        hooks_enabled() || metadata.level() <= Level::Warn
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let ts = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let formatted = format!("[{ts}][{}] {}", record.target(), record.args());

        if let Some(file) = log_file() {
            if let Ok(mut f) = file.lock() {
                let _ = writeln!(f, "{formatted}");
            }
        }
        if mirror_to_stderr() {
            eprintln!("{formatted}");
        }
    }

    fn flush(&self) {
        if let Some(file) = log_file() {
            if let Ok(mut f) = file.lock() {
                let _ = f.flush();
            }
        }
    }
}

static LOGGER: HookLogger = HookLogger;

/// Installs the file logger. Warnings and errors are always kept; everything
/// else only with `MATRIX_DEBUG_HOOKS` set.
pub fn init() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(if hooks_enabled() {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        });
    }
}

/// First `head` occurrences, then every `every`-th.
fn sampled(counter: &AtomicU64, head: u64, every: u64) -> Option<u64> {
    let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
    (n <= head || n % every == 0).then_some(n)
}

pub fn log_feed_start(mode: &str, detail: impl AsRef<str>) {
    log::info!(target: "feed", "starting {mode} feed; {}", detail.as_ref());
}

pub fn log_feed_stop(mode: &str) {
    log::info!(target: "feed", "stopping {mode} feed");
}

pub fn log_stale_result(mode: &str) {
    log::debug!(target: "feed", "dropping result from stopped {mode} loop");
}

pub fn log_cycle_start(cycle: u64, tags: usize, chunks: usize, factor: u32) {
    static COUNT: AtomicU64 = AtomicU64::new(0);
    if sampled(&COUNT, 10, 20).is_some() {
        log::info!(
            target: "feed.poll",
            "cycle #{cycle} tags={tags} chunks={chunks} factor={factor}"
        );
    }
}

pub fn log_fetch_ok(window: &str, elapsed_ms: u128, tokens: usize) {
    static COUNT: AtomicU64 = AtomicU64::new(0);
    if let Some(n) = sampled(&COUNT, 20, 100) {
        log::info!(
            target: "feed.poll",
            "fetch #{n} ok in {elapsed_ms}ms tokens={tokens} {window}"
        );
    }
}

pub fn log_fetch_empty(window: &str) {
    log::info!(target: "feed.poll", "no data points for {window}");
}

pub fn log_fetch_http(status: u16, elapsed_ms: u128, window: &str, body: &str) {
    log::warn!(
        target: "feed.poll",
        "HTTP {status} after {elapsed_ms}ms for {window}; body={body:?}"
    );
}

pub fn log_fetch_transport(elapsed_ms: u128, err: &str) {
    log::warn!(target: "feed.poll", "transport failure after {elapsed_ms}ms: {err}");
}

pub fn log_fetch_decode(window: &str, err: &str) {
    log::warn!(target: "feed.poll", "unreadable response for {window}: {err}");
}

pub fn log_config_error(detail: impl AsRef<str>) {
    log::warn!(target: "feed.poll", "not polling: {}", detail.as_ref());
}

pub fn log_tag_discovery(count: usize) {
    log::info!(target: "feed.poll", "discovered {count} tags");
}

pub fn log_backoff(factor: u32, chunk_size: usize, poll_ms: u128) {
    log::warn!(
        target: "feed.backoff",
        "quota exceeded; factor={factor} chunk_size={chunk_size} poll={poll_ms}ms"
    );
}

pub fn log_backoff_suppressed(factor: u32) {
    log::debug!(target: "feed.backoff", "quota signal inside cooldown; factor stays {factor}");
}

pub fn log_factor_decay(factor: u32) {
    log::info!(target: "feed.backoff", "sustained success; factor decayed to {factor}");
}

pub fn log_normalize_fallback(hint: impl AsRef<str>) {
    static COUNT: AtomicU64 = AtomicU64::new(0);
    if let Some(n) = sampled(&COUNT, 5, 50) {
        log::debug!(
            target: "feed.normalize",
            "unrecognized payload #{n} ({}); flattening",
            hint.as_ref()
        );
    }
}

pub fn log_normalize_text(len: usize, err: &str) {
    static COUNT: AtomicU64 = AtomicU64::new(0);
    if sampled(&COUNT, 5, 50).is_some() {
        log::debug!(target: "feed.normalize", "non-JSON payload ({len} bytes): {err}");
    }
}

pub fn log_demo_tick(n: u64) {
    if n <= 3 || n % 240 == 0 {
        log::debug!(target: "feed.demo", "demo tick #{n}");
    }
}

pub fn log_stream_open(endpoint: &str) {
    log::info!(target: "feed.stream", "event stream open: {endpoint}");
}

pub fn log_stream_event(bytes: usize) {
    static COUNT: AtomicU64 = AtomicU64::new(0);
    if let Some(n) = sampled(&COUNT, 10, 100) {
        log::debug!(target: "feed.stream", "event #{n} ({bytes} bytes)");
    }
}

pub fn log_stream_issue(detail: impl AsRef<str>) {
    log::warn!(target: "feed.stream", "{}", detail.as_ref());
}

pub fn log_settings(result: &str, detail: impl AsRef<str>) {
    log::info!(target: "settings", "{result}: {}", detail.as_ref());
}

pub fn log_settings_issue(detail: impl AsRef<str>) {
    log::warn!(target: "settings", "{}", detail.as_ref());
}
