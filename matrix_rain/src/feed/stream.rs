//! `text/event-stream` ingestion. Every `data:` payload goes through the
//! normalizer like a polled response.

use crate::debug_hooks;
use crate::error::FetchError;
use crate::feed::api::truncate_body;
use crate::feed::{poll, FeedLink, StatusLevel};
use crate::normalize::normalize_text;
use crate::settings::FeedSettings;
use crate::tokens::TokenStreams;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use std::time::Duration;

pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);
const IDLE_CHECK: Duration = Duration::from_secs(1);

/// Incremental SSE framing. Bytes are buffered until a full line is
/// available so multi-byte characters split across chunks survive.
#[derive(Debug, Default)]
pub struct SseParser {
    buf: Vec<u8>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the payload of every event completed by `chunk`.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.data
                    .push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            }
            // comments, `event:`, `id:` and `retry:` lines carry nothing to draw
        }
        events
    }
}

async fn open(
    client: &reqwest::Client,
    settings: &FeedSettings,
) -> Result<reqwest::Response, FetchError> {
    let mut req = client
        .get(&settings.endpoint)
        .header(ACCEPT, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache");
    if !settings.token.is_empty() {
        req = req.bearer_auth(&settings.token);
    }
    let resp = req.send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(FetchError::Http {
            status: status.as_u16(),
            body: truncate_body(&body),
        });
    }
    Ok(resp)
}

/// Reads events until the body ends or the loop is stopped. Returns false
/// when stopped.
async fn consume(
    resp: reqwest::Response,
    streams: &TokenStreams,
    link: &FeedLink,
    repeat: usize,
) -> bool {
    let mut parser = SseParser::new();
    let mut body = Box::pin(resp.bytes_stream());

    loop {
        // wake up periodically so a stopped loop on an idle stream exits
        let next = tokio::time::timeout(IDLE_CHECK, body.next()).await;
        if !link.is_alive() {
            debug_hooks::log_stale_result("stream");
            return false;
        }
        let chunk = match next {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(_) => continue,
        };
        match chunk {
            Ok(bytes) => {
                for event in parser.feed(&bytes) {
                    debug_hooks::log_stream_event(event.len());
                    let out = normalize_text(&event);
                    streams.ingest(&out, repeat);
                }
            }
            Err(err) => {
                debug_hooks::log_stream_issue(format!("stream read failed: {err}"));
                link.status(StatusLevel::Warn, "event stream interrupted; reconnecting");
                return true;
            }
        }
    }
    debug_hooks::log_stream_issue("event stream closed by server");
    link.is_alive()
}

pub async fn run_stream(settings: FeedSettings, streams: TokenStreams, link: FeedLink) {
    // no overall timeout: the body is open-ended
    let client = match reqwest::Client::builder()
        .connect_timeout(settings.request_timeout())
        .build()
    {
        Ok(c) => c,
        Err(err) => {
            link.status(StatusLevel::Error, format!("cannot build HTTP client: {err}"));
            return;
        }
    };

    let mut opened_once = false;
    loop {
        if !link.is_alive() {
            break;
        }
        match open(&client, &settings).await {
            Ok(resp) => {
                if !link.is_alive() {
                    debug_hooks::log_stale_result("stream");
                    break;
                }
                opened_once = true;
                debug_hooks::log_stream_open(&settings.endpoint);
                link.status(StatusLevel::Info, format!("streaming {}", settings.endpoint));
                if !consume(resp, &streams, &link, settings.repeat).await {
                    break;
                }
            }
            Err(err) if !opened_once => {
                debug_hooks::log_stream_issue(format!("stream unavailable: {err}"));
                link.status(
                    StatusLevel::Warn,
                    format!("stream unavailable ({err}); falling back to polling"),
                );
                poll::run_polling(settings, streams, link).await;
                return;
            }
            Err(err) => {
                debug_hooks::log_stream_issue(format!("reconnect failed: {err}"));
                link.status(StatusLevel::Warn, format!("event stream down: {err}"));
            }
        }
        if !link.sleep(RECONNECT_DELAY).await {
            break;
        }
    }
}
