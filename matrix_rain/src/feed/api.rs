//! The remote measurement API: tag discovery and multi-tag window reads.

use crate::error::FetchError;
use crate::feed::window::{format_local, RequestWindow};
use crate::normalize::NAME_FIELDS;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

const ACCEPT_VALUE: &str = "application/json, text/plain;q=0.9, */*;q=0.8";
pub(crate) const ERROR_BODY_LIMIT: usize = 512;
const TAG_WRAPPERS: &[&str] = &["data", "items", "tags", "Data", "Items", "Tags"];

/// Seam between the scheduler and the network.
#[async_trait]
pub trait MeasurementApi: Send + Sync {
    async fn list_tags(&self) -> Result<Vec<String>, FetchError>;
    async fn fetch_window(&self, window: &RequestWindow) -> Result<Value, FetchError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct MeasurementRequest<'a> {
    tag_name: &'a [String],
    start_time: String,
    end_time: String,
    resolution_type: &'static str,
    resolution_number: u32,
    #[serde(rename = "ReturnTimeStampType")]
    return_time_stamp_type: &'a str,
}

impl<'a> From<&'a RequestWindow> for MeasurementRequest<'a> {
    fn from(w: &'a RequestWindow) -> Self {
        Self {
            tag_name: &w.tags,
            start_time: format_local(&w.start_time),
            end_time: format_local(&w.end_time),
            resolution_type: w.resolution_type.as_str(),
            resolution_number: w.resolution_number,
            return_time_stamp_type: &w.timestamp_mode,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    base: String,
    token: String,
}

impl HttpApi {
    pub fn new(base: &str, token: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base: base.trim().trim_end_matches('/').to_string(),
            token: token.trim().to_string(),
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let req = req.header(ACCEPT, ACCEPT_VALUE);
        if self.token.is_empty() {
            req
        } else {
            req.bearer_auth(&self.token)
        }
    }

    async fn read_body(resp: reqwest::Response) -> Result<Value, FetchError> {
        let status = resp.status();
        let is_json = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("json"));
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
                body: truncate_body(&text),
            });
        }
        match serde_json::from_str::<Value>(&text) {
            Ok(v) => Ok(v),
            Err(err) if is_json => Err(FetchError::Decode(err.to_string())),
            Err(_) => Ok(Value::String(text)),
        }
    }
}

#[async_trait]
impl MeasurementApi for HttpApi {
    async fn list_tags(&self) -> Result<Vec<String>, FetchError> {
        let url = format!("{}/Tag", self.base);
        let resp = self.authorize(self.client.get(url)).send().await?;
        let body = Self::read_body(resp).await?;
        Ok(parse_tag_list(&body))
    }

    async fn fetch_window(&self, window: &RequestWindow) -> Result<Value, FetchError> {
        let url = format!("{}/MeasurementMulti", self.base);
        let body = MeasurementRequest::from(window);
        let resp = self
            .authorize(self.client.post(url))
            .json(&body)
            .send()
            .await?;
        Self::read_body(resp).await
    }
}

pub(crate) fn truncate_body(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(ERROR_BODY_LIMIT) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

/// Strings, or records with a name-like field, optionally wrapped in an object.
pub fn parse_tag_list(body: &Value) -> Vec<String> {
    let items = match body {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match TAG_WRAPPERS
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_array))
        {
            Some(items) => items.as_slice(),
            None => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    let mut out: Vec<String> = Vec::new();
    for item in items {
        let name = match item {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Object(map) => NAME_FIELDS
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str))
                .map(|s| s.trim().to_string()),
            _ => None,
        };
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            if !out.contains(&name) {
                out.push(name);
            }
        }
    }
    out
}
