//! Request windows: tag chunking, time ranges and resolution.

use crate::error::ConfigError;
use chrono::{DateTime, Duration, Local, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// Canonical local representation sent to the API.
pub const LOCAL_FORMAT: &str = "%Y-%m-%d %H:%M";
/// `end` trails wall-clock time to stay clear of server clock skew.
pub const SAFETY_MARGIN_SECS: i64 = 60;
/// Upper bound on estimated points per request.
pub const POINT_CAP: u64 = 2000;
pub const MIN_LOOKBACK_MINUTES: i64 = 1;

const INPUT_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResolutionType {
    #[serde(rename = "s")]
    Seconds,
    #[default]
    #[serde(rename = "m")]
    Minutes,
    #[serde(rename = "h")]
    Hours,
    #[serde(rename = "d")]
    Days,
}

impl ResolutionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionType::Seconds => "s",
            ResolutionType::Minutes => "m",
            ResolutionType::Hours => "h",
            ResolutionType::Days => "d",
        }
    }

    pub fn unit_secs(&self) -> u64 {
        match self {
            ResolutionType::Seconds => 1,
            ResolutionType::Minutes => 60,
            ResolutionType::Hours => 3600,
            ResolutionType::Days => 86_400,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeMode {
    #[default]
    Latest,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStrategy {
    /// Rolling lookback window with delta fetches.
    #[default]
    Windowed,
    /// Only the newest resolution step.
    PointSample,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeRange {
    pub fn seconds(&self) -> i64 {
        (self.end - self.start).num_seconds().max(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestWindow {
    pub tags: Vec<String>,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub resolution_type: ResolutionType,
    pub resolution_number: u32,
    pub timestamp_mode: String,
}

impl RequestWindow {
    /// Short form for status lines and logs.
    pub fn describe(&self) -> String {
        format!(
            "[{}] {} → {} @{}{}",
            self.tags.join(","),
            format_local(&self.start_time),
            format_local(&self.end_time),
            self.resolution_number,
            self.resolution_type.as_str()
        )
    }
}

pub fn format_local(t: &NaiveDateTime) -> String {
    t.format(LOCAL_FORMAT).to_string()
}

fn truncate_to_minute(t: NaiveDateTime) -> NaiveDateTime {
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}

/// Accepts the canonical form, seconds, a `T` separator, or full ISO-8601 with
/// an offset (converted to local time). Seconds are dropped.
pub fn parse_time_input(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(truncate_to_minute(dt.with_timezone(&Local).naive_local()));
    }
    INPUT_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .map(truncate_to_minute)
}

pub fn normalize_time_input(raw: &str) -> Option<String> {
    parse_time_input(raw).map(|t| format_local(&t))
}

/// User-specified range, validated.
pub fn manual_range(start: &str, end: &str) -> Result<TimeRange, ConfigError> {
    if start.trim().is_empty() || end.trim().is_empty() {
        return Err(ConfigError::MissingTimeRange);
    }
    let s = parse_time_input(start).ok_or_else(|| ConfigError::InvalidTime(start.to_string()))?;
    let e = parse_time_input(end).ok_or_else(|| ConfigError::InvalidTime(end.to_string()))?;
    if s >= e {
        return Err(ConfigError::EmptyTimeRange {
            start: format_local(&s),
            end: format_local(&e),
        });
    }
    Ok(TimeRange { start: s, end: e })
}

/// Rolling range ending `SAFETY_MARGIN_SECS` before `now`. The lookback shrinks
/// by `factor`; a previous successful end narrows the start to a delta fetch.
pub fn latest_range(
    now: NaiveDateTime,
    lookback_minutes: u32,
    factor: u32,
    last_end: Option<NaiveDateTime>,
    strategy: FetchStrategy,
    resolution_type: ResolutionType,
    resolution_number: u32,
) -> TimeRange {
    let end = truncate_to_minute(now - Duration::seconds(SAFETY_MARGIN_SECS));
    let one_minute = Duration::minutes(MIN_LOOKBACK_MINUTES);

    let start = match strategy {
        FetchStrategy::PointSample => {
            let step_secs =
                (resolution_type.unit_secs() as i64).saturating_mul(resolution_number.max(1) as i64);
            Duration::try_seconds(step_secs)
                .map(|step| step.max(one_minute))
                .and_then(|step| end.checked_sub_signed(step))
                .unwrap_or(end - one_minute)
        }
        FetchStrategy::Windowed => {
            let lookback = (lookback_minutes as i64 / factor.max(1) as i64).max(MIN_LOOKBACK_MINUTES);
            let fresh = end - Duration::minutes(lookback);
            match last_end {
                Some(prev) if prev > fresh => prev,
                _ => fresh,
            }
        }
    };

    // clock has not moved a full minute since the last success
    let start = if start >= end { end - one_minute } else { start };
    TimeRange { start, end }
}

/// Caps the list at `max_tags` and splits it into request-sized batches.
pub fn chunk_tags(tags: &[String], chunk_size: usize, max_tags: usize) -> Vec<Vec<String>> {
    let max_tags = max_tags.max(1);
    let chunk_size = chunk_size.clamp(1, max_tags);
    tags.iter()
        .filter(|t| !t.trim().is_empty())
        .take(max_tags)
        .cloned()
        .collect::<Vec<_>>()
        .chunks(chunk_size)
        .map(<[String]>::to_vec)
        .collect()
}

pub fn estimate_points(tags: usize, window_secs: i64, unit_secs: u64, resolution_number: u32) -> u64 {
    let step = unit_secs.max(1) * resolution_number.max(1) as u64;
    let window = window_secs.max(0) as u64;
    tags as u64 * window.div_ceil(step)
}

/// Raises the resolution number until the estimate fits under `cap`.
pub fn cap_resolution(
    tags: usize,
    window_secs: i64,
    resolution_type: ResolutionType,
    resolution_number: u32,
    cap: u64,
) -> u32 {
    let unit = resolution_type.unit_secs();
    if tags == 0 || estimate_points(tags, window_secs, unit, resolution_number) <= cap {
        return resolution_number.max(1);
    }
    let per_tag = (cap / tags as u64).max(1);
    let needed = (window_secs.max(0) as u64).div_ceil(unit * per_tag);
    let needed = u32::try_from(needed).unwrap_or(u32::MAX);
    resolution_number.max(needed).max(1)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionSettings {
    pub resolution_type: ResolutionType,
    pub resolution_number: u32,
    pub timestamp_mode: String,
}

/// Window for one chunk. The factor coarsens resolution persistently; the point
/// cap only adjusts this request.
pub fn build_window(
    tags: Vec<String>,
    range: &TimeRange,
    res: &ResolutionSettings,
    factor: u32,
) -> RequestWindow {
    let scaled = res.resolution_number.max(1).saturating_mul(factor.max(1));
    let resolution_number =
        cap_resolution(tags.len(), range.seconds(), res.resolution_type, scaled, POINT_CAP);
    RequestWindow {
        tags,
        start_time: range.start,
        end_time: range.end,
        resolution_type: res.resolution_type,
        resolution_number,
        timestamp_mode: res.timestamp_mode.clone(),
    }
}
