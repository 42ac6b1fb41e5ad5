//! Turns arbitrary measurement payloads into value tokens and a character stream.
//!
//! Shape detection is a small decision tree ([`PayloadShape`]): a recognized
//! tag→series layout yields typed tokens, everything else is flattened into
//! `key=value ` snippets. Output is bounded regardless of input size.

use crate::debug_hooks;
use crate::tokens::ValueToken;
use serde_json::{Map, Value};

pub const MAX_DEPTH: usize = 6;
pub const MAX_TOKENS: usize = 200;
pub const MAX_CHARS: usize = 1400;
pub const ARRAY_CAP: usize = 32;
pub const OBJECT_CAP: usize = 48;

/// Only the newest entries of an array series are looked at.
const LATEST_WINDOW: usize = 3;

const VALUE_FIELDS: &[&str] = &["Value", "value", "Y", "y", "Data"];
pub const NAME_FIELDS: &[&str] = &["TagName", "Name", "Tag", "name", "tag"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub tokens: Vec<ValueToken>,
    pub char_stream: String,
}

impl Normalized {
    pub fn from_tokens(tokens: Vec<ValueToken>) -> Self {
        let mut char_stream = String::new();
        for t in &tokens {
            char_stream.push_str(&t.snippet());
        }
        Self {
            tokens,
            char_stream: truncate_chars(char_stream, MAX_CHARS),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty() && self.char_stream.is_empty()
    }
}

#[derive(Debug, PartialEq)]
pub enum PayloadShape<'a> {
    /// Nothing worth drawing (`null`, `{}`, `[]`, blank text, or a series
    /// layout without a single point).
    Empty,
    /// A bare scalar at the top level.
    Scalar(&'a Value),
    /// `(tag, latest scalar)` pairs in payload order.
    Series(Vec<(&'a str, &'a Value)>),
    /// Unrecognized layout; flattened generically.
    Generic(&'a Value),
}

pub fn classify(payload: &Value) -> PayloadShape<'_> {
    match payload {
        Value::Null => PayloadShape::Empty,
        Value::String(s) if s.trim().is_empty() => PayloadShape::Empty,
        Value::String(_) | Value::Number(_) | Value::Bool(_) => PayloadShape::Scalar(payload),
        Value::Object(map) if map.is_empty() => PayloadShape::Empty,
        Value::Array(arr) if arr.is_empty() => PayloadShape::Empty,
        _ => {
            match find_series(payload, 0) {
                // recognized layout without a single point
                Some(series) if series.is_empty() => return PayloadShape::Empty,
                Some(series) => return PayloadShape::Series(series),
                None => {}
            }
            if let Value::Object(map) = payload {
                let flat = scalar_entries(map);
                let no_containers = map.values().all(|v| !v.is_array() && !v.is_object());
                if no_containers && !flat.is_empty() {
                    return PayloadShape::Series(flat);
                }
            }
            PayloadShape::Generic(payload)
        }
    }
}

/// Never fails; malformed or unknown shapes degrade to a flatten or to nothing.
pub fn normalize(payload: &Value) -> Normalized {
    match classify(payload) {
        PayloadShape::Empty => Normalized::default(),
        PayloadShape::Scalar(v) => match format_scalar(v) {
            Some(s) => Normalized {
                tokens: Vec::new(),
                char_stream: truncate_chars(format!("{s} "), MAX_CHARS),
            },
            None => Normalized::default(),
        },
        PayloadShape::Series(entries) => {
            let tokens: Vec<ValueToken> = entries
                .into_iter()
                .filter_map(|(tag, v)| ValueToken::new(tag, format_scalar(v)?))
                .take(MAX_TOKENS)
                .collect();
            Normalized::from_tokens(tokens)
        }
        PayloadShape::Generic(v) => {
            debug_hooks::log_normalize_fallback(shape_hint(v));
            let mut out = String::new();
            flatten(v, "value", 0, &mut out);
            Normalized {
                tokens: Vec::new(),
                char_stream: truncate_chars(out, MAX_CHARS),
            }
        }
    }
}

/// Raw response text: JSON when it parses, plain text otherwise.
pub fn normalize_text(raw: &str) -> Normalized {
    match serde_json::from_str::<Value>(raw) {
        Ok(v) => normalize(&v),
        Err(err) => {
            debug_hooks::log_normalize_text(raw.len(), &err.to_string());
            normalize(&Value::String(raw.to_string()))
        }
    }
}

/// Numeric-looking input (comma decimals allowed) becomes 2-decimal text;
/// anything else is trimmed and passed through.
pub fn format_value(raw: &str) -> String {
    let trimmed = raw.trim();
    match parse_numeric(trimmed) {
        Some(n) => format!("{n:.2}"),
        None => trimmed.to_string(),
    }
}

fn parse_numeric(s: &str) -> Option<f64> {
    if s.is_empty() || !s.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    if !s
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | ',' | 'e' | 'E'))
    {
        return None;
    }
    let candidate = if !s.contains('.') && s.matches(',').count() == 1 {
        s.replace(',', ".")
    } else {
        s.to_string()
    };
    candidate.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn format_scalar(v: &Value) -> Option<String> {
    let s = match v {
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.is_finite() => format!("{f:.2}"),
            _ => n.to_string(),
        },
        Value::String(s) => format_value(s),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

fn is_scalar(v: &Value) -> bool {
    matches!(v, Value::Number(_) | Value::Bool(_))
        || matches!(v, Value::String(s) if !s.trim().is_empty())
}

fn scalar_entries(map: &Map<String, Value>) -> Vec<(&str, &Value)> {
    map.iter()
        .take(OBJECT_CAP)
        .filter(|(_, v)| is_scalar(v))
        .map(|(k, v)| (k.as_str(), v))
        .collect()
}

/// Depth-first search for the first container that looks like a series layout.
fn find_series(v: &Value, depth: usize) -> Option<Vec<(&str, &Value)>> {
    if depth > MAX_DEPTH {
        return None;
    }
    match v {
        Value::Object(map) => {
            let structured: Vec<(&str, &Value)> = map
                .iter()
                .take(OBJECT_CAP)
                .filter(|(_, v)| v.is_array() || v.is_object())
                .filter_map(|(k, v)| Some((k.as_str(), latest_value(v, depth + 1)?)))
                .collect();
            if !structured.is_empty() {
                return Some(structured);
            }
            first_series(map.values().take(OBJECT_CAP), depth + 1)
        }
        Value::Array(arr) => {
            let records: Vec<(&str, &Value)> = arr
                .iter()
                .take(ARRAY_CAP)
                .filter_map(|item| named_record(item, depth + 1))
                .collect();
            if !records.is_empty() {
                return Some(records);
            }
            if arr.iter().take(ARRAY_CAP).any(|item| record_name(item).is_some()) {
                return Some(Vec::new());
            }
            first_series(arr.iter().take(ARRAY_CAP), depth + 1)
        }
        _ => None,
    }
}

/// First child holding points; an empty layout only when no sibling has any.
fn first_series<'a>(
    children: impl Iterator<Item = &'a Value>,
    depth: usize,
) -> Option<Vec<(&'a str, &'a Value)>> {
    let mut empty_layout = false;
    for child in children {
        match find_series(child, depth) {
            Some(series) if !series.is_empty() => return Some(series),
            Some(_) => empty_layout = true,
            None => {}
        }
    }
    empty_layout.then(Vec::new)
}

fn record_name(item: &Value) -> Option<&str> {
    let obj = item.as_object()?;
    NAME_FIELDS
        .iter()
        .find_map(|f| obj.get(*f).and_then(Value::as_str))
        .filter(|s| !s.trim().is_empty())
}

/// `{ "TagName": "Flow", "Values": [...] }` style records.
fn named_record(item: &Value, depth: usize) -> Option<(&str, &Value)> {
    let obj = item.as_object()?;
    let name = record_name(item)?;
    let value = value_field(obj, depth).or_else(|| {
        obj.iter()
            .take(OBJECT_CAP)
            .filter(|(k, _)| !NAME_FIELDS.contains(&k.as_str()))
            .filter(|(_, v)| v.is_array())
            .find_map(|(_, v)| latest_value(v, depth + 1))
    })?;
    Some((name, value))
}

/// Latest scalar of a series value: the scalar itself, the newest usable entry
/// of an array, or the value field of an object.
fn latest_value(v: &Value, depth: usize) -> Option<&Value> {
    if depth > MAX_DEPTH {
        return None;
    }
    match v {
        Value::Array(arr) => arr
            .iter()
            .rev()
            .take(LATEST_WINDOW)
            .find_map(|item| match item {
                Value::Object(obj) => value_field(obj, depth + 1),
                other if is_scalar(other) => Some(other),
                _ => None,
            }),
        Value::Object(obj) => value_field(obj, depth + 1),
        other if is_scalar(other) => Some(other),
        _ => None,
    }
}

fn value_field(obj: &Map<String, Value>, depth: usize) -> Option<&Value> {
    VALUE_FIELDS.iter().find_map(|f| {
        let v = obj.get(*f)?;
        if is_scalar(v) {
            Some(v)
        } else if v.is_array() {
            latest_value(v, depth + 1)
        } else {
            None
        }
    })
}

fn flatten(v: &Value, key: &str, depth: usize, out: &mut String) {
    if depth > MAX_DEPTH || out.len() >= MAX_CHARS * 4 {
        return;
    }
    match v {
        Value::Object(map) => {
            for (k, child) in map.iter().take(OBJECT_CAP) {
                flatten(child, k, depth + 1, out);
            }
        }
        Value::Array(arr) => {
            for child in arr.iter().take(ARRAY_CAP) {
                flatten(child, key, depth + 1, out);
            }
        }
        Value::Null => {}
        scalar => {
            if let Some(s) = format_scalar(scalar) {
                out.push_str(key);
                out.push('=');
                out.push_str(&s);
                out.push(' ');
            }
        }
    }
}

fn truncate_chars(s: String, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s,
    }
}

fn shape_hint(v: &Value) -> String {
    match v {
        Value::Object(map) => format!("object with {} keys", map.len()),
        Value::Array(arr) => format!("array of {}", arr.len()),
        _ => "scalar".to_string(),
    }
}
