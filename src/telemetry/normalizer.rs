//! Turns loosely-typed telemetry records into canonical [`NetworkEvent`]s.
//!
//! Producers disagree on field names and on whether numbers arrive as JSON
//! numbers or strings, so every field is probed leniently. Normalization
//! never fails: anything unusable is treated as absent.

use chrono::Utc;
use log::{log_enabled, trace, Level};
use rand::Rng;
use serde_json::{Map, Value};
use std::ops::RangeInclusive;

use crate::models::event::NetworkEvent;
use crate::utils::error::{AppError, AppResult};

/// A raw record as received from the stream
pub type RawRecord = Map<String, Value>;

/// Candidate size fields, probed in order
pub const SIZE_FIELDS: [&str; 6] = ["length", "size", "bytes", "len", "packet_size", "frame_len"];

/// Fields carrying a pre-aggregated packet count
pub const PACKET_COUNT_FIELDS: [&str; 2] = ["packets", "packet_count"];

/// Range used when a record carries no usable size
pub const SYNTHETIC_SIZE_RANGE: RangeInclusive<u64> = 64..=1464;

/// Placeholder for missing protocol and address fields
pub const UNKNOWN: &str = "Unknown";

/// Parse one text frame into a raw record. Only JSON objects are accepted.
pub fn parse_record(frame: &str) -> AppResult<RawRecord> {
    match serde_json::from_str::<Value>(frame)? {
        Value::Object(map) => Ok(map),
        other => Err(AppError::FrameParse(format!(
            "expected a JSON object, got {}",
            value_kind(&other)
        ))),
    }
}

/// Normalize a record using the thread-local RNG for size synthesis
pub fn normalize(record: &RawRecord) -> NetworkEvent {
    normalize_with(record, &mut rand::thread_rng())
}

/// Normalize a record, drawing synthetic sizes from `rng`
pub fn normalize_with<R: Rng + ?Sized>(record: &RawRecord, rng: &mut R) -> NetworkEvent {
    let (byte_size, size_inferred) = match probe_size(record) {
        Some(size) => (size, false),
        None => (rng.gen_range(SYNTHETIC_SIZE_RANGE), true),
    };

    let event = NetworkEvent {
        timestamp: Utc::now(),
        packet_count: probe_packet_count(record).unwrap_or(1),
        byte_size,
        size_inferred,
        protocol: text_field(record, "protocol")
            .map(|p| p.to_uppercase())
            .unwrap_or_else(|| UNKNOWN.to_string()),
        source: text_field(record, "source").unwrap_or_else(|| UNKNOWN.to_string()),
        destination: text_field(record, "destination").unwrap_or_else(|| UNKNOWN.to_string()),
        anomaly: false,
        severity: None,
    };

    if log_enabled!(Level::Trace) {
        trace!(
            "Normalized record: {} {} -> {}, {} bytes{}",
            event.protocol,
            event.source,
            event.destination,
            event.byte_size,
            if size_inferred { " (inferred)" } else { "" }
        );
    }

    event
}

/// First candidate size field holding a positive number
pub fn probe_size(record: &RawRecord) -> Option<u64> {
    SIZE_FIELDS
        .iter()
        .filter_map(|field| record.get(*field))
        .find_map(positive_number)
}

fn probe_packet_count(record: &RawRecord) -> Option<u64> {
    PACKET_COUNT_FIELDS
        .iter()
        .filter_map(|field| record.get(*field))
        .find_map(non_negative_integer)
}

/// Accepts JSON numbers and decimal strings, truncating fractions
fn positive_number(value: &Value) -> Option<u64> {
    let parsed = match value {
        Value::Number(n) => match n.as_u64() {
            Some(v) => Some(v),
            None => n.as_f64().and_then(truncate_float),
        },
        Value::String(s) => {
            let s = s.trim();
            match s.parse::<u64>() {
                Ok(v) => Some(v),
                Err(_) => s.parse::<f64>().ok().and_then(truncate_float),
            }
        }
        _ => None,
    };
    parsed.filter(|v| *v > 0)
}

fn non_negative_integer(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

fn truncate_float(v: f64) -> Option<u64> {
    if v.is_finite() && v >= 1.0 {
        Some(v.trunc() as u64)
    } else {
        None
    }
}

fn text_field(record: &RawRecord, key: &str) -> Option<String> {
    let text = match record.get(key)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
