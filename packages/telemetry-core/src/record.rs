// Decoding of one NDJSON telemetry line
//
// Sample records carry `t_s` (seconds) or `timestamp_ns` (integer
// nanoseconds), an optional `sensor_id`, and any number of numeric channel
// fields. Status records (`"type": "status"`) report the device rate instead.

use crate::types::SourceId;
use serde_json::{Map, Value};
use thiserror::Error;

const RESERVED_KEYS: [&str; 4] = ["t_s", "timestamp_ns", "sensor_id", "type"];

/// Why a line could not be turned into a record
#[derive(Debug, Error, PartialEq)]
pub enum LineError {
    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("record is not a JSON object")]
    NotObject,

    #[error("record has neither t_s nor timestamp_ns")]
    MissingTimestamp,
}

/// Numeric fields of one sample record
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    pub source_id: SourceId,
    /// Seconds
    pub timestamp: f64,
    /// `(channel name, value)` sorted by name
    pub channels: Vec<(String, f64)>,
    /// Fields that looked like data but did not coerce to a finite number
    pub dropped_fields: usize,
}

/// Rate reported by the device
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub source_id: SourceId,
    /// Seconds between samples
    pub interval: Option<f64>,
    pub hz: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Samples(SampleRecord),
    Status(StatusReport),
}

/// Decode one line; blank lines yield `Ok(None)`
pub fn decode_line(line: &str) -> Result<Option<Record>, LineError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(line).map_err(|e| LineError::Json(e.to_string()))?;
    let object = match value {
        Value::Object(object) => object,
        _ => return Err(LineError::NotObject),
    };
    decode_object(&object).map(Some)
}

pub fn decode_object(object: &Map<String, Value>) -> Result<Record, LineError> {
    let source_id = object
        .get("sensor_id")
        .and_then(source_id_of)
        .unwrap_or_default();

    if object.get("type").and_then(Value::as_str) == Some("status") {
        return Ok(Record::Status(StatusReport {
            source_id,
            interval: object.get("interval").and_then(coerce_number),
            hz: object.get("hz").and_then(coerce_number),
        }));
    }

    let timestamp = timestamp_of(object).ok_or(LineError::MissingTimestamp)?;

    let mut channels = Vec::new();
    let mut dropped_fields = 0;
    for (key, value) in object {
        if RESERVED_KEYS.contains(&key.as_str()) {
            continue;
        }
        match value {
            Value::Number(_) | Value::String(_) => match coerce_number(value) {
                Some(v) => channels.push((key.clone(), v)),
                None => dropped_fields += 1,
            },
            // Flags, nulls and nested values are never channels
            Value::Bool(_) | Value::Null | Value::Array(_) | Value::Object(_) => {}
        }
    }

    Ok(Record::Samples(SampleRecord {
        source_id,
        timestamp,
        channels,
        dropped_fields,
    }))
}

fn source_id_of(value: &Value) -> Option<SourceId> {
    match value {
        Value::Number(n) => Some(match n.as_i64() {
            Some(id) => SourceId::Int(id),
            None => SourceId::Text(n.to_string()),
        }),
        Value::String(s) => Some(SourceId::Text(s.clone())),
        _ => None,
    }
}

// `t_s` wins when both are present
fn timestamp_of(object: &Map<String, Value>) -> Option<f64> {
    if let Some(ts) = object.get("t_s").and_then(coerce_number) {
        return Some(ts);
    }
    let ns = object.get("timestamp_ns")?;
    match ns {
        Value::Number(n) => n
            .as_i64()
            .map(|ns| ns as f64 / 1e9)
            .or_else(|| n.as_u64().map(|ns| ns as f64 / 1e9)),
        Value::String(s) => s.trim().parse::<i64>().ok().map(|ns| ns as f64 / 1e9),
        _ => None,
    }
}

/// Finite number from a JSON number or a numeric string
fn coerce_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}
