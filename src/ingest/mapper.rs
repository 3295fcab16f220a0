/// Rack payload mapping.
///
/// Converts one `RawRack` into the `StationFields` bundle consumed by the
/// registry. Each field is validated on its own: a malformed value is
/// dropped, and only a payload with no usable field at all is rejected.

use serde_json::Value;

use crate::ingest::directory::RawRack;
use crate::model::{Position, ServiceError, StationFields};

/// Map a raw rack payload into station fields.
///
/// Returns `MalformedRecord` when nothing usable survived, in which case the
/// station is left untouched for this cycle.
pub fn map_rack(raw: &RawRack) -> Result<StationFields, ServiceError> {
    let fields = StationFields {
        description: raw.description.as_ref().and_then(parse_description),
        position: parse_position(raw.latitude.as_ref(), raw.longitude.as_ref()),
        ready_count: raw.ready_bikes.as_ref().and_then(parse_count),
        empty_count: raw.empty_locks.as_ref().and_then(parse_count),
        online: raw.online.as_ref().and_then(parse_online),
    };

    if fields.is_empty() {
        return Err(ServiceError::MalformedRecord(
            "no usable fields in rack details".to_string(),
        ));
    }
    Ok(fields)
}

// ---------------------------------------------------------------------------
// Field parsers
// ---------------------------------------------------------------------------

/// Text content of a scalar JSON value, trimmed.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Strip the operator's `<digits>-` numbering prefix, e.g. "5-Main St".
pub fn clean_description(text: &str) -> String {
    let text = text.trim();
    let digits = text.bytes().take_while(u8::is_ascii_digit).count();
    let stripped = match text[digits..].strip_prefix('-') {
        Some(rest) if digits > 0 => rest,
        _ => text,
    };
    stripped.trim().to_string()
}

fn parse_description(value: &Value) -> Option<String> {
    let Value::String(text) = value else {
        return None;
    };
    let cleaned = clean_description(text);
    if cleaned.is_empty() { None } else { Some(cleaned) }
}

fn parse_coordinate(value: &Value, limit: f64) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (parsed.is_finite() && parsed.abs() <= limit).then_some(parsed)
}

fn parse_position(latitude: Option<&Value>, longitude: Option<&Value>) -> Option<Position> {
    let latitude = parse_coordinate(latitude?, 90.0)?;
    let longitude = parse_coordinate(longitude?, 180.0)?;
    Some(Position { latitude, longitude })
}

fn parse_count(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    }
}

/// The directory reports availability as a one-character flag, "1" = online.
fn parse_online(value: &Value) -> Option<bool> {
    match scalar_text(value)?.as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
