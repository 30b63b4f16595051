use chrono::{DateTime, NaiveDateTime, Utc};
use quake_common::event::NewEvent;

use crate::error::ParseError;
use crate::feed::RawRecord;

const UNKNOWN_REGION: &str = "Unknown region";

/// Convert a raw feed record into a canonical event. Pure: a failure only concerns this record.
pub fn normalize(record: &RawRecord) -> Result<NewEvent, ParseError> {
    let id = record.unid.trim();
    if id.is_empty() {
        return Err(ParseError::EmptyId);
    }

    let origin_time =
        parse_timestamp(&record.time).ok_or_else(|| ParseError::InvalidTimestamp {
            id: id.to_owned(),
            value: record.time.clone(),
        })?;

    let region = match record.flynn_region.as_deref().map(str::trim) {
        Some(region) if !region.is_empty() => region.to_owned(),
        _ => UNKNOWN_REGION.to_owned(),
    };

    Ok(NewEvent {
        id: id.to_owned(),
        origin_time,
        latitude: coerce_number(id, "latitude", &record.lat)?,
        longitude: coerce_number(id, "longitude", &record.lon)?,
        magnitude: coerce_number(id, "magnitude", &record.mag)?,
        depth: coerce_number(id, "depth", &record.depth)?,
        region,
        place_name: None,
    })
}

/// Parse an ISO-8601 timestamp into UTC. Accepts RFC 3339 (`Z` or an offset) and naive
/// timestamps, which the feed means as UTC. Fractional seconds are optional.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(datetime) = DateTime::parse_from_rfc3339(value) {
        return Some(datetime.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn coerce_number(
    id: &str,
    field: &'static str,
    value: &serde_json::Value,
) -> Result<f64, ParseError> {
    let number = match value {
        serde_json::Value::Number(number) => number.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    number
        .filter(|number| number.is_finite())
        .ok_or_else(|| ParseError::InvalidNumber {
            id: id.to_owned(),
            field,
            value: value.to_string(),
        })
}
