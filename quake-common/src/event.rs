use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Finest coordinate precision we quantize to. Seven decimals is roughly a centimeter, anything
/// past that only defeats the cache.
pub const MAX_PRECISION: u32 = 7;

/// A seismic event as stored in the `events` table.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Event {
    pub id: String,
    pub origin_time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub magnitude: f64,
    pub depth: f64,
    pub region: String,
    /// Absent when reverse geocoding failed at ingestion time.
    pub place_name: Option<String>,
    /// When we stored the event, as opposed to when it happened.
    pub ingested_at: DateTime<Utc>,
}

/// A normalized event that has not been persisted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub id: String,
    pub origin_time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub magnitude: f64,
    pub depth: f64,
    pub region: String,
    pub place_name: Option<String>,
}

impl NewEvent {
    pub fn with_place_name(self, place_name: Option<String>) -> Self {
        Self { place_name, ..self }
    }

    pub fn coordinate_key(&self, precision: u32) -> CoordinateKey {
        CoordinateKey::new(self.latitude, self.longitude, precision)
    }

    /// Stamp the ingestion instant, turning this into the value the store holds.
    pub fn into_event(self, ingested_at: DateTime<Utc>) -> Event {
        Event {
            id: self.id,
            origin_time: self.origin_time,
            latitude: self.latitude,
            longitude: self.longitude,
            magnitude: self.magnitude,
            depth: self.depth,
            region: self.region,
            place_name: self.place_name,
            ingested_at,
        }
    }
}

/// A latitude/longitude pair quantized to a fixed number of decimals.
///
/// Coordinates are kept as scaled integers so that two raw pairs rounding to the same key compare
/// equal and render to the same text, which is what the location cache is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoordinateKey {
    latitude: i64,
    longitude: i64,
    precision: u32,
}

impl CoordinateKey {
    /// Quantize a coordinate pair. Precision is capped at `MAX_PRECISION`.
    pub fn new(latitude: f64, longitude: f64, precision: u32) -> Self {
        let precision = precision.min(MAX_PRECISION);

        Self {
            latitude: quantize(latitude, precision),
            longitude: quantize(longitude, precision),
            precision,
        }
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    /// The rounded latitude, in degrees.
    pub fn latitude(&self) -> f64 {
        dequantize(self.latitude, self.precision)
    }

    /// The rounded longitude, in degrees.
    pub fn longitude(&self) -> f64 {
        dequantize(self.longitude, self.precision)
    }
}

fn quantize(value: f64, precision: u32) -> i64 {
    (value * 10_f64.powi(precision as i32)).round() as i64
}

fn dequantize(value: i64, precision: u32) -> f64 {
    value as f64 / 10_f64.powi(precision as i32)
}

fn write_scaled(f: &mut fmt::Formatter<'_>, value: i64, precision: u32) -> fmt::Result {
    let scale = 10_u64.pow(precision);
    let sign = if value < 0 { "-" } else { "" };
    let magnitude = value.unsigned_abs();

    if precision == 0 {
        write!(f, "{}{}", sign, magnitude)
    } else {
        write!(
            f,
            "{}{}.{:0width$}",
            sign,
            magnitude / scale,
            magnitude % scale,
            width = precision as usize
        )
    }
}

/// Renders as `"<lat>,<lon>"` with exactly `precision` decimals, e.g. `39.90,32.80`.
impl fmt::Display for CoordinateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_scaled(f, self.latitude, self.precision)?;
        write!(f, ",")?;
        write_scaled(f, self.longitude, self.precision)
    }
}
