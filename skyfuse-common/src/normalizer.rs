//! State normalizer and validator
//!
//! Sources report aircraft state as a fixed-order positional array. The
//! array is translated into a [`RawState`] by [`RawState::from_positional`],
//! the only place that knows field indices. [`normalize`] then validates
//! ranges and produces an [`AircraftSnapshot`].
//!
//! Validation is per item: a bad record yields a [`ValidationError`] and
//! never aborts the rest of its batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::snapshot::{normalize_icao24, AircraftSnapshot, SourceMeta};
use crate::time::from_unix_seconds;

pub const LATITUDE_RANGE: (f64, f64) = (-90.0, 90.0);
pub const LONGITUDE_RANGE: (f64, f64) = (-180.0, 180.0);
/// Barometric altitude bounds in meters
pub const BARO_ALTITUDE_RANGE: (f64, f64) = (-1500.0, 60000.0);
/// Ground speed bounds in m/s
pub const VELOCITY_RANGE: (f64, f64) = (0.0, 1500.0);
/// Highest ADS-B emitter category; anything outside 0..=19 is dropped
pub const MAX_CATEGORY: i64 = 19;

// Positional indices of the source record
const IDX_ICAO24: usize = 0;
const IDX_CALLSIGN: usize = 1;
const IDX_ORIGIN_COUNTRY: usize = 2;
const IDX_TIME_POSITION: usize = 3;
const IDX_LAST_CONTACT: usize = 4;
const IDX_LONGITUDE: usize = 5;
const IDX_LATITUDE: usize = 6;
const IDX_BARO_ALTITUDE: usize = 7;
const IDX_ON_GROUND: usize = 8;
const IDX_VELOCITY: usize = 9;
const IDX_TRUE_TRACK: usize = 10;
const IDX_VERTICAL_RATE: usize = 11;
// 12 = sensors, unused
const IDX_GEO_ALTITUDE: usize = 13;
const IDX_SQUAWK: usize = 14;
const IDX_SPI: usize = 15;
const IDX_POSITION_SOURCE: usize = 16;
const IDX_CATEGORY: usize = 17;
const IDX_AIRCRAFT_TYPE: usize = 18;
const IDX_DESCRIPTION: usize = 19;
const IDX_REGISTRATION: usize = 20;
const IDX_EMERGENCY_STATUS: usize = 21;

/// Per-item rejection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Offending icao24, or the raw value when no usable icao24 exists
    #[serde(rename = "icao24")]
    pub icao24_or_raw: String,
    #[serde(rename = "error")]
    pub reason: String,
}

impl ValidationError {
    pub fn new(icao24_or_raw: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            icao24_or_raw: icao24_or_raw.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.icao24_or_raw, self.reason)
    }
}

/// Named view of one source record, before range validation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawState {
    pub icao24: Option<String>,
    pub callsign: Option<String>,
    pub origin_country: Option<String>,
    pub time_position: Option<i64>,
    pub last_contact: Option<i64>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub baro_altitude: Option<f64>,
    pub on_ground: Option<bool>,
    pub velocity: Option<f64>,
    pub true_track: Option<f64>,
    pub vertical_rate: Option<f64>,
    pub geo_altitude: Option<f64>,
    pub squawk: Option<String>,
    pub spi: Option<bool>,
    pub position_source: Option<i64>,
    pub category: Option<i64>,
    pub aircraft_type: Option<String>,
    pub description: Option<String>,
    pub registration: Option<String>,
    pub emergency_status: Option<String>,
}

impl RawState {
    /// Translate a positional array into named fields.
    ///
    /// Missing trailing entries and JSON `null` both read as absent. A value
    /// of the wrong JSON type is a validation error for the whole item.
    pub fn from_positional(values: &[Value]) -> Result<Self, ValidationError> {
        let ident = match values.get(IDX_ICAO24) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => "<missing>".to_string(),
            Some(other) => other.to_string(),
        };
        let err = |field: &str, v: &Value| {
            ValidationError::new(ident.clone(), format!("{} has wrong type: {}", field, v))
        };

        let string = |idx: usize, field: &str| -> Result<Option<String>, ValidationError> {
            match values.get(idx) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::String(s)) => Ok(Some(s.clone())),
                Some(v) => Err(err(field, v)),
            }
        };
        let number = |idx: usize, field: &str| -> Result<Option<f64>, ValidationError> {
            match values.get(idx) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::Number(n)) => n.as_f64().map(Some).ok_or_else(|| err(field, &values[idx])),
                Some(v) => Err(err(field, v)),
            }
        };
        let integer = |idx: usize, field: &str| -> Result<Option<i64>, ValidationError> {
            Ok(number(idx, field)?.map(|v| v.trunc() as i64))
        };
        let boolean = |idx: usize, field: &str| -> Result<Option<bool>, ValidationError> {
            match values.get(idx) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::Bool(b)) => Ok(Some(*b)),
                Some(v) => Err(err(field, v)),
            }
        };

        Ok(Self {
            icao24: string(IDX_ICAO24, "icao24")?,
            callsign: string(IDX_CALLSIGN, "callsign")?,
            origin_country: string(IDX_ORIGIN_COUNTRY, "origin_country")?,
            time_position: integer(IDX_TIME_POSITION, "time_position")?,
            last_contact: integer(IDX_LAST_CONTACT, "last_contact")?,
            longitude: number(IDX_LONGITUDE, "longitude")?,
            latitude: number(IDX_LATITUDE, "latitude")?,
            baro_altitude: number(IDX_BARO_ALTITUDE, "baro_altitude")?,
            on_ground: boolean(IDX_ON_GROUND, "on_ground")?,
            velocity: number(IDX_VELOCITY, "velocity")?,
            true_track: number(IDX_TRUE_TRACK, "true_track")?,
            vertical_rate: number(IDX_VERTICAL_RATE, "vertical_rate")?,
            geo_altitude: number(IDX_GEO_ALTITUDE, "geo_altitude")?,
            squawk: string(IDX_SQUAWK, "squawk")?,
            spi: boolean(IDX_SPI, "spi")?,
            position_source: integer(IDX_POSITION_SOURCE, "position_source")?,
            category: integer(IDX_CATEGORY, "category")?,
            aircraft_type: string(IDX_AIRCRAFT_TYPE, "aircraft_type")?,
            description: string(IDX_DESCRIPTION, "description")?,
            registration: string(IDX_REGISTRATION, "registration")?,
            emergency_status: string(IDX_EMERGENCY_STATUS, "emergency_status")?,
        })
    }
}

/// Outcome of normalizing a batch of records
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub valid: Vec<AircraftSnapshot>,
    pub errors: Vec<ValidationError>,
}

/// Validate one raw state and stamp it with its source metadata
pub fn normalize(raw: RawState, meta: &SourceMeta) -> Result<AircraftSnapshot, ValidationError> {
    let raw_ident = raw.icao24.clone().unwrap_or_else(|| "<missing>".to_string());
    let icao24 = match raw.icao24.as_deref() {
        None => return Err(ValidationError::new(raw_ident, "icao24 is required")),
        Some(s) => normalize_icao24(s).ok_or_else(|| {
            ValidationError::new(raw_ident.clone(), "icao24 must be 6 hex characters")
        })?,
    };

    check_range(&icao24, "latitude", raw.latitude, LATITUDE_RANGE)?;
    check_range(&icao24, "longitude", raw.longitude, LONGITUDE_RANGE)?;
    check_range(&icao24, "baro_altitude", raw.baro_altitude, BARO_ALTITUDE_RANGE)?;
    check_range(&icao24, "velocity", raw.velocity, VELOCITY_RANGE)?;

    // Category is advisory: out-of-range values are dropped, not rejected
    let category = raw
        .category
        .filter(|c| (0..=MAX_CATEGORY).contains(c))
        .map(|c| c as u8);

    let mut snapshot = AircraftSnapshot::new(icao24, meta);
    snapshot.callsign = trimmed(raw.callsign);
    snapshot.origin_country = trimmed(raw.origin_country);
    snapshot.time_position = raw.time_position.and_then(from_unix_seconds);
    snapshot.last_contact = raw.last_contact.and_then(from_unix_seconds);
    snapshot.longitude = raw.longitude;
    snapshot.latitude = raw.latitude;
    snapshot.baro_altitude = raw.baro_altitude;
    snapshot.on_ground = raw.on_ground;
    snapshot.velocity = raw.velocity;
    snapshot.true_track = raw.true_track;
    snapshot.vertical_rate = raw.vertical_rate;
    snapshot.geo_altitude = raw.geo_altitude;
    snapshot.squawk = trimmed(raw.squawk);
    snapshot.spi = raw.spi;
    snapshot.position_source = raw.position_source;
    snapshot.category = category;
    snapshot.aircraft_type = trimmed(raw.aircraft_type);
    snapshot.description = trimmed(raw.description);
    snapshot.registration = trimmed(raw.registration);
    snapshot.emergency_status = trimmed(raw.emergency_status);
    Ok(snapshot)
}

/// Adapter + validation for one positional record
pub fn normalize_positional(
    values: &[Value],
    meta: &SourceMeta,
) -> Result<AircraftSnapshot, ValidationError> {
    normalize(RawState::from_positional(values)?, meta)
}

/// Normalize every record; invalid items are reported and excluded
pub fn normalize_batch<'a, I>(records: I, meta: &SourceMeta) -> NormalizedBatch
where
    I: IntoIterator<Item = &'a [Value]>,
{
    let mut batch = NormalizedBatch::default();
    for record in records {
        match normalize_positional(record, meta) {
            Ok(snapshot) => batch.valid.push(snapshot),
            Err(e) => {
                debug!(source = %meta.source, error = %e, "Rejected state");
                batch.errors.push(e);
            }
        }
    }
    batch
}

/// Normalize states already in named form (provider adapters)
pub fn normalize_raw_batch(
    states: Vec<RawState>,
    source: &str,
    priority: i32,
    ingested_at: DateTime<Utc>,
) -> NormalizedBatch {
    let meta = SourceMeta::new(source, priority, ingested_at);
    let mut batch = NormalizedBatch::default();
    for raw in states {
        match normalize(raw, &meta) {
            Ok(snapshot) => batch.valid.push(snapshot),
            Err(e) => {
                debug!(source = %meta.source, error = %e, "Rejected state");
                batch.errors.push(e);
            }
        }
    }
    batch
}

fn check_range(
    icao24: &str,
    field: &str,
    value: Option<f64>,
    (min, max): (f64, f64),
) -> Result<(), ValidationError> {
    match value {
        Some(v) if !v.is_finite() || v < min || v > max => Err(ValidationError::new(
            icao24,
            format!("{} out of range [{}, {}]: {}", field, min, max, v),
        )),
        _ => Ok(()),
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
