//! Aircraft snapshot data model
//!
//! One [`AircraftSnapshot`] exists per aircraft, keyed by its `icao24`
//! transponder address. Provenance (`data_source`, `source_priority`,
//! `ingestion_timestamp`) travels with the snapshot through the caches and
//! the ingestion queue but is never part of the served view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// ADS-B emitter category reported by rotorcraft
pub const CATEGORY_ROTORCRAFT: u8 = 8;

/// Source tag and trust level attached to an incoming report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMeta {
    /// Source tag, e.g. "feeder" or "airplanes_live"
    pub source: String,
    /// Lower value = more authoritative
    pub priority: i32,
    /// Instant the report was accepted
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub ingested_at: DateTime<Utc>,
}

impl SourceMeta {
    pub fn new(source: impl Into<String>, priority: i32, ingested_at: DateTime<Utc>) -> Self {
        Self {
            source: source.into(),
            priority,
            ingested_at,
        }
    }
}

/// Current fused state of one aircraft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AircraftSnapshot {
    /// 6-character lowercase hex transponder address (sole merge key)
    pub icao24: String,
    pub callsign: Option<String>,
    pub origin_country: Option<String>,
    /// Instant of the last position update seen by the source
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub time_position: Option<DateTime<Utc>>,
    /// Instant the source last heard from the aircraft
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub last_contact: Option<DateTime<Utc>>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    /// Barometric altitude in meters
    pub baro_altitude: Option<f64>,
    pub on_ground: Option<bool>,
    /// Ground speed in m/s
    pub velocity: Option<f64>,
    pub true_track: Option<f64>,
    pub vertical_rate: Option<f64>,
    pub geo_altitude: Option<f64>,
    pub squawk: Option<String>,
    pub spi: Option<bool>,
    pub position_source: Option<i64>,
    pub category: Option<u8>,
    pub aircraft_type: Option<String>,
    pub description: Option<String>,
    pub registration: Option<String>,
    pub emergency_status: Option<String>,

    pub data_source: String,
    pub source_priority: i32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub ingestion_timestamp: DateTime<Utc>,
}

impl AircraftSnapshot {
    /// Empty snapshot for `icao24` stamped with `meta`
    pub fn new(icao24: impl Into<String>, meta: &SourceMeta) -> Self {
        Self {
            icao24: icao24.into(),
            callsign: None,
            origin_country: None,
            time_position: None,
            last_contact: None,
            longitude: None,
            latitude: None,
            baro_altitude: None,
            on_ground: None,
            velocity: None,
            true_track: None,
            vertical_rate: None,
            geo_altitude: None,
            squawk: None,
            spi: None,
            position_source: None,
            category: None,
            aircraft_type: None,
            description: None,
            registration: None,
            emergency_status: None,
            data_source: meta.source.clone(),
            source_priority: meta.priority,
            ingestion_timestamp: meta.ingested_at,
        }
    }

    /// Provenance of the most recent winning write
    pub fn meta(&self) -> SourceMeta {
        SourceMeta::new(
            self.data_source.clone(),
            self.source_priority,
            self.ingestion_timestamp,
        )
    }

    /// Position, only when both coordinates are known
    pub fn position(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }

    /// Best instant to measure age from: last contact, else position time,
    /// else the ingestion instant.
    pub fn observed_at(&self) -> DateTime<Utc> {
        self.last_contact
            .or(self.time_position)
            .unwrap_or(self.ingestion_timestamp)
    }

    pub fn is_rotorcraft(&self) -> bool {
        self.category == Some(CATEGORY_ROTORCRAFT)
    }
}

/// Canonicalise a transponder address: trimmed, lowercase, exactly six hex
/// characters. Returns `None` when the input cannot be an icao24.
pub fn normalize_icao24(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.len() != 6 || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(trimmed.to_ascii_lowercase())
}

/// Canonicalise a callsign or registration used as a secondary index key
pub fn normalize_identifier(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_ascii_uppercase())
    }
}

/// Latitude/longitude rectangle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lat_min: f64,
    pub lon_min: f64,
    pub lat_max: f64,
    pub lon_max: f64,
}

/// Meters per nautical mile
const METERS_PER_NM: f64 = 1852.0;
/// Meters per degree of latitude (spherical approximation)
const METERS_PER_DEGREE: f64 = 111_320.0;

impl Bounds {
    /// Validated rectangle; rejects inverted or out-of-range edges
    pub fn new(lat_min: f64, lon_min: f64, lat_max: f64, lon_max: f64) -> crate::Result<Self> {
        let all_finite = [lat_min, lon_min, lat_max, lon_max]
            .iter()
            .all(|v| v.is_finite());
        if !all_finite {
            return Err(crate::Error::InvalidInput(
                "bounds must be finite numbers".to_string(),
            ));
        }
        if !(-90.0..=90.0).contains(&lat_min) || !(-90.0..=90.0).contains(&lat_max) {
            return Err(crate::Error::InvalidInput(format!(
                "latitude out of range: {}..{}",
                lat_min, lat_max
            )));
        }
        if !(-180.0..=180.0).contains(&lon_min) || !(-180.0..=180.0).contains(&lon_max) {
            return Err(crate::Error::InvalidInput(format!(
                "longitude out of range: {}..{}",
                lon_min, lon_max
            )));
        }
        if lat_min > lat_max || lon_min > lon_max {
            return Err(crate::Error::InvalidInput(
                "min edge must not exceed max edge".to_string(),
            ));
        }
        Ok(Self {
            lat_min,
            lon_min,
            lat_max,
            lon_max,
        })
    }

    /// Rectangle enclosing a circle of `radius_nm` around a point, clamped to
    /// valid coordinates
    pub fn around(lat: f64, lon: f64, radius_nm: f64) -> crate::Result<Self> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(crate::Error::InvalidInput(format!(
                "center out of range: {}, {}",
                lat, lon
            )));
        }
        if !radius_nm.is_finite() || radius_nm <= 0.0 {
            return Err(crate::Error::InvalidInput(format!(
                "radius must be positive: {}",
                radius_nm
            )));
        }
        let dlat = radius_nm * METERS_PER_NM / METERS_PER_DEGREE;
        let cos_lat = lat.to_radians().cos().max(0.01);
        let dlon = (dlat / cos_lat).min(180.0);
        Self::new(
            (lat - dlat).max(-90.0),
            (lon - dlon).max(-180.0),
            (lat + dlat).min(90.0),
            (lon + dlon).min(180.0),
        )
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.lat_min && lat <= self.lat_max && lon >= self.lon_min && lon <= self.lon_max
    }

    /// Whether a snapshot has a known position inside this rectangle
    pub fn contains_snapshot(&self, snapshot: &AircraftSnapshot) -> bool {
        snapshot
            .position()
            .map(|(lat, lon)| self.contains(lat, lon))
            .unwrap_or(false)
    }
}
