//! Served aircraft view
//!
//! What map clients receive: the user-visible snapshot fields plus values
//! derived at read time (`data_age_seconds`, `is_stale`, `stale_reason`,
//! `visibility`). Provenance stays server-side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::snapshot::AircraftSnapshot;
use crate::staleness::{PinFlags, StalenessPolicy, Visibility};
use crate::time::age;

/// Why an aircraft carries a stale marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleReason {
    /// Past the visibility window, kept because it is pinned
    NoRecentContact,
    /// Route data reports the flight landed; shown at its arrival airport
    Landed,
    /// Arrival airport known but no landed status; shown there anyway
    PresumedLanded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServedAircraft {
    pub icao24: String,
    pub callsign: Option<String>,
    pub origin_country: Option<String>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub time_position: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub last_contact: Option<DateTime<Utc>>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub baro_altitude: Option<f64>,
    pub on_ground: Option<bool>,
    pub velocity: Option<f64>,
    pub true_track: Option<f64>,
    pub vertical_rate: Option<f64>,
    pub geo_altitude: Option<f64>,
    pub squawk: Option<String>,
    pub category: Option<u8>,
    pub aircraft_type: Option<String>,
    pub description: Option<String>,
    pub registration: Option<String>,
    pub emergency_status: Option<String>,

    pub data_age_seconds: i64,
    pub is_stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_reason: Option<StaleReason>,
    pub visibility: Visibility,
}

impl ServedAircraft {
    /// Build the served view, or `None` when the policy hides the aircraft
    pub fn annotate(
        snapshot: &AircraftSnapshot,
        now: DateTime<Utc>,
        policy: &StalenessPolicy,
        pins: PinFlags,
    ) -> Option<Self> {
        let data_age = age(now, snapshot.observed_at());
        let visibility = policy.classify(data_age, pins);
        if !visibility.is_shown() {
            return None;
        }
        let stale = visibility == Visibility::StalePinned;
        Some(Self {
            icao24: snapshot.icao24.clone(),
            callsign: snapshot.callsign.clone(),
            origin_country: snapshot.origin_country.clone(),
            time_position: snapshot.time_position,
            last_contact: snapshot.last_contact,
            longitude: snapshot.longitude,
            latitude: snapshot.latitude,
            baro_altitude: snapshot.baro_altitude,
            on_ground: snapshot.on_ground,
            velocity: snapshot.velocity,
            true_track: snapshot.true_track,
            vertical_rate: snapshot.vertical_rate,
            geo_altitude: snapshot.geo_altitude,
            squawk: snapshot.squawk.clone(),
            category: snapshot.category,
            aircraft_type: snapshot.aircraft_type.clone(),
            description: snapshot.description.clone(),
            registration: snapshot.registration.clone(),
            emergency_status: snapshot.emergency_status.clone(),
            data_age_seconds: data_age.num_seconds(),
            is_stale: stale,
            stale_reason: stale.then_some(StaleReason::NoRecentContact),
            visibility,
        })
    }

    /// Relocate to an arrival airport and mark as landed
    pub fn apply_landed_override(&mut self, latitude: f64, longitude: f64, reason: StaleReason) {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self.on_ground = Some(true);
        self.velocity = Some(0.0);
        self.vertical_rate = Some(0.0);
        self.is_stale = true;
        self.stale_reason = Some(reason);
    }
}
