//! Staleness and visibility policy
//!
//! Stateless classification of an aircraft from the age of its last contact
//! and its pin flags. The windows are independent and purpose-specific:
//!
//! | Window | Default | Used for |
//! |---|---|---|
//! | recency | 15 min | fresh vs aging; cache-sufficiency decisions |
//! | visibility | 30 min | beyond this, only pinned aircraft are shown |
//! | stale search | 6 h | identifier lookups older than this are rejected |
//! | landed override | 30 min | beyond this, route data may relocate the aircraft to its arrival airport |

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::snapshot::AircraftSnapshot;
use crate::time::age;

/// Display/trust class of an aircraft
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Within the recency window
    Fresh,
    /// Past the recency window, within the visibility window
    Aging,
    /// Past the visibility window but pinned; shown with a stale marker
    StalePinned,
    /// Past the visibility window and not pinned; excluded
    Hidden,
}

impl Visibility {
    pub fn is_shown(self) -> bool {
        !matches!(self, Visibility::Hidden)
    }
}

/// Conditions that keep an otherwise expired aircraft on screen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PinFlags {
    pub selected: bool,
    pub highlighted: bool,
    pub manually_added: bool,
    pub rotorcraft: bool,
}

impl PinFlags {
    /// Pins the server can derive on its own (no client selection state)
    pub fn for_snapshot(snapshot: &AircraftSnapshot) -> Self {
        Self {
            rotorcraft: snapshot.is_rotorcraft(),
            ..Self::default()
        }
    }

    pub fn any(&self) -> bool {
        self.selected || self.highlighted || self.manually_added || self.rotorcraft
    }
}

/// Configured staleness windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessPolicy {
    pub recency_window: Duration,
    pub visibility_window: Duration,
    pub stale_search_threshold: Duration,
    pub landed_override_threshold: Duration,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self {
            recency_window: Duration::minutes(15),
            visibility_window: Duration::minutes(30),
            stale_search_threshold: Duration::hours(6),
            landed_override_threshold: Duration::minutes(30),
        }
    }
}

impl StalenessPolicy {
    pub fn classify(&self, age: Duration, pins: PinFlags) -> Visibility {
        if age <= self.recency_window {
            Visibility::Fresh
        } else if age <= self.visibility_window {
            Visibility::Aging
        } else if pins.any() {
            Visibility::StalePinned
        } else {
            Visibility::Hidden
        }
    }

    pub fn classify_snapshot(
        &self,
        snapshot: &AircraftSnapshot,
        now: DateTime<Utc>,
        pins: PinFlags,
    ) -> Visibility {
        self.classify(age(now, snapshot.observed_at()), pins)
    }

    /// Whether an entry is recent enough to count toward "enough results"
    /// when deciding to skip the durable-store fallback
    pub fn is_recent(&self, age: Duration) -> bool {
        age <= self.recency_window
    }

    /// Identifier lookups beyond this age are rejected outright
    pub fn is_searchable(&self, age: Duration) -> bool {
        age <= self.stale_search_threshold
    }

    /// Past this age, an arrival airport from route data replaces the
    /// last known position
    pub fn wants_landed_override(&self, age: Duration) -> bool {
        age > self.landed_override_threshold
    }

    /// Oldest last-contact instant still inside the visibility window
    pub fn visibility_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.visibility_window
    }

    /// Oldest last-contact instant still inside the recency window
    pub fn recency_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.recency_window
    }

    /// Oldest last-contact instant an identifier lookup will accept
    pub fn search_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.stale_search_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> StalenessPolicy {
        StalenessPolicy::default()
    }

    #[test]
    fn test_fresh_within_recency_window() {
        assert_eq!(
            policy().classify(Duration::minutes(5), PinFlags::default()),
            Visibility::Fresh
        );
        assert_eq!(
            policy().classify(Duration::minutes(15), PinFlags::default()),
            Visibility::Fresh
        );
    }

    #[test]
    fn test_aging_between_windows_is_shown() {
        let v = policy().classify(Duration::minutes(20), PinFlags::default());
        assert_eq!(v, Visibility::Aging);
        assert!(v.is_shown());
    }

    #[test]
    fn test_unpinned_past_visibility_is_hidden() {
        let v = policy().classify(Duration::minutes(40), PinFlags::default());
        assert_eq!(v, Visibility::Hidden);
        assert!(!v.is_shown());
    }

    #[test]
    fn test_each_pin_keeps_stale_aircraft_visible() {
        let pins = [
            PinFlags { selected: true, ..Default::default() },
            PinFlags { highlighted: true, ..Default::default() },
            PinFlags { manually_added: true, ..Default::default() },
            PinFlags { rotorcraft: true, ..Default::default() },
        ];
        for pin in pins {
            assert_eq!(
                policy().classify(Duration::minutes(40), pin),
                Visibility::StalePinned
            );
        }
    }

    #[test]
    fn test_thresholds_are_independent() {
        let p = StalenessPolicy {
            landed_override_threshold: Duration::minutes(45),
            ..policy()
        };
        assert!(!p.wants_landed_override(Duration::minutes(40)));
        assert_eq!(p.classify(Duration::minutes(40), PinFlags::default()), Visibility::Hidden);
        assert!(p.is_searchable(Duration::hours(5)));
        assert!(!p.is_searchable(Duration::hours(7)));
    }
}
