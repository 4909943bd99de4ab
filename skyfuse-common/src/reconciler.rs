//! Client-side reconciliation of pushed snapshots with searched aircraft
//!
//! A map client holds two sets: the live set delivered by the server and a
//! "manual" set of aircraft the user added through search. Reconciliation
//! joins them by `icao24`, taking field values from whichever copy was
//! updated more recently and filling its gaps from the other copy.
//!
//! Manual entries are dropped once they are neither recent (added or
//! refreshed within the recency window) nor pinned by selection or
//! highlight.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::merge::overlay_populated;
use crate::snapshot::AircraftSnapshot;
use crate::staleness::StalenessPolicy;
use crate::time::age;

/// A snapshot plus the instant the client received it
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedAircraft {
    pub snapshot: AircraftSnapshot,
    pub updated_at: DateTime<Utc>,
}

impl TrackedAircraft {
    pub fn new(snapshot: AircraftSnapshot, updated_at: DateTime<Utc>) -> Self {
        Self {
            snapshot,
            updated_at,
        }
    }
}

/// Client selection state that pins aircraft
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub selected: Option<String>,
    pub highlighted: HashSet<String>,
}

impl Selection {
    pub fn is_pinned(&self, icao24: &str) -> bool {
        self.selected.as_deref() == Some(icao24) || self.highlighted.contains(icao24)
    }
}

#[derive(Debug)]
pub struct ClientReconciler {
    policy: StalenessPolicy,
    manual: HashMap<String, TrackedAircraft>,
}

impl ClientReconciler {
    pub fn new(policy: StalenessPolicy) -> Self {
        Self {
            policy,
            manual: HashMap::new(),
        }
    }

    /// Track a searched aircraft; a repeated search refreshes the entry
    pub fn add_manual(&mut self, snapshot: AircraftSnapshot, now: DateTime<Utc>) {
        self.manual
            .insert(snapshot.icao24.clone(), TrackedAircraft::new(snapshot, now));
    }

    pub fn remove_manual(&mut self, icao24: &str) -> Option<TrackedAircraft> {
        self.manual.remove(icao24)
    }

    pub fn is_manual(&self, icao24: &str) -> bool {
        self.manual.contains_key(icao24)
    }

    pub fn manual_len(&self) -> usize {
        self.manual.len()
    }

    /// Merge the live set with the manual set, pruning expired manual
    /// entries first. Output is ordered by `icao24`.
    pub fn reconcile(
        &mut self,
        live: &[TrackedAircraft],
        selection: &Selection,
        now: DateTime<Utc>,
    ) -> Vec<AircraftSnapshot> {
        let recency = self.policy.recency_window;
        self.manual.retain(|icao24, entry| {
            age(now, entry.updated_at) <= recency || selection.is_pinned(icao24)
        });

        let mut combined: BTreeMap<&str, AircraftSnapshot> = live
            .iter()
            .map(|t| (t.snapshot.icao24.as_str(), t.snapshot.clone()))
            .collect();
        let live_by_id: HashMap<&str, &TrackedAircraft> = live
            .iter()
            .map(|t| (t.snapshot.icao24.as_str(), t))
            .collect();

        for (icao24, manual) in &self.manual {
            let merged = match live_by_id.get(icao24.as_str()) {
                Some(live_entry) => prefer_fresher(live_entry, manual),
                None => manual.snapshot.clone(),
            };
            combined.insert(icao24.as_str(), merged);
        }

        combined.into_values().collect()
    }
}

/// Newer copy's populated fields over the older copy
fn prefer_fresher(a: &TrackedAircraft, b: &TrackedAircraft) -> AircraftSnapshot {
    let (newer, older) = if a.updated_at >= b.updated_at {
        (a, b)
    } else {
        (b, a)
    };
    let mut merged = older.snapshot.clone();
    overlay_populated(&mut merged, &newer.snapshot);
    merged.data_source = newer.snapshot.data_source.clone();
    merged.source_priority = newer.snapshot.source_priority;
    merged.ingestion_timestamp = newer.snapshot.ingestion_timestamp;
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SourceMeta;
    use crate::time::from_unix_seconds;
    use chrono::Duration;

    fn snap(icao24: &str, lat: Option<f64>, squawk: Option<&str>) -> AircraftSnapshot {
        let meta = SourceMeta::new("feeder", 10, from_unix_seconds(0).unwrap());
        let mut s = AircraftSnapshot::new(icao24, &meta);
        s.latitude = lat;
        s.squawk = squawk.map(str::to_string);
        s
    }

    fn t(secs: i64) -> DateTime<Utc> {
        from_unix_seconds(secs).unwrap()
    }

    #[test]
    fn test_manual_only_entries_are_included() {
        let mut r = ClientReconciler::new(StalenessPolicy::default());
        r.add_manual(snap("aaaaaa", Some(1.0), None), t(1_000));

        let out = r.reconcile(
            &[TrackedAircraft::new(snap("bbbbbb", Some(2.0), None), t(1_000))],
            &Selection::default(),
            t(1_010),
        );
        let ids: Vec<_> = out.iter().map(|s| s.icao24.as_str()).collect();
        assert_eq!(ids, vec!["aaaaaa", "bbbbbb"]);
    }

    #[test]
    fn test_newer_copy_wins_and_gaps_are_filled() {
        let mut r = ClientReconciler::new(StalenessPolicy::default());
        r.add_manual(snap("aaaaaa", Some(1.0), Some("7000")), t(1_000));

        let live = [TrackedAircraft::new(snap("aaaaaa", Some(1.5), None), t(1_005))];
        let out = r.reconcile(&live, &Selection::default(), t(1_010));

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].latitude, Some(1.5));
        assert_eq!(out[0].squawk.as_deref(), Some("7000"));
    }

    #[test]
    fn test_manual_newer_than_live_wins() {
        let mut r = ClientReconciler::new(StalenessPolicy::default());
        r.add_manual(snap("aaaaaa", Some(3.0), None), t(1_020));

        let live = [TrackedAircraft::new(snap("aaaaaa", Some(1.5), Some("1200")), t(1_005))];
        let out = r.reconcile(&live, &Selection::default(), t(1_030));

        assert_eq!(out[0].latitude, Some(3.0));
        assert_eq!(out[0].squawk.as_deref(), Some("1200"));
    }

    #[test]
    fn test_expired_unpinned_manual_entries_are_dropped() {
        let mut r = ClientReconciler::new(StalenessPolicy::default());
        r.add_manual(snap("aaaaaa", Some(1.0), None), t(0));
        r.add_manual(snap("bbbbbb", Some(1.0), None), t(0));

        let later = t(0) + Duration::minutes(20);
        let selection = Selection {
            selected: Some("bbbbbb".to_string()),
            highlighted: HashSet::new(),
        };
        let out = r.reconcile(&[], &selection, later);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].icao24, "bbbbbb");
        assert!(!r.is_manual("aaaaaa"));
        assert_eq!(r.manual_len(), 1);
    }

    #[test]
    fn test_highlight_pins_manual_entry() {
        let mut r = ClientReconciler::new(StalenessPolicy::default());
        r.add_manual(snap("aaaaaa", Some(1.0), None), t(0));

        let mut selection = Selection::default();
        selection.highlighted.insert("aaaaaa".to_string());
        let out = r.reconcile(&[], &selection, t(0) + Duration::hours(1));
        assert_eq!(out.len(), 1);
    }
}
