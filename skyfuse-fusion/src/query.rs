//! Tiered read path
//!
//! Area queries read the live store first. When it holds fewer than
//! `min_results` fresh aircraft for the box, the distributed cache is
//! consulted next and the durable store last. Results are deduplicated by
//! `icao24`, keeping the copy from the earliest tier, then filtered and
//! annotated by the staleness policy.
//!
//! Tier failures never fail an area query; they are logged and the next
//! tier (or what has been gathered so far) is served.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use skyfuse_common::snapshot::normalize_icao24;
use skyfuse_common::staleness::{PinFlags, StalenessPolicy};
use skyfuse_common::time::age;
use skyfuse_common::view::ServedAircraft;
use skyfuse_common::{AircraftSnapshot, Bounds};
use tracing::{debug, warn};

use crate::collaborators::RouteResolver;
use crate::db::SnapshotStore;
use crate::distributed_cache::DistributedCache;
use crate::error::Result;
use crate::live_store::LiveStateStore;

pub struct QueryService {
    live: Arc<LiveStateStore>,
    cache: Arc<DistributedCache>,
    store: Arc<dyn SnapshotStore>,
    routes: Arc<dyn RouteResolver>,
    policy: StalenessPolicy,
    min_results: usize,
}

impl QueryService {
    pub fn new(
        live: Arc<LiveStateStore>,
        cache: Arc<DistributedCache>,
        store: Arc<dyn SnapshotStore>,
        routes: Arc<dyn RouteResolver>,
        policy: StalenessPolicy,
        min_results: usize,
    ) -> Self {
        Self {
            live,
            cache,
            store,
            routes,
            policy,
            min_results,
        }
    }

    pub fn policy(&self) -> &StalenessPolicy {
        &self.policy
    }

    fn fresh_count<'a>(
        &self,
        snapshots: impl Iterator<Item = &'a AircraftSnapshot>,
        now: DateTime<Utc>,
    ) -> usize {
        snapshots
            .filter(|s| self.policy.is_recent(age(now, s.observed_at())))
            .count()
    }

    /// Snapshots for the box from as many tiers as needed
    pub async fn collect_area(
        &self,
        bounds: &Bounds,
        now: DateTime<Utc>,
    ) -> Vec<AircraftSnapshot> {
        let since = self.policy.search_cutoff(now);
        let mut found: BTreeMap<String, AircraftSnapshot> = BTreeMap::new();

        for snapshot in self.live.query_bounds(bounds, since).await {
            found.insert(snapshot.icao24.clone(), snapshot);
        }
        if self.fresh_count(found.values(), now) >= self.min_results {
            return found.into_values().collect();
        }

        if self.cache.is_enabled() {
            let cached = self.cache.query_bounds(bounds, since).await;
            debug!(count = cached.len(), "Area query read distributed cache");
            for snapshot in cached {
                found.entry(snapshot.icao24.clone()).or_insert(snapshot);
            }
            if self.fresh_count(found.values(), now) >= self.min_results {
                return found.into_values().collect();
            }
        }

        match self.store.query_bounds(bounds, since).await {
            Ok(stored) => {
                debug!(count = stored.len(), "Area query read durable store");
                for snapshot in stored {
                    found.entry(snapshot.icao24.clone()).or_insert(snapshot);
                }
            }
            Err(e) => warn!(error = %e, "Durable store area query failed, serving cached tiers"),
        }
        found.into_values().collect()
    }

    /// Apply the staleness policy and landed overrides; hidden aircraft are
    /// dropped
    pub async fn serve(
        &self,
        snapshots: Vec<AircraftSnapshot>,
        pins: impl Fn(&AircraftSnapshot) -> PinFlags,
        now: DateTime<Utc>,
    ) -> Vec<ServedAircraft> {
        let mut served = Vec::with_capacity(snapshots.len());
        for snapshot in snapshots {
            let flags = pins(&snapshot);
            let Some(mut view) = ServedAircraft::annotate(&snapshot, now, &self.policy, flags) else {
                continue;
            };
            if self.policy.wants_landed_override(age(now, snapshot.observed_at())) {
                self.apply_route(&snapshot, &mut view).await;
            }
            served.push(view);
        }
        served
    }

    async fn apply_route(&self, snapshot: &AircraftSnapshot, view: &mut ServedAircraft) {
        let route = match self
            .routes
            .resolve(&snapshot.icao24, snapshot.callsign.as_deref())
            .await
        {
            Ok(route) => route,
            Err(e) => {
                warn!(icao24 = %snapshot.icao24, error = %e, "Route resolution failed");
                return;
            }
        };
        if let Some((airport, reason)) = route.as_ref().and_then(|r| r.landed_position()) {
            debug!(
                icao24 = %snapshot.icao24,
                airport = %airport.icao,
                "Placing long-silent aircraft at arrival airport"
            );
            view.apply_landed_override(airport.latitude, airport.longitude, reason);
        }
    }

    /// Served aircraft inside the box
    ///
    /// The box is checked against the served position, so an aircraft
    /// moved to an arrival airport outside the box is left out.
    pub async fn area(&self, bounds: &Bounds, now: DateTime<Utc>) -> Vec<ServedAircraft> {
        let snapshots = self.collect_area(bounds, now).await;
        let mut served = self.serve(snapshots, PinFlags::for_snapshot, now).await;
        served.retain(|view| match (view.latitude, view.longitude) {
            (Some(lat), Some(lon)) => bounds.contains(lat, lon),
            _ => false,
        });
        served
    }

    /// Resolve an icao24, callsign or registration through the distributed
    /// cache, the live store, then the durable store
    pub async fn find(&self, ident: &str) -> Result<Option<AircraftSnapshot>> {
        if let Some(snapshot) = self.cache.lookup(ident).await {
            return Ok(Some(snapshot));
        }

        let icao24 = normalize_icao24(ident);
        if let Some(icao24) = icao24.as_deref() {
            if let Some(snapshot) = self.live.get(icao24).await {
                return Ok(Some(snapshot));
            }
        }
        if let Some(snapshot) = self.live.find_by_identifier(ident).await {
            return Ok(Some(snapshot));
        }

        if let Some(icao24) = icao24.as_deref() {
            if let Some(snapshot) = self.store.get(icao24).await? {
                return Ok(Some(snapshot));
            }
        }
        self.store.find_by_identifier(ident).await
    }

    /// Search result as displayed, or `None` when unknown or older than the
    /// stale-search threshold
    pub async fn lookup(
        &self,
        ident: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ServedAircraft>> {
        let snapshot = match self.find(ident).await? {
            Some(snapshot) => snapshot,
            None => return Ok(None),
        };
        if !self.policy.is_searchable(age(now, snapshot.observed_at())) {
            debug!(icao24 = %snapshot.icao24, "Search result too stale to display");
            return Ok(None);
        }

        // Searched aircraft count as manually added
        let pins = |s: &AircraftSnapshot| PinFlags {
            manually_added: true,
            ..PinFlags::for_snapshot(s)
        };
        Ok(self.serve(vec![snapshot], pins, now).await.into_iter().next())
    }
}
