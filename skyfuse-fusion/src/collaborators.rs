//! External collaborator interfaces
//!
//! Route resolution and provider polling live in other services. The
//! pipeline only needs the narrow traits below; the implementations here
//! are the built-in defaults.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use skyfuse_common::normalizer::RawState;
use skyfuse_common::snapshot::normalize_identifier;
use skyfuse_common::view::StaleReason;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirportLocation {
    pub icao: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlightStatus {
    Scheduled,
    EnRoute,
    Landed,
    Arrived,
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteInfo {
    pub arrival: Option<AirportLocation>,
    pub status: Option<FlightStatus>,
}

impl RouteInfo {
    /// Where a long-silent aircraft should be drawn, and why
    pub fn landed_position(&self) -> Option<(&AirportLocation, StaleReason)> {
        let arrival = self.arrival.as_ref()?;
        let reason = match self.status {
            Some(FlightStatus::Landed) | Some(FlightStatus::Arrived) => StaleReason::Landed,
            Some(FlightStatus::Cancelled) => return None,
            _ => StaleReason::PresumedLanded,
        };
        Some((arrival, reason))
    }
}

#[async_trait]
pub trait RouteResolver: Send + Sync {
    async fn resolve(&self, icao24: &str, callsign: Option<&str>) -> Result<Option<RouteInfo>>;
}

/// Resolver that never knows a route
pub struct NoRoutes;

#[async_trait]
impl RouteResolver for NoRoutes {
    async fn resolve(&self, _icao24: &str, _callsign: Option<&str>) -> Result<Option<RouteInfo>> {
        Ok(None)
    }
}

/// Fixed routes keyed by callsign, falling back to icao24
#[derive(Debug, Clone, Default)]
pub struct StaticRoutes {
    routes: HashMap<String, RouteInfo>,
}

impl StaticRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_route(mut self, key: &str, route: RouteInfo) -> Self {
        if let Some(key) = normalize_identifier(key) {
            self.routes.insert(key, route);
        }
        self
    }
}

#[async_trait]
impl RouteResolver for StaticRoutes {
    async fn resolve(&self, icao24: &str, callsign: Option<&str>) -> Result<Option<RouteInfo>> {
        let by_callsign = callsign
            .and_then(normalize_identifier)
            .and_then(|cs| self.routes.get(&cs));
        let by_icao = normalize_identifier(icao24).and_then(|id| self.routes.get(&id));
        Ok(by_callsign.or(by_icao).cloned())
    }
}

/// Polling provider behind `/flights`
#[async_trait]
pub trait PositionProvider: Send + Sync {
    async fn fetch_area(&self, center: (f64, f64), radius_nm: f64) -> Result<Vec<RawState>>;
}

/// Provider that has nothing to report
pub struct NoProvider;

#[async_trait]
impl PositionProvider for NoProvider {
    async fn fetch_area(&self, _center: (f64, f64), _radius_nm: f64) -> Result<Vec<RawState>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(status: Option<FlightStatus>) -> RouteInfo {
        RouteInfo {
            arrival: Some(AirportLocation {
                icao: "EDDF".to_string(),
                latitude: 50.03,
                longitude: 8.57,
            }),
            status,
        }
    }

    #[test]
    fn test_landed_position_reason() {
        let (_, reason) = route(Some(FlightStatus::Landed)).landed_position().unwrap();
        assert_eq!(reason, StaleReason::Landed);
        let (_, reason) = route(None).landed_position().unwrap();
        assert_eq!(reason, StaleReason::PresumedLanded);
        assert!(route(Some(FlightStatus::Cancelled)).landed_position().is_none());
        assert!(RouteInfo::default().landed_position().is_none());
    }

    #[tokio::test]
    async fn test_static_routes_prefers_callsign() {
        let routes = StaticRoutes::new()
            .with_route("dlh4ab", route(Some(FlightStatus::Arrived)))
            .with_route("a1b2c3", route(None));

        let found = routes.resolve("a1b2c3", Some("DLH4AB")).await.unwrap().unwrap();
        assert_eq!(found.status, Some(FlightStatus::Arrived));
        let found = routes.resolve("a1b2c3", None).await.unwrap().unwrap();
        assert_eq!(found.status, None);
        assert!(routes.resolve("ffffff", None).await.unwrap().is_none());
    }
}
