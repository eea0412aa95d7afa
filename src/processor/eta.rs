//! Route/ETA calculation on top of an OSRM-compatible routing provider.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{DispatchError, DispatchResult};
use crate::models::assignment::GeoPoint;

#[derive(Debug, Clone, PartialEq)]
pub struct RouteEstimate {
    pub distance_km: f64,
    pub duration_minutes: f64,
    pub polyline: String,
    pub steps: Vec<String>,
}

/// Out-of-process routing backend. Implementations report every failure as
/// `RoutingUnavailable`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoutingProvider: Send + Sync {
    async fn route(&self, origin: &GeoPoint, destination: &GeoPoint) -> DispatchResult<RouteEstimate>;
}

/// Minimal OSRM JSON response structures.
#[derive(Deserialize)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Deserialize)]
struct OsrmRoute {
    distance: f64, // metres
    duration: f64, // seconds
    #[serde(default)]
    geometry: String,
    #[serde(default)]
    legs: Vec<OsrmLeg>,
}

#[derive(Deserialize)]
struct OsrmLeg {
    #[serde(default)]
    steps: Vec<OsrmStep>,
}

#[derive(Deserialize)]
struct OsrmStep {
    #[serde(default)]
    name: String,
    maneuver: OsrmManeuver,
}

#[derive(Deserialize)]
struct OsrmManeuver {
    #[serde(rename = "type")]
    kind: String,
    modifier: Option<String>,
}

impl OsrmStep {
    fn instruction(&self) -> String {
        let mut text = self.maneuver.kind.clone();
        if let Some(modifier) = &self.maneuver.modifier {
            text.push(' ');
            text.push_str(modifier);
        }
        if !self.name.is_empty() {
            text.push_str(" onto ");
            text.push_str(&self.name);
        }
        text
    }
}

fn parse_osrm_body(body: &str) -> DispatchResult<RouteEstimate> {
    let response: OsrmResponse = serde_json::from_str(body)
        .map_err(|e| DispatchError::RoutingUnavailable(format!("malformed response: {}", e)))?;

    if response.code != "Ok" {
        return Err(DispatchError::RoutingUnavailable(format!(
            "provider returned code {}",
            response.code
        )));
    }

    let route = response
        .routes
        .into_iter()
        .next()
        .ok_or_else(|| DispatchError::RoutingUnavailable("no route found".to_string()))?;

    Ok(RouteEstimate {
        distance_km: route.distance / 1000.0,
        duration_minutes: route.duration / 60.0,
        polyline: route.geometry,
        steps: route
            .legs
            .iter()
            .flat_map(|leg| leg.steps.iter().map(OsrmStep::instruction))
            .collect(),
    })
}

/// Routes via an OSRM HTTP endpoint.
pub struct OsrmRoutingProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl OsrmRoutingProvider {
    pub fn new(endpoint: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl RoutingProvider for OsrmRoutingProvider {
    async fn route(&self, origin: &GeoPoint, destination: &GeoPoint) -> DispatchResult<RouteEstimate> {
        let url = format!(
            "{}/route/v1/driving/{},{};{},{}?overview=full&steps=true",
            self.endpoint, origin.lng, origin.lat, destination.lng, destination.lat,
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| DispatchError::RoutingUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::RoutingUnavailable(format!(
                "provider responded with HTTP {}",
                status
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| DispatchError::RoutingUnavailable(e.to_string()))?;
        parse_osrm_body(&body)
    }
}

/// Stateless wrapper that puts a hard deadline on every provider call.
pub struct RouteCalculator {
    provider: Arc<dyn RoutingProvider>,
    timeout: Duration,
}

impl RouteCalculator {
    pub fn new(provider: Arc<dyn RoutingProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    pub async fn calculate(&self, origin: &GeoPoint, destination: &GeoPoint) -> DispatchResult<RouteEstimate> {
        match tokio::time::timeout(self.timeout, self.provider.route(origin, destination)).await {
            Ok(Ok(estimate)) => {
                debug!(
                    distance_km = estimate.distance_km,
                    duration_minutes = estimate.duration_minutes,
                    "Route calculated"
                );
                Ok(estimate)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Routing provider failed");
                Err(match e {
                    DispatchError::RoutingUnavailable(_) => e,
                    other => DispatchError::RoutingUnavailable(other.to_string()),
                })
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Routing provider timed out");
                Err(DispatchError::RoutingUnavailable(format!(
                    "timed out after {}ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_osrm_route() {
        let body = r#"{
            "code": "Ok",
            "routes": [{
                "distance": 12500.0,
                "duration": 1260.0,
                "geometry": "_p~iF~ps|U_ulLnnqC",
                "legs": [{
                    "steps": [
                        {"name": "Meiji-dori", "maneuver": {"type": "depart"}},
                        {"name": "Route 1", "maneuver": {"type": "turn", "modifier": "left"}},
                        {"name": "", "maneuver": {"type": "arrive"}}
                    ]
                }]
            }]
        }"#;

        let estimate = parse_osrm_body(body).unwrap();
        assert_eq!(estimate.distance_km, 12.5);
        assert_eq!(estimate.duration_minutes, 21.0);
        assert_eq!(
            estimate.steps,
            vec!["depart onto Meiji-dori", "turn left onto Route 1", "arrive"]
        );
    }

    #[test]
    fn test_parse_osrm_no_route() {
        let body = r#"{"code": "NoRoute", "routes": []}"#;
        assert!(matches!(
            parse_osrm_body(body),
            Err(DispatchError::RoutingUnavailable(_))
        ));
        assert!(matches!(
            parse_osrm_body("<html>502</html>"),
            Err(DispatchError::RoutingUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_calculator_times_out() {
        struct SlowProvider;

        #[async_trait]
        impl RoutingProvider for SlowProvider {
            async fn route(&self, _: &GeoPoint, _: &GeoPoint) -> DispatchResult<RouteEstimate> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Err(DispatchError::RoutingUnavailable("unreachable".to_string()))
            }
        }

        let calculator = RouteCalculator::new(Arc::new(SlowProvider), Duration::from_millis(20));
        let result = calculator
            .calculate(&GeoPoint::new(35.0, 139.0), &GeoPoint::new(35.1, 139.1))
            .await;
        assert!(matches!(result, Err(DispatchError::RoutingUnavailable(msg)) if msg.contains("timed out")));
    }

    #[tokio::test]
    async fn test_calculator_passes_through_estimate() {
        let mut provider = MockRoutingProvider::new();
        provider.expect_route().times(1).returning(|_, _| {
            Ok(RouteEstimate {
                distance_km: 3.2,
                duration_minutes: 9.0,
                polyline: String::new(),
                steps: Vec::new(),
            })
        });

        let calculator = RouteCalculator::new(Arc::new(provider), Duration::from_secs(1));
        let estimate = calculator
            .calculate(&GeoPoint::new(35.0, 139.0), &GeoPoint::new(35.1, 139.1))
            .await
            .unwrap();
        assert_eq!(estimate.distance_km, 3.2);
    }
}
