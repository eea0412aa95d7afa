use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DispatchError, DispatchResult};
use crate::geo::point_in_polygon;
use crate::models::assignment::DispatchStatus;
use crate::models::geofence::{GeofenceEvent, GeofenceEventKind, GeofenceType};
use crate::models::tracking::VehicleLocation;
use crate::processor::assignment_manager::AssignmentManager;
use crate::store::GeofenceStore;

/// Tracks zone membership per vehicle and reports enter/exit edges.
pub struct GeofenceEvaluator {
    geofences: Arc<dyn GeofenceStore>,
    membership: Mutex<HashMap<String, HashSet<Uuid>>>,
}

impl GeofenceEvaluator {
    pub fn new(geofences: Arc<dyn GeofenceStore>) -> Self {
        Self {
            geofences,
            membership: Mutex::new(HashMap::new()),
        }
    }

    /// The first report for a vehicle only seeds its membership. Re-evaluating
    /// the same location yields no events.
    pub async fn evaluate(&self, location: &VehicleLocation) -> DispatchResult<Vec<GeofenceEvent>> {
        let areas = self.geofences.list_active().await?;
        let key = location.tracking_key();

        let mut membership = self.membership.lock().await;
        let previous = membership.get(&key);
        let first_report = previous.is_none();
        let previous = previous.cloned().unwrap_or_default();

        let mut current = HashSet::new();
        let mut events = Vec::new();

        for area in &areas {
            let was_inside = previous.contains(&area.id);
            let inside = match point_in_polygon(location.latitude, location.longitude, &area.polygon) {
                Ok(inside) => inside,
                Err(e) => {
                    warn!(geofence_id = %area.id, name = %area.name, error = %e, "Skipping malformed geofence");
                    if was_inside {
                        current.insert(area.id);
                    }
                    continue;
                }
            };

            if inside {
                current.insert(area.id);
            }

            let kind = match (was_inside, inside) {
                (false, true) if !first_report => GeofenceEventKind::Enter,
                (true, false) => GeofenceEventKind::Exit,
                _ => continue,
            };

            debug!(
                geofence_id = %area.id,
                device_id = %location.device_id,
                kind = ?kind,
                "Geofence boundary crossed"
            );
            events.push(GeofenceEvent {
                kind,
                geofence_id: area.id,
                geofence_type: area.geofence_type,
                assignment_id: area.assignment_id,
                vehicle_id: location.vehicle_id,
                device_id: location.device_id.clone(),
                occurred_at: location.timestamp,
            });
        }

        membership.insert(key, current);
        Ok(events)
    }
}

/// Turns a dropoff-zone entry into an `arrived` request. The manager still
/// validates the transition; a `Conflict` means the assignment already moved on.
pub async fn apply_geofence_event(manager: &AssignmentManager, event: &GeofenceEvent) {
    if event.kind != GeofenceEventKind::Enter || event.geofence_type != GeofenceType::DropoffZone {
        return;
    }
    let (Some(assignment_id), Some(vehicle_id)) = (event.assignment_id, event.vehicle_id) else {
        return;
    };

    let assignment = match manager.get(assignment_id).await {
        Ok(assignment) => assignment,
        Err(e) => {
            warn!(assignment_id = %assignment_id, error = %e, "Dropoff zone references unknown assignment");
            return;
        }
    };
    if assignment.vehicle_id != Some(vehicle_id) || assignment.status != DispatchStatus::EnRoute {
        return;
    }

    match manager
        .transition(assignment_id, DispatchStatus::EnRoute, DispatchStatus::Arrived)
        .await
    {
        Ok(_) => info!(
            assignment_id = %assignment_id,
            vehicle_id = %vehicle_id,
            "Vehicle entered dropoff zone, assignment arrived"
        ),
        Err(DispatchError::Conflict { .. }) => {
            debug!(assignment_id = %assignment_id, "Assignment changed before automatic arrival");
        }
        Err(e) => warn!(assignment_id = %assignment_id, error = %e, "Automatic arrival failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::assignment::GeoPoint;
    use crate::models::geofence::GeofenceArea;
    use crate::store::memory::InMemoryGeofenceStore;
    use chrono::Utc;

    fn zone(geofence_type: GeofenceType) -> GeofenceArea {
        GeofenceArea {
            id: Uuid::new_v4(),
            name: "Haneda T3".to_string(),
            geofence_type,
            polygon: vec![
                GeoPoint::new(35.54, 139.76),
                GeoPoint::new(35.54, 139.79),
                GeoPoint::new(35.56, 139.79),
                GeoPoint::new(35.56, 139.76),
            ],
            is_active: true,
            assignment_id: None,
        }
    }

    fn location(lat: f64, lng: f64) -> VehicleLocation {
        VehicleLocation {
            id: Uuid::new_v4(),
            device_id: "tracker-1".to_string(),
            vehicle_id: Some(Uuid::nil()),
            driver_id: None,
            latitude: lat,
            longitude: lng,
            altitude: None,
            accuracy: None,
            speed: None,
            bearing: None,
            timestamp: Utc::now(),
            battery_level: None,
            is_moving: true,
            address: None,
            received_at: Utc::now(),
        }
    }

    const INSIDE: (f64, f64) = (35.55, 139.78);
    const OUTSIDE: (f64, f64) = (35.68, 139.77);

    #[tokio::test]
    async fn test_single_enter_and_exit_per_dwell() {
        let store = Arc::new(InMemoryGeofenceStore::new());
        store.upsert(zone(GeofenceType::DropoffZone)).await;
        let evaluator = GeofenceEvaluator::new(store);

        assert!(evaluator.evaluate(&location(OUTSIDE.0, OUTSIDE.1)).await.unwrap().is_empty());

        let events = evaluator.evaluate(&location(INSIDE.0, INSIDE.1)).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, GeofenceEventKind::Enter);

        for _ in 0..5 {
            assert!(evaluator.evaluate(&location(INSIDE.0, INSIDE.1)).await.unwrap().is_empty());
        }

        let events = evaluator.evaluate(&location(OUTSIDE.0, OUTSIDE.1)).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, GeofenceEventKind::Exit);
    }

    #[tokio::test]
    async fn test_first_report_establishes_membership_silently() {
        let store = Arc::new(InMemoryGeofenceStore::new());
        store.upsert(zone(GeofenceType::PickupZone)).await;
        let evaluator = GeofenceEvaluator::new(store);

        assert!(evaluator.evaluate(&location(INSIDE.0, INSIDE.1)).await.unwrap().is_empty());
        let events = evaluator.evaluate(&location(OUTSIDE.0, OUTSIDE.1)).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, GeofenceEventKind::Exit);
    }

    #[tokio::test]
    async fn test_malformed_zone_does_not_block_others() {
        let store = Arc::new(InMemoryGeofenceStore::new());
        let mut broken = zone(GeofenceType::Restricted);
        broken.polygon.truncate(2);
        store.upsert(broken).await;
        store.upsert(zone(GeofenceType::ServiceArea)).await;
        let evaluator = GeofenceEvaluator::new(store);

        evaluator.evaluate(&location(OUTSIDE.0, OUTSIDE.1)).await.unwrap();
        let events = evaluator.evaluate(&location(INSIDE.0, INSIDE.1)).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].geofence_type, GeofenceType::ServiceArea);
    }
}
