use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{DispatchError, DispatchResult};
use crate::models::alert::EmergencyAlert;
use crate::models::assignment::{AssignmentFilter, DispatchAssignment, DispatchStatus, EtaEstimate};
use crate::models::fleet::{Booking, Driver, Vehicle};
use crate::models::geofence::GeofenceArea;
use crate::models::notification::DispatchNotification;
use crate::models::tracking::{TrackingDevice, VehicleLocation};
use crate::store::{
    AlertStore, AssignmentStore, BookingDirectory, DeviceStore, FleetRegistry, GeofenceStore,
    LocationStore, NotificationStore,
};

/// In-memory assignment store. Every write runs under one write lock, which
/// gives the same guarantees as the partial unique indexes in PostgreSQL.
#[derive(Default)]
pub struct InMemoryAssignmentStore {
    assignments: Arc<RwLock<HashMap<Uuid, DispatchAssignment>>>,
}

impl InMemoryAssignmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn resource_holder(
    assignments: &HashMap<Uuid, DispatchAssignment>,
    candidate: &DispatchAssignment,
) -> Option<DispatchError> {
    for other in assignments.values() {
        if other.id == candidate.id || !other.is_active() {
            continue;
        }
        if let (Some(driver), Some(held)) = (candidate.driver_id, other.driver_id) {
            if driver == held {
                return Some(DispatchError::ResourceBusy {
                    resource: "driver",
                    id: driver,
                    holder: other.id,
                });
            }
        }
        if let (Some(vehicle), Some(held)) = (candidate.vehicle_id, other.vehicle_id) {
            if vehicle == held {
                return Some(DispatchError::ResourceBusy {
                    resource: "vehicle",
                    id: vehicle,
                    holder: other.id,
                });
            }
        }
    }
    None
}

#[async_trait]
impl AssignmentStore for InMemoryAssignmentStore {
    async fn insert(&self, assignment: &DispatchAssignment) -> DispatchResult<()> {
        let mut assignments = self.assignments.write().await;
        if assignments
            .values()
            .any(|a| a.booking_id == assignment.booking_id && a.is_active())
        {
            return Err(DispatchError::DuplicateAssignment(assignment.booking_id));
        }
        if assignment.is_active() {
            if let Some(err) = resource_holder(&assignments, assignment) {
                return Err(err);
            }
        }
        assignments.insert(assignment.id, assignment.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DispatchResult<Option<DispatchAssignment>> {
        let assignments = self.assignments.read().await;
        Ok(assignments.get(&id).cloned())
    }

    async fn update(
        &self,
        assignment: &DispatchAssignment,
        expected_status: DispatchStatus,
    ) -> DispatchResult<DispatchAssignment> {
        let mut assignments = self.assignments.write().await;
        let stored = assignments
            .get(&assignment.id)
            .ok_or(DispatchError::AssignmentNotFound(assignment.id))?;

        if stored.version != assignment.version || stored.status != expected_status {
            return Err(DispatchError::Conflict {
                assignment_id: assignment.id,
                expected_version: assignment.version,
            });
        }
        if assignment.is_active() {
            if let Some(err) = resource_holder(&assignments, assignment) {
                return Err(err);
            }
        }

        let mut updated = assignment.clone();
        updated.keep_estimate_of(stored);
        updated.version += 1;
        assignments.insert(updated.id, updated.clone());
        Ok(updated)
    }

    async fn update_estimate(
        &self,
        id: Uuid,
        expected_status: DispatchStatus,
        estimate: &EtaEstimate,
    ) -> DispatchResult<Option<DispatchAssignment>> {
        let mut assignments = self.assignments.write().await;
        let stored = assignments
            .get_mut(&id)
            .ok_or(DispatchError::AssignmentNotFound(id))?;
        if stored.status != expected_status {
            return Ok(None);
        }
        stored.apply_estimate(estimate);
        Ok(Some(stored.clone()))
    }

    async fn list(&self, filter: &AssignmentFilter) -> DispatchResult<Vec<DispatchAssignment>> {
        let assignments = self.assignments.read().await;
        let mut matching: Vec<DispatchAssignment> = assignments
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(matching)
    }
}

#[derive(Default)]
pub struct InMemoryDeviceStore {
    devices: Arc<RwLock<HashMap<String, TrackingDevice>>>,
}

impl InMemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provisioning hook; fleet provisioning is external to the service.
    pub async fn register(&self, device: TrackingDevice) {
        let mut devices = self.devices.write().await;
        devices.insert(device.device_id.clone(), device);
    }
}

#[async_trait]
impl DeviceStore for InMemoryDeviceStore {
    async fn get_device(&self, device_id: &str) -> DispatchResult<Option<TrackingDevice>> {
        let devices = self.devices.read().await;
        Ok(devices.get(device_id).cloned())
    }

    async fn device_for_vehicle(&self, vehicle_id: Uuid) -> DispatchResult<Option<TrackingDevice>> {
        let devices = self.devices.read().await;
        Ok(devices
            .values()
            .find(|d| d.vehicle_id == Some(vehicle_id) && d.is_active)
            .cloned())
    }

    async fn touch(
        &self,
        device_id: &str,
        last_seen: DateTime<Utc>,
        battery_level: Option<i32>,
    ) -> DispatchResult<()> {
        let mut devices = self.devices.write().await;
        if let Some(device) = devices.get_mut(device_id) {
            device.last_seen = Some(last_seen);
            if battery_level.is_some() {
                device.battery_level = battery_level;
            }
        }
        Ok(())
    }

    async fn list_devices(&self) -> DispatchResult<Vec<TrackingDevice>> {
        let devices = self.devices.read().await;
        Ok(devices.values().cloned().collect())
    }
}

/// History plus the indexes ingestion reads on every report.
#[derive(Default)]
struct LocationTables {
    by_device: HashMap<String, Vec<VehicleLocation>>,
    timestamps_by_device: HashMap<String, HashSet<DateTime<Utc>>>,
    latest_by_device: HashMap<String, VehicleLocation>,
    latest_by_vehicle: HashMap<Uuid, VehicleLocation>,
}

#[derive(Default)]
pub struct InMemoryLocationStore {
    tables: Arc<RwLock<LocationTables>>,
}

impl InMemoryLocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count_for_device(&self, device_id: &str) -> usize {
        let tables = self.tables.read().await;
        tables.by_device.get(device_id).map_or(0, Vec::len)
    }
}

#[async_trait]
impl LocationStore for InMemoryLocationStore {
    async fn append(&self, location: &VehicleLocation) -> DispatchResult<()> {
        let mut tables = self.tables.write().await;
        tables
            .by_device
            .entry(location.device_id.clone())
            .or_default()
            .push(location.clone());
        tables
            .timestamps_by_device
            .entry(location.device_id.clone())
            .or_default()
            .insert(location.timestamp);

        let newer_for_device = tables
            .latest_by_device
            .get(&location.device_id)
            .map_or(true, |current| current.timestamp <= location.timestamp);
        if newer_for_device {
            tables
                .latest_by_device
                .insert(location.device_id.clone(), location.clone());
        }

        if let Some(vehicle_id) = location.vehicle_id {
            let newer = tables
                .latest_by_vehicle
                .get(&vehicle_id)
                .map_or(true, |current| current.timestamp <= location.timestamp);
            if newer {
                tables.latest_by_vehicle.insert(vehicle_id, location.clone());
            }
        }
        Ok(())
    }

    async fn exists(&self, device_id: &str, timestamp: DateTime<Utc>) -> DispatchResult<bool> {
        let tables = self.tables.read().await;
        Ok(tables
            .timestamps_by_device
            .get(device_id)
            .map_or(false, |seen| seen.contains(&timestamp)))
    }

    async fn latest_for_device(&self, device_id: &str) -> DispatchResult<Option<VehicleLocation>> {
        let tables = self.tables.read().await;
        Ok(tables.latest_by_device.get(device_id).cloned())
    }

    async fn latest_for_vehicle(&self, vehicle_id: Uuid) -> DispatchResult<Option<VehicleLocation>> {
        let tables = self.tables.read().await;
        Ok(tables.latest_by_vehicle.get(&vehicle_id).cloned())
    }

    async fn latest_per_vehicle(&self) -> DispatchResult<Vec<VehicleLocation>> {
        let tables = self.tables.read().await;
        Ok(tables.latest_by_vehicle.values().cloned().collect())
    }

    async fn history(&self, device_id: &str, limit: usize) -> DispatchResult<Vec<VehicleLocation>> {
        let tables = self.tables.read().await;
        let mut locations = tables.by_device.get(device_id).cloned().unwrap_or_default();
        locations.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        locations.truncate(limit);
        Ok(locations)
    }
}

#[derive(Default)]
pub struct InMemoryGeofenceStore {
    areas: Arc<RwLock<HashMap<Uuid, GeofenceArea>>>,
}

impl InMemoryGeofenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, area: GeofenceArea) {
        let mut areas = self.areas.write().await;
        areas.insert(area.id, area);
    }
}

#[async_trait]
impl GeofenceStore for InMemoryGeofenceStore {
    async fn list_active(&self) -> DispatchResult<Vec<GeofenceArea>> {
        let areas = self.areas.read().await;
        Ok(areas.values().filter(|a| a.is_active).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryNotificationStore {
    notifications: Arc<RwLock<Vec<DispatchNotification>>>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn insert(&self, notification: &DispatchNotification) -> DispatchResult<()> {
        let mut notifications = self.notifications.write().await;
        notifications.push(notification.clone());
        Ok(())
    }

    async fn mark_read(&self, id: Uuid) -> DispatchResult<bool> {
        let mut notifications = self.notifications.write().await;
        match notifications.iter_mut().find(|n| n.id == id) {
            Some(notification) => {
                notification.is_read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_for_user(
        &self,
        user_id: Option<Uuid>,
        unread_only: bool,
    ) -> DispatchResult<Vec<DispatchNotification>> {
        let notifications = self.notifications.read().await;
        Ok(notifications
            .iter()
            .rev()
            .filter(|n| n.target_user == user_id && (!unread_only || !n.is_read))
            .cloned()
            .collect())
    }

    async fn list_for_assignment(&self, assignment_id: Uuid) -> DispatchResult<Vec<DispatchNotification>> {
        let notifications = self.notifications.read().await;
        Ok(notifications
            .iter()
            .filter(|n| n.assignment_id == Some(assignment_id))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryAlertStore {
    alerts: Arc<RwLock<HashMap<Uuid, EmergencyAlert>>>,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn insert(&self, alert: &EmergencyAlert) -> DispatchResult<()> {
        let mut alerts = self.alerts.write().await;
        alerts.insert(alert.id, alert.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DispatchResult<Option<EmergencyAlert>> {
        let alerts = self.alerts.read().await;
        Ok(alerts.get(&id).cloned())
    }

    async fn resolve(
        &self,
        id: Uuid,
        resolver: Uuid,
        resolved_at: DateTime<Utc>,
    ) -> DispatchResult<Option<EmergencyAlert>> {
        let mut alerts = self.alerts.write().await;
        let alert = alerts.get_mut(&id).ok_or(DispatchError::AlertNotFound(id))?;
        if alert.is_resolved {
            return Ok(None);
        }
        alert.is_resolved = true;
        alert.resolved_at = Some(resolved_at);
        alert.resolved_by = Some(resolver);
        Ok(Some(alert.clone()))
    }

    async fn list_unresolved(&self) -> DispatchResult<Vec<EmergencyAlert>> {
        let alerts = self.alerts.read().await;
        let mut open: Vec<EmergencyAlert> =
            alerts.values().filter(|a| !a.is_resolved).cloned().collect();
        open.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(open)
    }
}

#[derive(Default)]
pub struct InMemoryBookingDirectory {
    bookings: Arc<RwLock<HashMap<Uuid, Booking>>>,
}

impl InMemoryBookingDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, booking: Booking) {
        let mut bookings = self.bookings.write().await;
        bookings.insert(booking.id, booking);
    }
}

#[async_trait]
impl BookingDirectory for InMemoryBookingDirectory {
    async fn get_booking(&self, booking_id: Uuid) -> DispatchResult<Option<Booking>> {
        let bookings = self.bookings.read().await;
        Ok(bookings.get(&booking_id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryFleetRegistry {
    drivers: Arc<RwLock<HashMap<Uuid, Driver>>>,
    vehicles: Arc<RwLock<HashMap<Uuid, Vehicle>>>,
}

impl InMemoryFleetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_driver(&self, driver: Driver) {
        let mut drivers = self.drivers.write().await;
        drivers.insert(driver.id, driver);
    }

    pub async fn add_vehicle(&self, vehicle: Vehicle) {
        let mut vehicles = self.vehicles.write().await;
        vehicles.insert(vehicle.id, vehicle);
    }
}

#[async_trait]
impl FleetRegistry for InMemoryFleetRegistry {
    async fn get_driver(&self, driver_id: Uuid) -> DispatchResult<Option<Driver>> {
        let drivers = self.drivers.read().await;
        Ok(drivers.get(&driver_id).cloned())
    }

    async fn get_vehicle(&self, vehicle_id: Uuid) -> DispatchResult<Option<Vehicle>> {
        let vehicles = self.vehicles.read().await;
        Ok(vehicles.get(&vehicle_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::assignment::RouteSummary;
    use chrono::TimeZone;

    fn location(device_id: &str, secs: i64) -> VehicleLocation {
        VehicleLocation {
            id: Uuid::new_v4(),
            device_id: device_id.to_string(),
            vehicle_id: None,
            driver_id: None,
            latitude: 35.68,
            longitude: 139.76,
            altitude: None,
            accuracy: None,
            speed: None,
            bearing: None,
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            battery_level: None,
            is_moving: false,
            address: None,
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_location_indexes_track_newest_report() {
        let store = InMemoryLocationStore::new();
        store.append(&location("t-1", 200)).await.unwrap();
        store.append(&location("t-1", 100)).await.unwrap();
        store.append(&location("t-2", 50)).await.unwrap();

        let latest = store.latest_for_device("t-1").await.unwrap().unwrap();
        assert_eq!(latest.timestamp.timestamp(), 200);
        assert!(store.exists("t-1", Utc.timestamp_opt(100, 0).unwrap()).await.unwrap());
        assert!(!store.exists("t-1", Utc.timestamp_opt(50, 0).unwrap()).await.unwrap());
        assert!(store.latest_for_device("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_estimate_is_guarded_on_status_only() {
        let store = InMemoryAssignmentStore::new();
        let assignment = DispatchAssignment::new(Uuid::new_v4(), 0, None);
        store.insert(&assignment).await.unwrap();

        let estimate = EtaEstimate {
            distance_km: 12.5,
            estimated_duration_minutes: 20,
            estimated_arrival: Utc::now(),
            route_summary: RouteSummary::default(),
            computed_at: Utc::now(),
        };
        let stored = store
            .update_estimate(assignment.id, DispatchStatus::Pending, &estimate)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.version, assignment.version);
        assert_eq!(stored.distance_km, Some(12.5));

        let missed = store
            .update_estimate(assignment.id, DispatchStatus::Confirmed, &estimate)
            .await
            .unwrap();
        assert!(missed.is_none());

        // a lifecycle write from the pre-estimate copy keeps the estimate
        let mut next = assignment.clone();
        next.notes = Some("gate 3".to_string());
        let updated = store.update(&next, DispatchStatus::Pending).await.unwrap();
        assert_eq!(updated.distance_km, Some(12.5));
    }

    #[tokio::test]
    async fn test_update_rejects_stale_version() {
        let store = InMemoryAssignmentStore::new();
        let assignment = DispatchAssignment::new(Uuid::new_v4(), 1, None);
        store.insert(&assignment).await.unwrap();

        let mut first = assignment.clone();
        first.notes = Some("first".to_string());
        let stored = store.update(&first, DispatchStatus::Pending).await.unwrap();
        assert_eq!(stored.version, 1);

        let mut second = assignment.clone();
        second.notes = Some("second".to_string());
        let result = store.update(&second, DispatchStatus::Pending).await;
        assert!(matches!(result, Err(DispatchError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_insert_rejects_second_active_assignment_for_booking() {
        let store = InMemoryAssignmentStore::new();
        let booking_id = Uuid::new_v4();
        store
            .insert(&DispatchAssignment::new(booking_id, 0, None))
            .await
            .unwrap();

        let result = store.insert(&DispatchAssignment::new(booking_id, 0, None)).await;
        assert!(matches!(result, Err(DispatchError::DuplicateAssignment(id)) if id == booking_id));
    }

    #[tokio::test]
    async fn test_terminal_assignment_frees_booking() {
        let store = InMemoryAssignmentStore::new();
        let booking_id = Uuid::new_v4();
        let mut assignment = DispatchAssignment::new(booking_id, 0, None);
        store.insert(&assignment).await.unwrap();

        assignment.stamp_transition(DispatchStatus::Cancelled, Utc::now());
        store.update(&assignment, DispatchStatus::Pending).await.unwrap();

        assert!(store
            .insert(&DispatchAssignment::new(booking_id, 0, None))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_alert_resolves_once() {
        let store = InMemoryAlertStore::new();
        let alert = EmergencyAlert {
            id: Uuid::new_v4(),
            alert_type: crate::models::alert::AlertType::Panic,
            location: None,
            assignment_id: None,
            vehicle_id: None,
            driver_id: None,
            message: None,
            is_resolved: false,
            resolved_at: None,
            resolved_by: None,
            created_at: Utc::now(),
        };
        store.insert(&alert).await.unwrap();

        let resolver = Uuid::new_v4();
        let resolved = store.resolve(alert.id, resolver, Utc::now()).await.unwrap();
        assert_eq!(resolved.unwrap().resolved_by, Some(resolver));
        assert!(store.resolve(alert.id, resolver, Utc::now()).await.unwrap().is_none());
        assert!(store.list_unresolved().await.unwrap().is_empty());
    }
}
