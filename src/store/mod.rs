//! Storage seams. The PostgreSQL backend lives in `crate::db`; `memory` holds
//! the in-process implementations used by tests and single-node runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::DispatchResult;
use crate::models::alert::EmergencyAlert;
use crate::models::assignment::{AssignmentFilter, DispatchAssignment, DispatchStatus, EtaEstimate};
use crate::models::fleet::{Booking, Driver, Vehicle};
use crate::models::geofence::GeofenceArea;
use crate::models::notification::DispatchNotification;
use crate::models::tracking::{TrackingDevice, VehicleLocation};

pub mod memory;

/// Every storage seam the services need, bundled for wiring.
#[derive(Clone)]
pub struct DispatchStores {
    pub assignments: Arc<dyn AssignmentStore>,
    pub devices: Arc<dyn DeviceStore>,
    pub locations: Arc<dyn LocationStore>,
    pub geofences: Arc<dyn GeofenceStore>,
    pub notifications: Arc<dyn NotificationStore>,
    pub alerts: Arc<dyn AlertStore>,
    pub bookings: Arc<dyn BookingDirectory>,
    pub fleet: Arc<dyn FleetRegistry>,
}

/// Transactional record store for assignments.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    /// Fails with `DuplicateAssignment` when the booking already has an active assignment.
    async fn insert(&self, assignment: &DispatchAssignment) -> DispatchResult<()>;

    async fn get(&self, id: Uuid) -> DispatchResult<Option<DispatchAssignment>>;

    /// Compare-and-swap write. `assignment.version` and `expected_status` must
    /// match the stored row, otherwise `Conflict`. Driver and vehicle uniqueness
    /// across active assignments is checked in the same critical section
    /// (`ResourceBusy`). Route-derived fields are not written here. Returns
    /// the stored record with its new version.
    async fn update(
        &self,
        assignment: &DispatchAssignment,
        expected_status: DispatchStatus,
    ) -> DispatchResult<DispatchAssignment>;

    /// Writes route-derived fields only, guarded on status. Does not bump
    /// `version`. Returns `None` when the status is no longer `expected_status`.
    async fn update_estimate(
        &self,
        id: Uuid,
        expected_status: DispatchStatus,
        estimate: &EtaEstimate,
    ) -> DispatchResult<Option<DispatchAssignment>>;

    async fn list(&self, filter: &AssignmentFilter) -> DispatchResult<Vec<DispatchAssignment>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn get_device(&self, device_id: &str) -> DispatchResult<Option<TrackingDevice>>;

    async fn device_for_vehicle(&self, vehicle_id: Uuid) -> DispatchResult<Option<TrackingDevice>>;

    /// Refreshes last-seen and battery; the only mutation ingestion performs.
    async fn touch(
        &self,
        device_id: &str,
        last_seen: DateTime<Utc>,
        battery_level: Option<i32>,
    ) -> DispatchResult<()>;

    async fn list_devices(&self) -> DispatchResult<Vec<TrackingDevice>>;
}

/// Append-only telemetry store with a latest-location projection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LocationStore: Send + Sync {
    async fn append(&self, location: &VehicleLocation) -> DispatchResult<()>;

    async fn exists(&self, device_id: &str, timestamp: DateTime<Utc>) -> DispatchResult<bool>;

    async fn latest_for_device(&self, device_id: &str) -> DispatchResult<Option<VehicleLocation>>;

    async fn latest_for_vehicle(&self, vehicle_id: Uuid) -> DispatchResult<Option<VehicleLocation>>;

    async fn latest_per_vehicle(&self) -> DispatchResult<Vec<VehicleLocation>>;

    async fn history(&self, device_id: &str, limit: usize) -> DispatchResult<Vec<VehicleLocation>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GeofenceStore: Send + Sync {
    async fn list_active(&self) -> DispatchResult<Vec<GeofenceArea>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, notification: &DispatchNotification) -> DispatchResult<()>;

    /// Returns `false` when no notification has this id.
    async fn mark_read(&self, id: Uuid) -> DispatchResult<bool>;

    async fn list_for_user(
        &self,
        user_id: Option<Uuid>,
        unread_only: bool,
    ) -> DispatchResult<Vec<DispatchNotification>>;

    async fn list_for_assignment(&self, assignment_id: Uuid) -> DispatchResult<Vec<DispatchNotification>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn insert(&self, alert: &EmergencyAlert) -> DispatchResult<()>;

    async fn get(&self, id: Uuid) -> DispatchResult<Option<EmergencyAlert>>;

    /// Marks the alert resolved if it is still open. Returns `None` when the
    /// alert was already resolved.
    async fn resolve(
        &self,
        id: Uuid,
        resolver: Uuid,
        resolved_at: DateTime<Utc>,
    ) -> DispatchResult<Option<EmergencyAlert>>;

    async fn list_unresolved(&self) -> DispatchResult<Vec<EmergencyAlert>>;
}

/// Read-only view of the external booking store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BookingDirectory: Send + Sync {
    async fn get_booking(&self, booking_id: Uuid) -> DispatchResult<Option<Booking>>;
}

/// Read-only view of the external driver/vehicle registry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FleetRegistry: Send + Sync {
    async fn get_driver(&self, driver_id: Uuid) -> DispatchResult<Option<Driver>>;

    async fn get_vehicle(&self, vehicle_id: Uuid) -> DispatchResult<Option<Vehicle>>;
}
