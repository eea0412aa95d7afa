//! PostgreSQL implementations of the store traits. One `PgStore` backs every
//! seam; the booking, driver and vehicle tables are only ever read.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Executor, Row};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::db::{queries, DbPool};
use crate::error::{DispatchError, DispatchResult};
use crate::models::alert::{AlertType, EmergencyAlert};
use crate::models::assignment::{
    AssignmentFilter, DispatchAssignment, DispatchStatus, EtaEstimate, GeoPoint, RouteSummary,
};
use crate::models::fleet::{Booking, Driver, Vehicle};
use crate::models::geofence::{GeofenceArea, GeofenceType};
use crate::models::notification::{DispatchNotification, NotificationPriority, NotificationType};
use crate::models::tracking::{TrackingDevice, VehicleLocation};
use crate::store::{
    AlertStore, AssignmentStore, BookingDirectory, DeviceStore, DispatchStores, FleetRegistry,
    GeofenceStore, LocationStore, NotificationStore,
};

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> DispatchResult<()> {
        // Simple-query protocol so the multi-statement schema runs in one call.
        (&self.pool).execute(queries::SCHEMA).await?;
        Ok(())
    }

    pub fn into_stores(self) -> DispatchStores {
        let store = Arc::new(self);
        DispatchStores {
            assignments: store.clone(),
            devices: store.clone(),
            locations: store.clone(),
            geofences: store.clone(),
            notifications: store.clone(),
            alerts: store.clone(),
            bookings: store.clone(),
            fleet: store,
        }
    }

    async fn holder(&self, sql: &str, resource: Uuid, assignment_id: Uuid) -> DispatchResult<Uuid> {
        let row = sqlx::query(sql)
            .bind(resource)
            .bind(assignment_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => row.try_get("id")?,
            None => Uuid::nil(),
        })
    }

    async fn busy(
        &self,
        resource: &'static str,
        sql: &str,
        id: Option<Uuid>,
        assignment_id: Uuid,
    ) -> DispatchError {
        let Some(id) = id else {
            return DispatchError::Storage(anyhow::anyhow!("unique violation on empty {}", resource));
        };
        match self.holder(sql, id, assignment_id).await {
            Ok(holder) => DispatchError::ResourceBusy { resource, id, holder },
            Err(e) => e,
        }
    }

    /// Translates a partial-unique-index violation into the domain error.
    async fn map_unique_violation(&self, err: sqlx::Error, assignment: &DispatchAssignment) -> DispatchError {
        let constraint = match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => db.constraint().map(str::to_string),
            _ => None,
        };
        match constraint.as_deref() {
            Some(queries::ASSIGNMENT_ACTIVE_BOOKING_INDEX) => {
                DispatchError::DuplicateAssignment(assignment.booking_id)
            }
            Some(queries::ASSIGNMENT_ACTIVE_DRIVER_INDEX) => {
                self.busy(
                    "driver",
                    queries::SELECT_ACTIVE_DRIVER_HOLDER,
                    assignment.driver_id,
                    assignment.id,
                )
                .await
            }
            Some(queries::ASSIGNMENT_ACTIVE_VEHICLE_INDEX) => {
                self.busy(
                    "vehicle",
                    queries::SELECT_ACTIVE_VEHICLE_HOLDER,
                    assignment.vehicle_id,
                    assignment.id,
                )
                .await
            }
            _ => err.into(),
        }
    }
}

fn corrupt(column: &str, value: &str) -> DispatchError {
    DispatchError::Storage(anyhow::anyhow!("unexpected {} value in database: {}", column, value))
}

fn assignment_from_row(row: &PgRow) -> DispatchResult<DispatchAssignment> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<DispatchStatus>()
        .map_err(|_| corrupt("status", &status))?;
    Ok(DispatchAssignment {
        id: row.try_get("id")?,
        booking_id: row.try_get("booking_id")?,
        driver_id: row.try_get("driver_id")?,
        vehicle_id: row.try_get("vehicle_id")?,
        assigned_by: row.try_get("assigned_by")?,
        status,
        assigned_at: row.try_get("assigned_at")?,
        started_at: row.try_get("started_at")?,
        arrived_at: row.try_get("arrived_at")?,
        completed_at: row.try_get("completed_at")?,
        cancelled_at: row.try_get("cancelled_at")?,
        estimated_arrival: row.try_get("estimated_arrival")?,
        actual_arrival: row.try_get("actual_arrival")?,
        pickup_location: row
            .try_get::<Option<Json<GeoPoint>>, _>("pickup_location")?
            .map(|j| j.0),
        dropoff_location: row
            .try_get::<Option<Json<GeoPoint>>, _>("dropoff_location")?
            .map(|j| j.0),
        route_summary: row
            .try_get::<Option<Json<RouteSummary>>, _>("route_summary")?
            .map(|j| j.0),
        distance_km: row.try_get("distance_km")?,
        estimated_duration_minutes: row.try_get("estimated_duration_minutes")?,
        actual_duration_minutes: row.try_get("actual_duration_minutes")?,
        priority: row.try_get("priority")?,
        notes: row.try_get("notes")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn device_from_row(row: &PgRow) -> DispatchResult<TrackingDevice> {
    Ok(TrackingDevice {
        device_id: row.try_get("device_id")?,
        vehicle_id: row.try_get("vehicle_id")?,
        driver_id: row.try_get("driver_id")?,
        is_active: row.try_get("is_active")?,
        last_seen: row.try_get("last_seen")?,
        battery_level: row.try_get("battery_level")?,
    })
}

fn location_from_row(row: &PgRow) -> DispatchResult<VehicleLocation> {
    Ok(VehicleLocation {
        id: row.try_get("id")?,
        device_id: row.try_get("device_id")?,
        vehicle_id: row.try_get("vehicle_id")?,
        driver_id: row.try_get("driver_id")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        altitude: row.try_get("altitude")?,
        accuracy: row.try_get("accuracy")?,
        speed: row.try_get("speed")?,
        bearing: row.try_get("bearing")?,
        timestamp: row.try_get("timestamp")?,
        battery_level: row.try_get("battery_level")?,
        is_moving: row.try_get("is_moving")?,
        address: row.try_get("address")?,
        received_at: row.try_get("received_at")?,
    })
}

fn notification_from_row(row: &PgRow) -> DispatchResult<DispatchNotification> {
    let kind: String = row.try_get("notification_type")?;
    let priority: String = row.try_get("priority")?;
    Ok(DispatchNotification {
        id: row.try_get("id")?,
        assignment_id: row.try_get("assignment_id")?,
        alert_id: row.try_get("alert_id")?,
        notification_type: NotificationType::parse(&kind)
            .ok_or_else(|| corrupt("notification_type", &kind))?,
        title: row.try_get("title")?,
        message: row.try_get("message")?,
        priority: NotificationPriority::parse(&priority).ok_or_else(|| corrupt("priority", &priority))?,
        is_read: row.try_get("is_read")?,
        target_user: row.try_get("target_user")?,
        created_at: row.try_get("created_at")?,
    })
}

fn alert_from_row(row: &PgRow) -> DispatchResult<EmergencyAlert> {
    let alert_type: String = row.try_get("alert_type")?;
    Ok(EmergencyAlert {
        id: row.try_get("id")?,
        alert_type: AlertType::parse(&alert_type).ok_or_else(|| corrupt("alert_type", &alert_type))?,
        location: row.try_get::<Option<Json<GeoPoint>>, _>("location")?.map(|j| j.0),
        assignment_id: row.try_get("assignment_id")?,
        vehicle_id: row.try_get("vehicle_id")?,
        driver_id: row.try_get("driver_id")?,
        message: row.try_get("message")?,
        is_resolved: row.try_get("is_resolved")?,
        resolved_at: row.try_get("resolved_at")?,
        resolved_by: row.try_get("resolved_by")?,
        created_at: row.try_get("created_at")?,
    })
}

fn geofence_from_row(row: &PgRow) -> DispatchResult<GeofenceArea> {
    let kind: String = row.try_get("geofence_type")?;
    Ok(GeofenceArea {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        geofence_type: GeofenceType::parse(&kind).ok_or_else(|| corrupt("geofence_type", &kind))?,
        polygon: row.try_get::<Json<Vec<GeoPoint>>, _>("polygon")?.0,
        is_active: row.try_get("is_active")?,
        assignment_id: row.try_get("assignment_id")?,
    })
}

fn booking_point(row: &PgRow, prefix: &str) -> DispatchResult<Option<GeoPoint>> {
    let lat: Option<f64> = row.try_get(format!("{}_lat", prefix).as_str())?;
    let lng: Option<f64> = row.try_get(format!("{}_lng", prefix).as_str())?;
    let address: Option<String> = row.try_get(format!("{}_address", prefix).as_str())?;
    Ok(lat.zip(lng).map(|(lat, lng)| GeoPoint { lat, lng, address }))
}

#[async_trait]
impl AssignmentStore for PgStore {
    async fn insert(&self, a: &DispatchAssignment) -> DispatchResult<()> {
        let result = sqlx::query(queries::INSERT_ASSIGNMENT)
            .bind(a.id)
            .bind(a.booking_id)
            .bind(a.driver_id)
            .bind(a.vehicle_id)
            .bind(a.assigned_by)
            .bind(a.status.as_str())
            .bind(a.assigned_at)
            .bind(a.started_at)
            .bind(a.arrived_at)
            .bind(a.completed_at)
            .bind(a.cancelled_at)
            .bind(a.estimated_arrival)
            .bind(a.actual_arrival)
            .bind(a.pickup_location.as_ref().map(Json))
            .bind(a.dropoff_location.as_ref().map(Json))
            .bind(a.route_summary.as_ref().map(Json))
            .bind(a.distance_km)
            .bind(a.estimated_duration_minutes)
            .bind(a.actual_duration_minutes)
            .bind(a.priority)
            .bind(a.notes.as_deref())
            .bind(a.version)
            .bind(a.created_at)
            .bind(a.updated_at)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => Err(self.map_unique_violation(e, a).await),
        }
    }

    async fn update_estimate(
        &self,
        id: Uuid,
        expected_status: DispatchStatus,
        estimate: &EtaEstimate,
    ) -> DispatchResult<Option<DispatchAssignment>> {
        let row = sqlx::query(queries::UPDATE_ASSIGNMENT_ESTIMATE)
            .bind(id)
            .bind(expected_status.as_str())
            .bind(estimate.distance_km)
            .bind(estimate.estimated_duration_minutes)
            .bind(estimate.estimated_arrival)
            .bind(Json(&estimate.route_summary))
            .bind(estimate.computed_at)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = row {
            return assignment_from_row(&row).map(Some);
        }
        if AssignmentStore::get(self, id).await?.is_none() {
            return Err(DispatchError::AssignmentNotFound(id));
        }
        Ok(None)
    }

    async fn get(&self, id: Uuid) -> DispatchResult<Option<DispatchAssignment>> {
        let row = sqlx::query(queries::SELECT_ASSIGNMENT)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(assignment_from_row).transpose()
    }

    async fn update(
        &self,
        a: &DispatchAssignment,
        expected_status: DispatchStatus,
    ) -> DispatchResult<DispatchAssignment> {
        let result = sqlx::query(queries::UPDATE_ASSIGNMENT)
            .bind(a.id)
            .bind(a.version)
            .bind(expected_status.as_str())
            .bind(a.driver_id)
            .bind(a.vehicle_id)
            .bind(a.assigned_by)
            .bind(a.status.as_str())
            .bind(a.assigned_at)
            .bind(a.started_at)
            .bind(a.arrived_at)
            .bind(a.completed_at)
            .bind(a.cancelled_at)
            .bind(a.actual_arrival)
            .bind(a.actual_duration_minutes)
            .bind(a.priority)
            .bind(a.notes.as_deref())
            .bind(a.updated_at)
            .fetch_optional(&self.pool)
            .await;

        match result {
            Ok(Some(row)) => assignment_from_row(&row),
            Ok(None) => {
                if AssignmentStore::get(self, a.id).await?.is_none() {
                    return Err(DispatchError::AssignmentNotFound(a.id));
                }
                debug!(assignment_id = %a.id, version = a.version, "Compare-and-swap missed");
                Err(DispatchError::Conflict {
                    assignment_id: a.id,
                    expected_version: a.version,
                })
            }
            Err(e) => Err(self.map_unique_violation(e, a).await),
        }
    }

    async fn list(&self, filter: &AssignmentFilter) -> DispatchResult<Vec<DispatchAssignment>> {
        let rows = sqlx::query(queries::SELECT_ASSIGNMENTS_FILTERED)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.driver_id)
            .bind(filter.vehicle_id)
            .bind(filter.booking_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(assignment_from_row).collect()
    }
}

#[async_trait]
impl DeviceStore for PgStore {
    async fn get_device(&self, device_id: &str) -> DispatchResult<Option<TrackingDevice>> {
        let row = sqlx::query(queries::SELECT_DEVICE)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(device_from_row).transpose()
    }

    async fn device_for_vehicle(&self, vehicle_id: Uuid) -> DispatchResult<Option<TrackingDevice>> {
        let row = sqlx::query(queries::SELECT_DEVICE_FOR_VEHICLE)
            .bind(vehicle_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(device_from_row).transpose()
    }

    async fn touch(
        &self,
        device_id: &str,
        last_seen: DateTime<Utc>,
        battery_level: Option<i32>,
    ) -> DispatchResult<()> {
        sqlx::query(queries::UPDATE_DEVICE_LAST_SEEN)
            .bind(device_id)
            .bind(last_seen)
            .bind(battery_level)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_devices(&self) -> DispatchResult<Vec<TrackingDevice>> {
        let rows = sqlx::query(queries::SELECT_DEVICES).fetch_all(&self.pool).await?;
        rows.iter().map(device_from_row).collect()
    }
}

#[async_trait]
impl LocationStore for PgStore {
    async fn append(&self, l: &VehicleLocation) -> DispatchResult<()> {
        sqlx::query(queries::INSERT_LOCATION)
            .bind(l.id)
            .bind(&l.device_id)
            .bind(l.vehicle_id)
            .bind(l.driver_id)
            .bind(l.latitude)
            .bind(l.longitude)
            .bind(l.altitude)
            .bind(l.accuracy)
            .bind(l.speed)
            .bind(l.bearing)
            .bind(l.timestamp)
            .bind(l.battery_level)
            .bind(l.is_moving)
            .bind(l.address.as_deref())
            .bind(l.received_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn exists(&self, device_id: &str, timestamp: DateTime<Utc>) -> DispatchResult<bool> {
        let row = sqlx::query(queries::SELECT_LOCATION_EXISTS)
            .bind(device_id)
            .bind(timestamp)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("found")?)
    }

    async fn latest_for_device(&self, device_id: &str) -> DispatchResult<Option<VehicleLocation>> {
        let row = sqlx::query(queries::SELECT_LATEST_LOCATION_FOR_DEVICE)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(location_from_row).transpose()
    }

    async fn latest_for_vehicle(&self, vehicle_id: Uuid) -> DispatchResult<Option<VehicleLocation>> {
        let row = sqlx::query(queries::SELECT_LATEST_LOCATION_FOR_VEHICLE)
            .bind(vehicle_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(location_from_row).transpose()
    }

    async fn latest_per_vehicle(&self) -> DispatchResult<Vec<VehicleLocation>> {
        let rows = sqlx::query(queries::SELECT_LATEST_LOCATION_PER_VEHICLE)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(location_from_row).collect()
    }

    async fn history(&self, device_id: &str, limit: usize) -> DispatchResult<Vec<VehicleLocation>> {
        let rows = sqlx::query(queries::SELECT_LOCATION_HISTORY)
            .bind(device_id)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(location_from_row).collect()
    }
}

#[async_trait]
impl GeofenceStore for PgStore {
    async fn list_active(&self) -> DispatchResult<Vec<GeofenceArea>> {
        let rows = sqlx::query(queries::SELECT_ACTIVE_GEOFENCES)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(geofence_from_row).collect()
    }
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn insert(&self, n: &DispatchNotification) -> DispatchResult<()> {
        sqlx::query(queries::INSERT_NOTIFICATION)
            .bind(n.id)
            .bind(n.assignment_id)
            .bind(n.alert_id)
            .bind(n.notification_type.as_str())
            .bind(&n.title)
            .bind(&n.message)
            .bind(n.priority.as_str())
            .bind(n.is_read)
            .bind(n.target_user)
            .bind(n.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_read(&self, id: Uuid) -> DispatchResult<bool> {
        let result = sqlx::query(queries::UPDATE_NOTIFICATION_READ)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_for_user(
        &self,
        user_id: Option<Uuid>,
        unread_only: bool,
    ) -> DispatchResult<Vec<DispatchNotification>> {
        let rows = sqlx::query(queries::SELECT_NOTIFICATIONS_FOR_USER)
            .bind(user_id)
            .bind(unread_only)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(notification_from_row).collect()
    }

    async fn list_for_assignment(&self, assignment_id: Uuid) -> DispatchResult<Vec<DispatchNotification>> {
        let rows = sqlx::query(queries::SELECT_NOTIFICATIONS_FOR_ASSIGNMENT)
            .bind(assignment_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(notification_from_row).collect()
    }
}

#[async_trait]
impl AlertStore for PgStore {
    async fn insert(&self, alert: &EmergencyAlert) -> DispatchResult<()> {
        sqlx::query(queries::INSERT_ALERT)
            .bind(alert.id)
            .bind(alert.alert_type.as_str())
            .bind(alert.location.as_ref().map(Json))
            .bind(alert.assignment_id)
            .bind(alert.vehicle_id)
            .bind(alert.driver_id)
            .bind(alert.message.as_deref())
            .bind(alert.is_resolved)
            .bind(alert.resolved_at)
            .bind(alert.resolved_by)
            .bind(alert.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DispatchResult<Option<EmergencyAlert>> {
        let row = sqlx::query(queries::SELECT_ALERT)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(alert_from_row).transpose()
    }

    async fn resolve(
        &self,
        id: Uuid,
        resolver: Uuid,
        resolved_at: DateTime<Utc>,
    ) -> DispatchResult<Option<EmergencyAlert>> {
        let row = sqlx::query(queries::RESOLVE_ALERT)
            .bind(id)
            .bind(resolver)
            .bind(resolved_at)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(alert_from_row(&row)?)),
            None if AlertStore::get(self, id).await?.is_some() => Ok(None),
            None => Err(DispatchError::AlertNotFound(id)),
        }
    }

    async fn list_unresolved(&self) -> DispatchResult<Vec<EmergencyAlert>> {
        let rows = sqlx::query(queries::SELECT_UNRESOLVED_ALERTS)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(alert_from_row).collect()
    }
}

#[async_trait]
impl BookingDirectory for PgStore {
    async fn get_booking(&self, booking_id: Uuid) -> DispatchResult<Option<Booking>> {
        let row = sqlx::query(queries::SELECT_BOOKING)
            .bind(booking_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Booking {
            id: row.try_get("id")?,
            customer_name: row.try_get("customer_name")?,
            customer_email: row.try_get("customer_email")?,
            customer_phone: row.try_get("customer_phone")?,
            pickup: booking_point(&row, "pickup")?,
            dropoff: booking_point(&row, "dropoff")?,
        }))
    }
}

#[async_trait]
impl FleetRegistry for PgStore {
    async fn get_driver(&self, driver_id: Uuid) -> DispatchResult<Option<Driver>> {
        let row = sqlx::query(queries::SELECT_DRIVER)
            .bind(driver_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Driver {
            id: row.try_get("id")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            phone: row.try_get("phone")?,
            is_available: row.try_get("is_available")?,
        }))
    }

    async fn get_vehicle(&self, vehicle_id: Uuid) -> DispatchResult<Option<Vehicle>> {
        let row = sqlx::query(queries::SELECT_VEHICLE)
            .bind(vehicle_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Vehicle {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            plate_number: row.try_get("plate_number")?,
            is_available: row.try_get("is_available")?,
        }))
    }
}
