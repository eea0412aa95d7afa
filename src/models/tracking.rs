use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingDevice {
    pub device_id: String,
    pub vehicle_id: Option<Uuid>,
    pub driver_id: Option<Uuid>,
    pub is_active: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub battery_level: Option<i32>,
}

impl TrackingDevice {
    pub fn is_online(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.last_seen.map_or(false, |seen| now - seen < window)
    }
}

/// One observed position. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleLocation {
    pub id: Uuid,
    pub device_id: String,
    pub vehicle_id: Option<Uuid>,
    pub driver_id: Option<Uuid>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub bearing: Option<f64>,
    /// Device clock.
    pub timestamp: DateTime<Utc>,
    pub battery_level: Option<i32>,
    pub is_moving: bool,
    pub address: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl VehicleLocation {
    /// Key used for per-vehicle state; devices without a vehicle are tracked on their own.
    pub fn tracking_key(&self) -> String {
        match self.vehicle_id {
            Some(vehicle_id) => vehicle_id.to_string(),
            None => format!("device:{}", self.device_id),
        }
    }
}

/// Live view of a vehicle assembled from its latest location and device.
#[derive(Debug, Clone, Serialize)]
pub struct VehicleTracking {
    pub vehicle_id: Uuid,
    pub device_id: Option<String>,
    pub current_location: VehicleLocation,
    pub last_update: DateTime<Utc>,
    pub is_online: bool,
    pub battery_level: Option<i32>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub is_moving: bool,
}

impl VehicleTracking {
    pub fn assemble(
        vehicle_id: Uuid,
        location: VehicleLocation,
        device: Option<&TrackingDevice>,
        now: DateTime<Utc>,
        online_window: Duration,
    ) -> Self {
        Self {
            vehicle_id,
            device_id: device.map(|d| d.device_id.clone()),
            last_update: location.timestamp,
            is_online: device.map_or(false, |d| d.is_online(now, online_window)),
            battery_level: location.battery_level,
            speed: location.speed,
            heading: location.bearing,
            is_moving: location.is_moving,
            current_location: location,
        }
    }
}
