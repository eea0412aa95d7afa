use chrono::{DateTime, Duration, Utc};
use futures::future::try_join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DispatchError, DispatchResult};
use crate::geo::is_valid_coordinate;
use crate::models::message::{LocationMessage, MessageType};
use crate::models::tracking::{VehicleLocation, VehicleTracking};
use crate::store::{DeviceStore, LocationStore};

const LIVE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
pub enum IngestOutcome {
    Stored(VehicleLocation),
    /// Same device and timestamp as an already stored report.
    Duplicate,
    Ignored(MessageType),
}

pub struct IngestionService {
    devices: Arc<dyn DeviceStore>,
    locations: Arc<dyn LocationStore>,
    device_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    geofence_queue: Option<mpsc::Sender<VehicleLocation>>,
    live: broadcast::Sender<VehicleLocation>,
    moving_speed_threshold: f64,
    online_window: Duration,
}

impl IngestionService {
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        locations: Arc<dyn LocationStore>,
        moving_speed_threshold: f64,
        online_window: Duration,
    ) -> Self {
        let (live, _) = broadcast::channel(LIVE_CHANNEL_CAPACITY);
        Self {
            devices,
            locations,
            device_locks: Mutex::new(HashMap::new()),
            geofence_queue: None,
            live,
            moving_speed_threshold,
            online_window,
        }
    }

    /// Accepted locations are handed to the geofence worker through this queue.
    pub fn with_geofence_queue(mut self, queue: mpsc::Sender<VehicleLocation>) -> Self {
        self.geofence_queue = Some(queue);
        self
    }

    /// Live feed of accepted locations for presentation layers.
    pub fn subscribe(&self) -> broadcast::Receiver<VehicleLocation> {
        self.live.subscribe()
    }

    pub async fn ingest(&self, message: LocationMessage) -> DispatchResult<IngestOutcome> {
        if message.message_type != MessageType::Location {
            debug!(
                device_id = %message.tracker_id,
                message_type = ?message.message_type,
                "Ignoring non-location message"
            );
            return Ok(IngestOutcome::Ignored(message.message_type));
        }

        if !is_valid_coordinate(message.latitude, message.longitude) {
            return Err(DispatchError::InvalidReport(format!(
                "coordinates out of range: ({}, {})",
                message.latitude, message.longitude
            )));
        }
        let timestamp = DateTime::<Utc>::from_timestamp(message.timestamp, 0).ok_or_else(|| {
            DispatchError::InvalidReport(format!("timestamp out of range: {}", message.timestamp))
        })?;

        let device = self
            .devices
            .get_device(&message.tracker_id)
            .await?
            .filter(|d| d.is_active)
            .ok_or_else(|| DispatchError::UnknownDevice(message.tracker_id.clone()))?;

        let lock = self.device_lock(&device.device_id);
        let guard = lock.lock().await;

        if self.locations.exists(&device.device_id, timestamp).await? {
            debug!(device_id = %device.device_id, timestamp = message.timestamp, "Duplicate report");
            return Ok(IngestOutcome::Duplicate);
        }

        if let Some(latest) = self.locations.latest_for_device(&device.device_id).await? {
            if timestamp < latest.timestamp {
                return Err(DispatchError::StaleReport {
                    device_id: device.device_id.clone(),
                    timestamp: message.timestamp,
                    latest: latest.timestamp.timestamp(),
                });
            }
        }

        let battery_level = message.battery_percent();
        let received_at = Utc::now();
        let location = VehicleLocation {
            id: Uuid::new_v4(),
            device_id: device.device_id.clone(),
            vehicle_id: device.vehicle_id,
            driver_id: device.driver_id,
            latitude: message.latitude,
            longitude: message.longitude,
            altitude: message.altitude,
            accuracy: message.horizontal_accuracy,
            speed: message.speed,
            bearing: message.bearing,
            timestamp,
            battery_level,
            is_moving: message.speed.map_or(false, |s| s > self.moving_speed_threshold),
            address: None,
            received_at,
        };

        self.locations.append(&location).await?;
        drop(guard);

        if let Err(e) = self
            .devices
            .touch(&device.device_id, received_at, battery_level)
            .await
        {
            warn!(device_id = %device.device_id, error = %e, "Failed to refresh device last-seen");
        }

        // No receivers is the normal case when nobody is watching.
        let _ = self.live.send(location.clone());

        if let Some(queue) = &self.geofence_queue {
            match queue.try_send(location.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(device_id = %device.device_id, "Geofence queue full, skipping evaluation");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    warn!(device_id = %device.device_id, "Geofence worker stopped");
                }
            }
        }

        info!(
            device_id = %location.device_id,
            vehicle_id = ?location.vehicle_id,
            lat = location.latitude,
            lng = location.longitude,
            moving = location.is_moving,
            "Stored vehicle location"
        );

        Ok(IngestOutcome::Stored(location))
    }

    pub async fn tracking(&self, vehicle_id: Uuid) -> DispatchResult<Option<VehicleTracking>> {
        load_vehicle_tracking(
            self.locations.as_ref(),
            self.devices.as_ref(),
            vehicle_id,
            self.online_window,
        )
        .await
    }

    pub async fn tracked_vehicles(&self) -> DispatchResult<Vec<VehicleTracking>> {
        let now = Utc::now();
        let latest: Vec<(Uuid, VehicleLocation)> = self
            .locations
            .latest_per_vehicle()
            .await?
            .into_iter()
            .filter_map(|l| l.vehicle_id.map(|v| (v, l)))
            .collect();

        let devices = try_join_all(
            latest
                .iter()
                .map(|(_, location)| self.devices.get_device(&location.device_id)),
        )
        .await?;

        Ok(latest
            .into_iter()
            .zip(devices)
            .map(|((vehicle_id, location), device)| {
                VehicleTracking::assemble(vehicle_id, location, device.as_ref(), now, self.online_window)
            })
            .collect())
    }

    pub async fn history(&self, device_id: &str, limit: usize) -> DispatchResult<Vec<VehicleLocation>> {
        self.locations.history(device_id, limit).await
    }

    fn device_lock(&self, device_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .device_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(device_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

pub async fn load_vehicle_tracking(
    locations: &dyn LocationStore,
    devices: &dyn DeviceStore,
    vehicle_id: Uuid,
    online_window: Duration,
) -> DispatchResult<Option<VehicleTracking>> {
    let Some(location) = locations.latest_for_vehicle(vehicle_id).await? else {
        return Ok(None);
    };
    let device = devices.device_for_vehicle(vehicle_id).await?;
    Ok(Some(VehicleTracking::assemble(
        vehicle_id,
        location,
        device.as_ref(),
        Utc::now(),
        online_window,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tracking::TrackingDevice;
    use crate::store::memory::{InMemoryDeviceStore, InMemoryLocationStore};

    fn message(tracker_id: &str, timestamp: i64, speed: Option<f64>) -> LocationMessage {
        serde_json::from_value(serde_json::json!({
            "tracker_id": tracker_id,
            "latitude": 35.6812,
            "longitude": 139.7671,
            "timestamp": timestamp,
            "speed": speed,
            "battery_level": 64,
            "message_type": "location"
        }))
        .unwrap()
    }

    async fn service() -> (IngestionService, Arc<InMemoryDeviceStore>, Arc<InMemoryLocationStore>) {
        let devices = Arc::new(InMemoryDeviceStore::new());
        devices
            .register(TrackingDevice {
                device_id: "tracker-1".to_string(),
                vehicle_id: Some(Uuid::new_v4()),
                driver_id: None,
                is_active: true,
                last_seen: None,
                battery_level: None,
            })
            .await;
        devices
            .register(TrackingDevice {
                device_id: "retired".to_string(),
                vehicle_id: None,
                driver_id: None,
                is_active: false,
                last_seen: None,
                battery_level: None,
            })
            .await;
        let locations = Arc::new(InMemoryLocationStore::new());
        let service = IngestionService::new(
            devices.clone(),
            locations.clone(),
            1.0,
            Duration::minutes(5),
        );
        (service, devices, locations)
    }

    #[tokio::test]
    async fn test_unknown_and_inactive_devices_are_rejected() {
        let (service, _, _) = service().await;

        let result = service.ingest(message("ghost", 100, None)).await;
        assert!(matches!(result, Err(DispatchError::UnknownDevice(id)) if id == "ghost"));

        let result = service.ingest(message("retired", 100, None)).await;
        assert!(matches!(result, Err(DispatchError::UnknownDevice(_))));
    }

    #[tokio::test]
    async fn test_moving_flag_and_device_refresh() {
        let (service, devices, _) = service().await;

        let outcome = service.ingest(message("tracker-1", 100, Some(0.4))).await.unwrap();
        let IngestOutcome::Stored(location) = outcome else {
            panic!("expected stored location");
        };
        assert!(!location.is_moving);

        let outcome = service.ingest(message("tracker-1", 110, Some(8.0))).await.unwrap();
        let IngestOutcome::Stored(location) = outcome else {
            panic!("expected stored location");
        };
        assert!(location.is_moving);

        let device = devices.get_device("tracker-1").await.unwrap().unwrap();
        assert!(device.last_seen.is_some());
        assert_eq!(device.battery_level, Some(64));
    }

    #[tokio::test]
    async fn test_non_location_messages_are_ignored() {
        let (service, _, locations) = service().await;
        let mut waypoint = message("tracker-1", 100, None);
        waypoint.message_type = MessageType::Waypoint;

        let outcome = service.ingest(waypoint).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Ignored(MessageType::Waypoint)));
        assert_eq!(locations.count_for_device("tracker-1").await, 0);
    }

    #[tokio::test]
    async fn test_out_of_range_coordinates() {
        let (service, _, _) = service().await;
        let mut bad = message("tracker-1", 100, None);
        bad.latitude = 123.0;

        let result = service.ingest(bad).await;
        assert!(matches!(result, Err(DispatchError::InvalidReport(_))));
    }

    #[tokio::test]
    async fn test_live_subscribers_receive_locations() {
        let (service, _, _) = service().await;
        let mut feed = service.subscribe();

        service.ingest(message("tracker-1", 100, None)).await.unwrap();
        let location = feed.recv().await.unwrap();
        assert_eq!(location.device_id, "tracker-1");
    }

    #[tokio::test]
    async fn test_tracking_view_reports_online_vehicle() {
        let (service, devices, _) = service().await;
        let vehicle_id = devices
            .get_device("tracker-1")
            .await
            .unwrap()
            .unwrap()
            .vehicle_id
            .unwrap();

        assert!(service.tracking(vehicle_id).await.unwrap().is_none());
        service.ingest(message("tracker-1", 100, Some(12.0))).await.unwrap();

        let tracking = service.tracking(vehicle_id).await.unwrap().unwrap();
        assert!(tracking.is_online);
        assert!(tracking.is_moving);
        assert_eq!(tracking.device_id.as_deref(), Some("tracker-1"));
        assert_eq!(service.tracked_vehicles().await.unwrap().len(), 1);
    }
}
