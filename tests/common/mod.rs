#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use siscom_dispatch::error::DispatchResult;
use siscom_dispatch::http::AppState;
use siscom_dispatch::models::assignment::{DispatchAssignment, GeoPoint};
use siscom_dispatch::models::fleet::{Booking, Driver, Vehicle};
use siscom_dispatch::models::geofence::{GeofenceArea, GeofenceType};
use siscom_dispatch::models::message::LocationMessage;
use siscom_dispatch::models::tracking::TrackingDevice;
use siscom_dispatch::processor::assignment_manager::AssignmentManager;
use siscom_dispatch::processor::emergency::EmergencyAlertHandler;
use siscom_dispatch::processor::eta::{RouteCalculator, RouteEstimate, RoutingProvider};
use siscom_dispatch::processor::geofence::GeofenceEvaluator;
use siscom_dispatch::processor::ingestion::IngestionService;
use siscom_dispatch::processor::notifier::NotificationDispatcher;
use siscom_dispatch::processor::workers;
use siscom_dispatch::store::memory::*;
use siscom_dispatch::store::DispatchStores;

pub const TRACKER: &str = "tracker-e2e";

/// Tokyo Station to Haneda, with a dropoff zone around the terminal.
pub const PICKUP: (f64, f64) = (35.6812, 139.7671);
pub const DROPOFF: (f64, f64) = (35.5494, 139.7798);
pub const OUTSIDE_ZONE: (f64, f64) = (35.6000, 139.7700);

pub struct FixedRoute;

#[async_trait]
impl RoutingProvider for FixedRoute {
    async fn route(&self, _origin: &GeoPoint, _destination: &GeoPoint) -> DispatchResult<RouteEstimate> {
        Ok(RouteEstimate {
            distance_km: 18.4,
            duration_minutes: 27.0,
            polyline: "_p~iF~ps|U_ulLnnqC".to_string(),
            steps: vec!["Head south on Route 1".to_string()],
        })
    }
}

pub struct Harness {
    pub stores: DispatchStores,
    pub bookings: Arc<InMemoryBookingDirectory>,
    pub geofences: Arc<InMemoryGeofenceStore>,
    pub notifications: Arc<InMemoryNotificationStore>,
    pub locations: Arc<InMemoryLocationStore>,
    pub ingestion: Arc<IngestionService>,
    pub manager: Arc<AssignmentManager>,
    pub emergency: Arc<EmergencyAlertHandler>,
    pub notifier: Arc<NotificationDispatcher>,
    pub booking_id: Uuid,
    pub driver_id: Uuid,
    pub vehicle_id: Uuid,
}

impl Harness {
    /// Wires memory stores, workers and a fixed routing provider.
    pub async fn start() -> Self {
        let bookings = Arc::new(InMemoryBookingDirectory::new());
        let fleet = Arc::new(InMemoryFleetRegistry::new());
        let devices = Arc::new(InMemoryDeviceStore::new());
        let geofences = Arc::new(InMemoryGeofenceStore::new());
        let notifications = Arc::new(InMemoryNotificationStore::new());
        let locations = Arc::new(InMemoryLocationStore::new());

        let booking_id = Uuid::new_v4();
        let driver_id = Uuid::new_v4();
        let vehicle_id = Uuid::new_v4();

        bookings
            .insert(Booking {
                id: booking_id,
                customer_name: Some("Aiko Tanaka".to_string()),
                customer_email: Some("aiko@example.com".to_string()),
                customer_phone: None,
                pickup: Some(GeoPoint::new(PICKUP.0, PICKUP.1)),
                dropoff: Some(GeoPoint::new(DROPOFF.0, DROPOFF.1)),
            })
            .await;
        fleet
            .add_driver(Driver {
                id: driver_id,
                first_name: "Ken".to_string(),
                last_name: "Sato".to_string(),
                phone: Some("+81-90-0000-0000".to_string()),
                is_available: true,
            })
            .await;
        fleet
            .add_vehicle(Vehicle {
                id: vehicle_id,
                name: "Alphard".to_string(),
                plate_number: "品川 300 あ 12-34".to_string(),
                is_available: true,
            })
            .await;
        devices
            .register(TrackingDevice {
                device_id: TRACKER.to_string(),
                vehicle_id: Some(vehicle_id),
                driver_id: Some(driver_id),
                is_active: true,
                last_seen: None,
                battery_level: None,
            })
            .await;

        let stores = DispatchStores {
            assignments: Arc::new(InMemoryAssignmentStore::new()),
            devices: devices.clone(),
            locations: locations.clone(),
            geofences: geofences.clone(),
            notifications: notifications.clone(),
            alerts: Arc::new(InMemoryAlertStore::new()),
            bookings: bookings.clone(),
            fleet,
        };

        let (geofence_tx, geofence_rx) = mpsc::channel(64);
        let (eta_tx, eta_rx) = mpsc::channel(64);

        let notifier = Arc::new(NotificationDispatcher::new(stores.notifications.clone()));
        let routes = Arc::new(RouteCalculator::new(
            Arc::new(FixedRoute),
            std::time::Duration::from_millis(500),
        ));
        let ingestion = Arc::new(
            IngestionService::new(devices, locations.clone(), 1.0, Duration::minutes(5))
                .with_geofence_queue(geofence_tx),
        );
        let manager = Arc::new(
            AssignmentManager::new(stores.clone(), notifier.clone(), routes, Duration::minutes(5))
                .with_eta_queue(eta_tx),
        );
        let emergency = Arc::new(EmergencyAlertHandler::new(
            stores.alerts.clone(),
            stores.assignments.clone(),
            notifier.clone(),
        ));

        workers::spawn_geofence_worker(
            geofence_rx,
            Arc::new(GeofenceEvaluator::new(geofences.clone())),
            manager.clone(),
        );
        workers::spawn_eta_worker(eta_rx, manager.clone());

        Self {
            stores,
            bookings,
            geofences,
            notifications,
            locations,
            ingestion,
            manager,
            emergency,
            notifier,
            booking_id,
            driver_id,
            vehicle_id,
        }
    }

    pub fn app_state(&self) -> Arc<AppState> {
        Arc::new(AppState {
            ingestion: self.ingestion.clone(),
            assignments: self.manager.clone(),
            alerts: self.emergency.clone(),
            notifications: self.notifier.clone(),
        })
    }

    pub async fn add_booking(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.bookings
            .insert(Booking {
                id,
                customer_name: None,
                customer_email: None,
                customer_phone: None,
                pickup: Some(GeoPoint::new(PICKUP.0, PICKUP.1)),
                dropoff: Some(GeoPoint::new(DROPOFF.0, DROPOFF.1)),
            })
            .await;
        id
    }

    pub async fn add_dropoff_zone(&self, assignment_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        self.geofences
            .upsert(GeofenceArea {
                id,
                name: "Haneda T3 curbside".to_string(),
                geofence_type: GeofenceType::DropoffZone,
                polygon: vec![
                    GeoPoint::new(DROPOFF.0 - 0.01, DROPOFF.1 - 0.01),
                    GeoPoint::new(DROPOFF.0 - 0.01, DROPOFF.1 + 0.01),
                    GeoPoint::new(DROPOFF.0 + 0.01, DROPOFF.1 + 0.01),
                    GeoPoint::new(DROPOFF.0 + 0.01, DROPOFF.1 - 0.01),
                ],
                is_active: true,
                assignment_id: Some(assignment_id),
            })
            .await;
        id
    }

    /// Polls until the assignment satisfies `predicate`, panicking after two seconds.
    pub async fn wait_for<F>(&self, assignment_id: Uuid, predicate: F) -> DispatchAssignment
    where
        F: Fn(&DispatchAssignment) -> bool,
    {
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
        loop {
            let assignment = self.manager.get(assignment_id).await.unwrap();
            if predicate(&assignment) {
                return assignment;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("timed out waiting on assignment {}: {:?}", assignment_id, assignment.status);
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}

pub fn report(tracker: &str, timestamp: i64, point: (f64, f64), speed: f64) -> LocationMessage {
    serde_json::from_value(serde_json::json!({
        "_type": "location",
        "tracker_id": tracker,
        "latitude": point.0,
        "longitude": point.1,
        "timestamp": timestamp,
        "speed": speed,
        "battery_level": 80
    }))
    .unwrap()
}
