//! Background side effects fed by bounded channels. Neither worker can block
//! the ingestion or transition path that feeds it.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::models::tracking::VehicleLocation;
use crate::processor::assignment_manager::AssignmentManager;
use crate::processor::geofence::{apply_geofence_event, GeofenceEvaluator};

pub fn spawn_geofence_worker(
    mut locations: mpsc::Receiver<VehicleLocation>,
    evaluator: Arc<GeofenceEvaluator>,
    manager: Arc<AssignmentManager>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Geofence worker started");
        while let Some(location) = locations.recv().await {
            match evaluator.evaluate(&location).await {
                Ok(events) => {
                    for event in &events {
                        info!(
                            geofence_id = %event.geofence_id,
                            geofence_type = %event.geofence_type,
                            kind = ?event.kind,
                            device_id = %event.device_id,
                            "Geofence event"
                        );
                        apply_geofence_event(&manager, event).await;
                    }
                }
                Err(e) => {
                    warn!(device_id = %location.device_id, error = %e, "Geofence evaluation failed");
                }
            }
        }
        info!("Geofence worker stopped");
    })
}

pub fn spawn_eta_worker(mut requests: mpsc::Receiver<Uuid>, manager: Arc<AssignmentManager>) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("ETA worker started");
        while let Some(assignment_id) = requests.recv().await {
            match manager.recompute_eta(assignment_id).await {
                Ok(assignment) => debug!(
                    assignment_id = %assignment_id,
                    eta = ?assignment.estimated_arrival,
                    "ETA refreshed"
                ),
                Err(DispatchError::RoutingUnavailable(reason)) => warn!(
                    assignment_id = %assignment_id,
                    reason = %reason,
                    "Routing unavailable, keeping previous estimate"
                ),
                Err(e) => warn!(assignment_id = %assignment_id, error = %e, "ETA refresh failed"),
            }
        }
        info!("ETA worker stopped");
    })
}
