//! Dispatch state machine.
//!
//! Every mutation follows the same shape: read the current record, validate
//! against the transition table, then commit with a compare-and-swap on
//! `version` and prior status. A lost race surfaces as `Conflict` and the
//! caller decides whether to retry with fresh state. ETA refreshes write
//! route fields on their own path and never move `version`.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DispatchError, DispatchResult};
use crate::models::assignment::{
    AssignmentFilter, AssignmentView, DispatchAssignment, DispatchStats, DispatchStatus, EtaEstimate,
    GeoPoint, RouteSummary,
};
use crate::models::fleet::{BookingSummary, DriverSummary, VehicleSummary};
use crate::processor::eta::RouteCalculator;
use crate::processor::ingestion::load_vehicle_tracking;
use crate::processor::notifier::NotificationDispatcher;
use crate::store::DispatchStores;

const ETA_UPDATE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssignRequest {
    pub driver_id: Option<Uuid>,
    pub vehicle_id: Option<Uuid>,
    pub assigned_by: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkAssignItem {
    pub assignment_id: Uuid,
    #[serde(flatten)]
    pub request: AssignRequest,
}

/// Per-item result of `bulk_assign`; one failure never rolls back the others.
#[derive(Debug, Serialize)]
pub struct BulkAssignOutcome {
    pub assignment_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignment: Option<DispatchAssignment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub failure: Option<DispatchError>,
}

impl BulkAssignOutcome {
    pub fn is_ok(&self) -> bool {
        self.failure.is_none()
    }
}

pub struct AssignmentManager {
    stores: DispatchStores,
    notifier: Arc<NotificationDispatcher>,
    routes: Arc<RouteCalculator>,
    eta_queue: Option<mpsc::Sender<Uuid>>,
    online_window: Duration,
}

impl AssignmentManager {
    pub fn new(
        stores: DispatchStores,
        notifier: Arc<NotificationDispatcher>,
        routes: Arc<RouteCalculator>,
        online_window: Duration,
    ) -> Self {
        Self {
            stores,
            notifier,
            routes,
            eta_queue: None,
            online_window,
        }
    }

    /// Assignments entering `confirmed` or `en_route` are queued here for ETA refresh.
    pub fn with_eta_queue(mut self, queue: mpsc::Sender<Uuid>) -> Self {
        self.eta_queue = Some(queue);
        self
    }

    pub async fn create(
        &self,
        booking_id: Uuid,
        priority: i32,
        notes: Option<String>,
    ) -> DispatchResult<DispatchAssignment> {
        let booking = self
            .stores
            .bookings
            .get_booking(booking_id)
            .await?
            .ok_or(DispatchError::BookingNotFound(booking_id))?;

        let mut assignment = DispatchAssignment::new(booking_id, priority, notes);
        assignment.pickup_location = booking.pickup;
        assignment.dropoff_location = booking.dropoff;

        self.stores.assignments.insert(&assignment).await?;

        info!(
            assignment_id = %assignment.id,
            booking_id = %booking_id,
            priority,
            "Created dispatch assignment"
        );
        Ok(assignment)
    }

    pub async fn assign(&self, assignment_id: Uuid, request: AssignRequest) -> DispatchResult<DispatchAssignment> {
        if request.driver_id.is_none() && request.vehicle_id.is_none() {
            return Err(DispatchError::InvalidAssignment(
                "a driver or a vehicle is required".to_string(),
            ));
        }

        let current = self.load(assignment_id).await?;
        if !current.status.allows_resource_change() {
            return Err(DispatchError::AssignmentLocked {
                assignment_id,
                status: current.status,
            });
        }

        if let Some(driver_id) = request.driver_id.filter(|d| current.driver_id != Some(*d)) {
            let driver = self
                .stores
                .fleet
                .get_driver(driver_id)
                .await?
                .ok_or(DispatchError::DriverNotFound(driver_id))?;
            if !driver.is_available {
                return Err(DispatchError::ResourceUnavailable {
                    resource: "driver",
                    id: driver_id,
                });
            }
        }
        if let Some(vehicle_id) = request.vehicle_id.filter(|v| current.vehicle_id != Some(*v)) {
            let vehicle = self
                .stores
                .fleet
                .get_vehicle(vehicle_id)
                .await?
                .ok_or(DispatchError::VehicleNotFound(vehicle_id))?;
            if !vehicle.is_available {
                return Err(DispatchError::ResourceUnavailable {
                    resource: "vehicle",
                    id: vehicle_id,
                });
            }
        }

        let mut next = current.clone();
        if request.driver_id.is_some() {
            next.driver_id = request.driver_id;
        }
        if request.vehicle_id.is_some() {
            next.vehicle_id = request.vehicle_id;
        }
        if request.assigned_by.is_some() {
            next.assigned_by = request.assigned_by;
        }
        next.stamp_transition(DispatchStatus::Assigned, Utc::now());

        let stored = self.stores.assignments.update(&next, current.status).await?;

        info!(
            assignment_id = %assignment_id,
            driver_id = ?stored.driver_id,
            vehicle_id = ?stored.vehicle_id,
            reassigned = current.status == DispatchStatus::Assigned,
            "Assigned resources"
        );
        self.notifier
            .assignment_transitioned(&stored, current.status)
            .await;
        Ok(stored)
    }

    /// Assigns several assignments in one call. Items run in order and each
    /// gets its own result, so a busy driver fails only its own item.
    pub async fn bulk_assign(&self, items: Vec<BulkAssignItem>) -> Vec<BulkAssignOutcome> {
        let mut outcomes = Vec::with_capacity(items.len());
        for item in items {
            let assignment_id = item.assignment_id;
            let outcome = match self.assign(assignment_id, item.request).await {
                Ok(stored) => BulkAssignOutcome {
                    assignment_id,
                    assignment: Some(stored),
                    error: None,
                    failure: None,
                },
                Err(e) => {
                    warn!(assignment_id = %assignment_id, error = %e, "Bulk assignment item failed");
                    BulkAssignOutcome {
                        assignment_id,
                        assignment: None,
                        error: Some(e.to_string()),
                        failure: Some(e),
                    }
                }
            };
            outcomes.push(outcome);
        }
        info!(
            items = outcomes.len(),
            failed = outcomes.iter().filter(|o| !o.is_ok()).count(),
            "Bulk assignment finished"
        );
        outcomes
    }

    /// Moves the assignment from `expected` to `target`. `expected` is the
    /// status the caller last observed; if the stored status differs the call
    /// fails with `Conflict` and nothing is written.
    pub async fn transition(
        &self,
        assignment_id: Uuid,
        expected: DispatchStatus,
        target: DispatchStatus,
    ) -> DispatchResult<DispatchAssignment> {
        let current = self.load(assignment_id).await?;
        if current.status != expected {
            return Err(DispatchError::Conflict {
                assignment_id,
                expected_version: current.version,
            });
        }
        self.apply_transition(current, target).await
    }

    async fn apply_transition(
        &self,
        current: DispatchAssignment,
        target: DispatchStatus,
    ) -> DispatchResult<DispatchAssignment> {
        if !current.status.can_transition_to(target) {
            return Err(DispatchError::IllegalTransition {
                assignment_id: current.id,
                from: current.status,
                to: target,
            });
        }
        if target == DispatchStatus::Assigned
            && current.driver_id.is_none()
            && current.vehicle_id.is_none()
        {
            return Err(DispatchError::InvalidAssignment(
                "assign a driver or a vehicle before moving to assigned".to_string(),
            ));
        }

        let mut next = current.clone();
        next.stamp_transition(target, Utc::now());
        let stored = self.stores.assignments.update(&next, current.status).await?;

        info!(
            assignment_id = %stored.id,
            from = %current.status,
            to = %stored.status,
            "Assignment transitioned"
        );
        self.notifier
            .assignment_transitioned(&stored, current.status)
            .await;

        if matches!(target, DispatchStatus::Confirmed | DispatchStatus::EnRoute) {
            self.queue_eta(stored.id);
        }
        Ok(stored)
    }

    /// Refreshes distance, duration and ETA. Status is never touched and a
    /// routing failure leaves the previous estimates in place.
    pub async fn recompute_eta(&self, assignment_id: Uuid) -> DispatchResult<DispatchAssignment> {
        let current = self.load(assignment_id).await?;
        if current.status.is_terminal() {
            debug!(assignment_id = %assignment_id, "Skipping ETA for terminal assignment");
            return Ok(current);
        }

        let destination = current.dropoff_location.clone().ok_or_else(|| {
            DispatchError::InvalidAssignment("assignment has no dropoff location".to_string())
        })?;
        let origin = self.route_origin(&current).await?.ok_or_else(|| {
            DispatchError::InvalidAssignment("no pickup or vehicle position to route from".to_string())
        })?;

        let route = self.routes.calculate(&origin, &destination).await?;
        let now = Utc::now();
        let estimate = EtaEstimate {
            distance_km: route.distance_km,
            estimated_duration_minutes: route.duration_minutes.round() as i32,
            estimated_arrival: now + Duration::seconds((route.duration_minutes * 60.0).round() as i64),
            route_summary: RouteSummary {
                polyline: route.polyline,
                steps: route.steps,
            },
            computed_at: now,
        };

        let mut status = current.status;
        for attempt in 1..=ETA_UPDATE_ATTEMPTS {
            if let Some(stored) = self
                .stores
                .assignments
                .update_estimate(assignment_id, status, &estimate)
                .await?
            {
                info!(
                    assignment_id = %assignment_id,
                    distance_km = estimate.distance_km,
                    eta = %estimate.estimated_arrival,
                    "ETA recomputed"
                );
                return Ok(stored);
            }

            let latest = self.load(assignment_id).await?;
            if latest.status.is_terminal() || attempt == ETA_UPDATE_ATTEMPTS {
                debug!(assignment_id = %assignment_id, status = %latest.status, "Dropping ETA for moved assignment");
                return Ok(latest);
            }
            debug!(assignment_id = %assignment_id, attempt, "Status moved during ETA, retrying");
            status = latest.status;
        }
        self.load(assignment_id).await
    }

    async fn route_origin(&self, assignment: &DispatchAssignment) -> DispatchResult<Option<GeoPoint>> {
        if assignment.status == DispatchStatus::EnRoute {
            if let Some(vehicle_id) = assignment.vehicle_id {
                if let Some(location) = self.stores.locations.latest_for_vehicle(vehicle_id).await? {
                    return Ok(Some(GeoPoint::new(location.latitude, location.longitude)));
                }
            }
        }
        Ok(assignment.pickup_location.clone())
    }

    pub async fn get(&self, assignment_id: Uuid) -> DispatchResult<DispatchAssignment> {
        self.load(assignment_id).await
    }

    pub async fn list(&self, filter: &AssignmentFilter) -> DispatchResult<Vec<DispatchAssignment>> {
        self.stores.assignments.list(filter).await
    }

    /// Read-side join: the write-side record stays normalized.
    pub async fn view(&self, assignment_id: Uuid) -> DispatchResult<AssignmentView> {
        let assignment = self.load(assignment_id).await?;

        let booking = self
            .stores
            .bookings
            .get_booking(assignment.booking_id)
            .await?
            .as_ref()
            .map(BookingSummary::from);

        let driver = match assignment.driver_id {
            Some(id) => self.stores.fleet.get_driver(id).await?.as_ref().map(DriverSummary::from),
            None => None,
        };

        let (vehicle, tracking) = match assignment.vehicle_id {
            Some(id) => (
                self.stores.fleet.get_vehicle(id).await?.as_ref().map(VehicleSummary::from),
                load_vehicle_tracking(
                    self.stores.locations.as_ref(),
                    self.stores.devices.as_ref(),
                    id,
                    self.online_window,
                )
                .await?,
            ),
            None => (None, None),
        };

        Ok(AssignmentView {
            assignment,
            booking,
            driver,
            vehicle,
            tracking,
        })
    }

    pub async fn stats(&self) -> DispatchResult<DispatchStats> {
        let assignments = self.stores.assignments.list(&AssignmentFilter::default()).await?;
        let now = Utc::now();
        let today = now.date_naive();

        let online_vehicles = self
            .stores
            .devices
            .list_devices()
            .await?
            .iter()
            .filter(|d| d.vehicle_id.is_some() && d.is_online(now, self.online_window))
            .count();

        Ok(DispatchStats {
            total_assignments: assignments.len(),
            pending_assignments: assignments
                .iter()
                .filter(|a| a.status == DispatchStatus::Pending)
                .count(),
            active_assignments: assignments
                .iter()
                .filter(|a| a.is_active() && a.status != DispatchStatus::Pending)
                .count(),
            completed_today: assignments
                .iter()
                .filter(|a| {
                    a.status == DispatchStatus::Completed
                        && a.completed_at.map_or(false, |t| t.date_naive() == today)
                })
                .count(),
            online_vehicles,
        })
    }

    async fn load(&self, assignment_id: Uuid) -> DispatchResult<DispatchAssignment> {
        self.stores
            .assignments
            .get(assignment_id)
            .await?
            .ok_or(DispatchError::AssignmentNotFound(assignment_id))
    }

    fn queue_eta(&self, assignment_id: Uuid) {
        if let Some(queue) = &self.eta_queue {
            if let Err(e) = queue.try_send(assignment_id) {
                warn!(assignment_id = %assignment_id, error = %e, "Could not queue ETA recompute");
            }
        }
    }
}
