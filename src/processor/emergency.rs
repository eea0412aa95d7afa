use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{DispatchError, DispatchResult};
use crate::models::alert::{AlertType, EmergencyAlert};
use crate::models::assignment::GeoPoint;
use crate::processor::notifier::NotificationDispatcher;
use crate::store::{AlertStore, AssignmentStore};

#[derive(Debug, Clone, Deserialize)]
pub struct RaiseAlert {
    pub alert_type: AlertType,
    pub location: Option<GeoPoint>,
    pub assignment_id: Option<Uuid>,
    pub vehicle_id: Option<Uuid>,
    pub driver_id: Option<Uuid>,
    pub message: Option<String>,
}

/// Records emergency alerts. Never changes assignment status; resolution is
/// an explicit operator action.
pub struct EmergencyAlertHandler {
    alerts: Arc<dyn AlertStore>,
    assignments: Arc<dyn AssignmentStore>,
    notifier: Arc<NotificationDispatcher>,
}

impl EmergencyAlertHandler {
    pub fn new(
        alerts: Arc<dyn AlertStore>,
        assignments: Arc<dyn AssignmentStore>,
        notifier: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            alerts,
            assignments,
            notifier,
        }
    }

    pub async fn raise(&self, request: RaiseAlert) -> DispatchResult<EmergencyAlert> {
        // Fill in vehicle/driver from the assignment when the signal only names the job.
        // A failed lookup must not stop the alert from being recorded.
        let (mut vehicle_id, mut driver_id, mut operator) = (request.vehicle_id, request.driver_id, None);
        if let Some(assignment_id) = request.assignment_id {
            match self.assignments.get(assignment_id).await {
                Ok(Some(assignment)) => {
                    vehicle_id = vehicle_id.or(assignment.vehicle_id);
                    driver_id = driver_id.or(assignment.driver_id);
                    operator = assignment.assigned_by;
                }
                Ok(None) => {}
                Err(e) => warn!(
                    assignment_id = %assignment_id,
                    error = %e,
                    "Assignment lookup failed, recording alert with caller-supplied ids"
                ),
            }
        }

        let alert = EmergencyAlert {
            id: Uuid::new_v4(),
            alert_type: request.alert_type,
            location: request.location,
            assignment_id: request.assignment_id,
            vehicle_id,
            driver_id,
            message: request.message,
            is_resolved: false,
            resolved_at: None,
            resolved_by: None,
            created_at: Utc::now(),
        };

        if let Err(e) = self.alerts.insert(&alert).await {
            error!(
                alert_type = %alert.alert_type,
                assignment_id = ?alert.assignment_id,
                error = %e,
                "Failed to record emergency alert"
            );
            return Err(e);
        }

        info!(
            alert_id = %alert.id,
            alert_type = %alert.alert_type,
            assignment_id = ?alert.assignment_id,
            vehicle_id = ?alert.vehicle_id,
            "Emergency alert raised"
        );
        self.notifier.alert_raised(&alert, operator).await;
        Ok(alert)
    }

    pub async fn resolve(&self, alert_id: Uuid, resolver: Uuid) -> DispatchResult<EmergencyAlert> {
        match self.alerts.resolve(alert_id, resolver, Utc::now()).await? {
            Some(alert) => {
                info!(alert_id = %alert_id, resolver = %resolver, "Emergency alert resolved");
                Ok(alert)
            }
            None => Err(DispatchError::AlertAlreadyResolved(alert_id)),
        }
    }

    pub async fn list_unresolved(&self) -> DispatchResult<Vec<EmergencyAlert>> {
        self.alerts.list_unresolved().await
    }
}
