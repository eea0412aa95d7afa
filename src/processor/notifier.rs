use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{DispatchError, DispatchResult};
use crate::models::alert::EmergencyAlert;
use crate::models::assignment::{DispatchAssignment, DispatchStatus};
use crate::models::notification::{DispatchNotification, NotificationPriority, NotificationType};
use crate::store::NotificationStore;

/// Turns assignment transitions and emergency alerts into notification
/// records. Writes are fire-and-forget: failures are logged, never returned.
pub struct NotificationDispatcher {
    store: Arc<dyn NotificationStore>,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self { store }
    }

    pub async fn assignment_transitioned(
        &self,
        assignment: &DispatchAssignment,
        from: DispatchStatus,
    ) -> usize {
        let notifications = transition_notifications(assignment, from);
        self.deliver(notifications).await
    }

    pub async fn alert_raised(&self, alert: &EmergencyAlert, operator: Option<Uuid>) -> usize {
        let notifications = vec![alert_notification(alert, operator)];
        self.deliver(notifications).await
    }

    pub async fn mark_read(&self, notification_id: Uuid) -> DispatchResult<()> {
        if self.store.mark_read(notification_id).await? {
            Ok(())
        } else {
            Err(DispatchError::NotificationNotFound(notification_id))
        }
    }

    pub async fn list_for_user(
        &self,
        user_id: Option<Uuid>,
        unread_only: bool,
    ) -> DispatchResult<Vec<DispatchNotification>> {
        self.store.list_for_user(user_id, unread_only).await
    }

    async fn deliver(&self, notifications: Vec<DispatchNotification>) -> usize {
        let mut delivered = 0;
        for notification in notifications {
            match self.store.insert(&notification).await {
                Ok(()) => {
                    debug!(
                        notification_id = %notification.id,
                        kind = notification.notification_type.as_str(),
                        "Notification recorded"
                    );
                    delivered += 1;
                }
                Err(e) => {
                    warn!(
                        assignment_id = ?notification.assignment_id,
                        alert_id = ?notification.alert_id,
                        error = %e,
                        "Failed to record notification"
                    );
                }
            }
        }
        delivered
    }
}

fn transition_notifications(
    assignment: &DispatchAssignment,
    from: DispatchStatus,
) -> Vec<DispatchNotification> {
    let to = assignment.status;
    let (notification_type, title, message) = match to {
        DispatchStatus::Assigned => (
            NotificationType::Assignment,
            "Assignment dispatched".to_string(),
            format!(
                "Booking {} was assigned (driver: {}, vehicle: {})",
                assignment.booking_id,
                display_id(assignment.driver_id),
                display_id(assignment.vehicle_id)
            ),
        ),
        DispatchStatus::Cancelled => (
            NotificationType::StatusChange,
            "Assignment cancelled".to_string(),
            format!(
                "Assignment for booking {} was cancelled while {}",
                assignment.booking_id, from
            ),
        ),
        _ => (
            NotificationType::StatusChange,
            format!("Assignment {}", to.as_str().replace('_', " ")),
            format!(
                "Assignment for booking {} moved from {} to {}",
                assignment.booking_id, from, to
            ),
        ),
    };

    vec![DispatchNotification {
        id: Uuid::new_v4(),
        assignment_id: Some(assignment.id),
        alert_id: None,
        notification_type,
        title,
        message,
        priority: NotificationPriority::Normal,
        is_read: false,
        target_user: assignment.assigned_by,
        created_at: Utc::now(),
    }]
}

fn alert_notification(alert: &EmergencyAlert, operator: Option<Uuid>) -> DispatchNotification {
    let mut message = format!("{} alert raised", alert.alert_type);
    if let Some(vehicle_id) = alert.vehicle_id {
        message.push_str(&format!(" for vehicle {}", vehicle_id));
    }
    if let Some(location) = &alert.location {
        message.push_str(&format!(" at ({:.5}, {:.5})", location.lat, location.lng));
    }
    if let Some(text) = &alert.message {
        message.push_str(": ");
        message.push_str(text);
    }

    DispatchNotification {
        id: Uuid::new_v4(),
        assignment_id: alert.assignment_id,
        alert_id: Some(alert.id),
        notification_type: NotificationType::EmergencyAlert,
        title: format!("EMERGENCY: {}", alert.alert_type.as_str().to_uppercase()),
        message,
        priority: NotificationPriority::High,
        is_read: false,
        target_user: operator,
        created_at: Utc::now(),
    }
}

fn display_id(id: Option<Uuid>) -> String {
    id.map_or_else(|| "none".to_string(), |id| id.to_string())
}
