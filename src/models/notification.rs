use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    StatusChange,
    Assignment,
    EmergencyAlert,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::StatusChange => "status_change",
            NotificationType::Assignment => "assignment",
            NotificationType::EmergencyAlert => "emergency_alert",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "status_change" => Some(NotificationType::StatusChange),
            "assignment" => Some(NotificationType::Assignment),
            "emergency_alert" => Some(NotificationType::EmergencyAlert),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Normal,
    High,
}

impl NotificationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationPriority::Normal => "normal",
            NotificationPriority::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(NotificationPriority::Normal),
            "high" => Some(NotificationPriority::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchNotification {
    pub id: Uuid,
    pub assignment_id: Option<Uuid>,
    pub alert_id: Option<Uuid>,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub priority: NotificationPriority,
    pub is_read: bool,
    /// `None` addresses the dispatch-wide channel.
    pub target_user: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
