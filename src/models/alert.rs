use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::assignment::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Panic,
    Breakdown,
    Accident,
    Medical,
    Other,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Panic => "panic",
            AlertType::Breakdown => "breakdown",
            AlertType::Accident => "accident",
            AlertType::Medical => "medical",
            AlertType::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "panic" => Some(AlertType::Panic),
            "breakdown" => Some(AlertType::Breakdown),
            "accident" => Some(AlertType::Accident),
            "medical" => Some(AlertType::Medical),
            "other" => Some(AlertType::Other),
            _ => None,
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyAlert {
    pub id: Uuid,
    pub alert_type: AlertType,
    pub location: Option<GeoPoint>,
    pub assignment_id: Option<Uuid>,
    pub vehicle_id: Option<Uuid>,
    pub driver_id: Option<Uuid>,
    pub message: Option<String>,
    pub is_resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
