use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::assignment::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeofenceType {
    PickupZone,
    DropoffZone,
    ServiceArea,
    Restricted,
}

impl GeofenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeofenceType::PickupZone => "pickup_zone",
            GeofenceType::DropoffZone => "dropoff_zone",
            GeofenceType::ServiceArea => "service_area",
            GeofenceType::Restricted => "restricted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pickup_zone" => Some(GeofenceType::PickupZone),
            "dropoff_zone" => Some(GeofenceType::DropoffZone),
            "service_area" => Some(GeofenceType::ServiceArea),
            "restricted" => Some(GeofenceType::Restricted),
            _ => None,
        }
    }
}

impl fmt::Display for GeofenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeofenceArea {
    pub id: Uuid,
    pub name: String,
    pub geofence_type: GeofenceType,
    /// Ordered vertices; the ring is closed implicitly.
    pub polygon: Vec<GeoPoint>,
    pub is_active: bool,
    pub assignment_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GeofenceEventKind {
    Enter,
    Exit,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeofenceEvent {
    pub kind: GeofenceEventKind,
    pub geofence_id: Uuid,
    pub geofence_type: GeofenceType,
    pub assignment_id: Option<Uuid>,
    pub vehicle_id: Option<Uuid>,
    pub device_id: String,
    pub occurred_at: DateTime<Utc>,
}
