use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::fleet::{BookingSummary, DriverSummary, VehicleSummary};
use crate::models::tracking::VehicleTracking;

/// Lifecycle of a dispatch assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Pending,
    Assigned,
    Confirmed,
    EnRoute,
    Arrived,
    InProgress,
    Completed,
    Cancelled,
}

impl DispatchStatus {
    pub const ALL: [DispatchStatus; 8] = [
        DispatchStatus::Pending,
        DispatchStatus::Assigned,
        DispatchStatus::Confirmed,
        DispatchStatus::EnRoute,
        DispatchStatus::Arrived,
        DispatchStatus::InProgress,
        DispatchStatus::Completed,
        DispatchStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchStatus::Pending => "pending",
            DispatchStatus::Assigned => "assigned",
            DispatchStatus::Confirmed => "confirmed",
            DispatchStatus::EnRoute => "en_route",
            DispatchStatus::Arrived => "arrived",
            DispatchStatus::InProgress => "in_progress",
            DispatchStatus::Completed => "completed",
            DispatchStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DispatchStatus::Completed | DispatchStatus::Cancelled)
    }

    /// Targets reachable from this status in one step.
    pub fn allowed_targets(&self) -> &'static [DispatchStatus] {
        use DispatchStatus::*;
        match self {
            Pending => &[Assigned, Cancelled],
            Assigned => &[Confirmed, Cancelled],
            Confirmed => &[EnRoute, Cancelled],
            EnRoute => &[Arrived, Cancelled],
            Arrived => &[InProgress, Cancelled],
            InProgress => &[Completed, Cancelled],
            Completed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, target: DispatchStatus) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// Driver and vehicle may only be (re)assigned before confirmation.
    pub fn allows_resource_change(&self) -> bool {
        matches!(self, DispatchStatus::Pending | DispatchStatus::Assigned)
    }
}

impl fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DispatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DispatchStatus::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown dispatch status '{}'", s))
    }
}

/// A coordinate with an optional human readable address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            address: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteSummary {
    pub polyline: String,
    #[serde(default)]
    pub steps: Vec<String>,
}

/// Route-derived fields, written separately from lifecycle state so a
/// background refresh never bumps `version`.
#[derive(Debug, Clone, PartialEq)]
pub struct EtaEstimate {
    pub distance_km: f64,
    pub estimated_duration_minutes: i32,
    pub estimated_arrival: DateTime<Utc>,
    pub route_summary: RouteSummary,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchAssignment {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub vehicle_id: Option<Uuid>,
    pub assigned_by: Option<Uuid>,
    pub status: DispatchStatus,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub arrived_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub actual_arrival: Option<DateTime<Utc>>,
    pub pickup_location: Option<GeoPoint>,
    pub dropoff_location: Option<GeoPoint>,
    pub route_summary: Option<RouteSummary>,
    pub distance_km: Option<f64>,
    pub estimated_duration_minutes: Option<i32>,
    pub actual_duration_minutes: Option<i32>,
    pub priority: i32,
    pub notes: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DispatchAssignment {
    pub fn new(booking_id: Uuid, priority: i32, notes: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            booking_id,
            driver_id: None,
            vehicle_id: None,
            assigned_by: None,
            status: DispatchStatus::Pending,
            assigned_at: None,
            started_at: None,
            arrived_at: None,
            completed_at: None,
            cancelled_at: None,
            estimated_arrival: None,
            actual_arrival: None,
            pickup_location: None,
            dropoff_location: None,
            route_summary: None,
            distance_km: None,
            estimated_duration_minutes: None,
            actual_duration_minutes: None,
            priority,
            notes,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    pub(crate) fn apply_estimate(&mut self, estimate: &EtaEstimate) {
        self.distance_km = Some(estimate.distance_km);
        self.estimated_duration_minutes = Some(estimate.estimated_duration_minutes);
        self.estimated_arrival = Some(estimate.estimated_arrival);
        self.route_summary = Some(estimate.route_summary.clone());
        self.updated_at = estimate.computed_at;
    }

    /// Lifecycle writes leave route-derived fields to `update_estimate`.
    pub(crate) fn keep_estimate_of(&mut self, stored: &DispatchAssignment) {
        self.distance_km = stored.distance_km;
        self.estimated_duration_minutes = stored.estimated_duration_minutes;
        self.estimated_arrival = stored.estimated_arrival;
        self.route_summary = stored.route_summary.clone();
    }

    /// Moves to `target` and stamps the lifecycle timestamp belonging to it.
    /// Legality is checked by the caller.
    pub(crate) fn stamp_transition(&mut self, target: DispatchStatus, at: DateTime<Utc>) {
        match target {
            DispatchStatus::Assigned => self.assigned_at = Some(at),
            DispatchStatus::EnRoute => self.started_at = Some(at),
            DispatchStatus::Arrived => {
                self.arrived_at = Some(at);
                self.actual_arrival = Some(at);
            }
            DispatchStatus::Completed => {
                self.completed_at = Some(at);
                if let Some(started) = self.started_at {
                    self.actual_duration_minutes = Some((at - started).num_minutes() as i32);
                }
            }
            DispatchStatus::Cancelled => self.cancelled_at = Some(at),
            DispatchStatus::Pending | DispatchStatus::Confirmed | DispatchStatus::InProgress => {}
        }
        self.status = target;
        self.updated_at = at;
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssignmentFilter {
    pub status: Option<DispatchStatus>,
    pub driver_id: Option<Uuid>,
    pub vehicle_id: Option<Uuid>,
    pub booking_id: Option<Uuid>,
}

impl AssignmentFilter {
    pub fn matches(&self, assignment: &DispatchAssignment) -> bool {
        self.status.map_or(true, |s| assignment.status == s)
            && self.driver_id.map_or(true, |d| assignment.driver_id == Some(d))
            && self.vehicle_id.map_or(true, |v| assignment.vehicle_id == Some(v))
            && self.booking_id.map_or(true, |b| assignment.booking_id == b)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchStats {
    pub total_assignments: usize,
    pub pending_assignments: usize,
    pub active_assignments: usize,
    pub completed_today: usize,
    pub online_vehicles: usize,
}

/// Read-side join of an assignment with its related records.
#[derive(Debug, Clone, Serialize)]
pub struct AssignmentView {
    pub assignment: DispatchAssignment,
    pub booking: Option<BookingSummary>,
    pub driver: Option<DriverSummary>,
    pub vehicle: Option<VehicleSummary>,
    pub tracking: Option<VehicleTracking>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use DispatchStatus::*;
        let legal = [
            (Pending, Assigned),
            (Pending, Cancelled),
            (Assigned, Confirmed),
            (Assigned, Cancelled),
            (Confirmed, EnRoute),
            (Confirmed, Cancelled),
            (EnRoute, Arrived),
            (EnRoute, Cancelled),
            (Arrived, InProgress),
            (Arrived, Cancelled),
            (InProgress, Completed),
            (InProgress, Cancelled),
        ];

        for from in DispatchStatus::ALL {
            for to in DispatchStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_terminal_statuses_have_no_targets() {
        assert!(DispatchStatus::Completed.allowed_targets().is_empty());
        assert!(DispatchStatus::Cancelled.allowed_targets().is_empty());
        assert!(!DispatchStatus::Pending.is_terminal());
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("en_route".parse::<DispatchStatus>(), Ok(DispatchStatus::EnRoute));
        assert!("EnRoute".parse::<DispatchStatus>().is_err());
        let json = serde_json::to_string(&DispatchStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }

    #[test]
    fn test_completion_records_actual_duration() {
        let mut assignment = DispatchAssignment::new(Uuid::new_v4(), 0, None);
        let start = Utc::now();
        assignment.stamp_transition(DispatchStatus::EnRoute, start);
        assignment.stamp_transition(
            DispatchStatus::Completed,
            start + chrono::Duration::minutes(42),
        );
        assert_eq!(assignment.actual_duration_minutes, Some(42));
        assert_eq!(assignment.status, DispatchStatus::Completed);
    }
}
