use thiserror::Error;
use uuid::Uuid;

use crate::models::assignment::DispatchStatus;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Unknown or inactive tracking device: {0}")]
    UnknownDevice(String),

    #[error("Stale report for device {device_id}: {timestamp} is older than {latest}")]
    StaleReport {
        device_id: String,
        timestamp: i64,
        latest: i64,
    },

    #[error("Invalid location report: {0}")]
    InvalidReport(String),

    #[error("Illegal transition for assignment {assignment_id}: {from} -> {to}")]
    IllegalTransition {
        assignment_id: Uuid,
        from: DispatchStatus,
        to: DispatchStatus,
    },

    #[error("Assignment {assignment_id} is locked in status {status}")]
    AssignmentLocked {
        assignment_id: Uuid,
        status: DispatchStatus,
    },

    #[error("Booking {0} already has an active assignment")]
    DuplicateAssignment(Uuid),

    #[error("{resource} {id} is already held by active assignment {holder}")]
    ResourceBusy {
        resource: &'static str,
        id: Uuid,
        holder: Uuid,
    },

    #[error("{resource} {id} is not available for dispatch")]
    ResourceUnavailable { resource: &'static str, id: Uuid },

    #[error("Concurrent modification of assignment {assignment_id}: expected version {expected_version}")]
    Conflict {
        assignment_id: Uuid,
        expected_version: i64,
    },

    #[error("Invalid assignment request: {0}")]
    InvalidAssignment(String),

    #[error("Routing provider unavailable: {0}")]
    RoutingUnavailable(String),

    #[error("Assignment not found: {0}")]
    AssignmentNotFound(Uuid),

    #[error("Booking not found: {0}")]
    BookingNotFound(Uuid),

    #[error("Driver not found: {0}")]
    DriverNotFound(Uuid),

    #[error("Vehicle not found: {0}")]
    VehicleNotFound(Uuid),

    #[error("Emergency alert not found: {0}")]
    AlertNotFound(Uuid),

    #[error("Emergency alert already resolved: {0}")]
    AlertAlreadyResolved(Uuid),

    #[error("Notification not found: {0}")]
    NotificationNotFound(Uuid),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl DispatchError {
    /// Ingestion rejections that are dropped for the single message and never
    /// surfaced as a service failure.
    pub fn is_recoverable_ingest(&self) -> bool {
        matches!(
            self,
            DispatchError::UnknownDevice(_)
                | DispatchError::StaleReport { .. }
                | DispatchError::InvalidReport(_)
        )
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;
