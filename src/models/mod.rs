pub mod alert;
pub mod assignment;
pub mod fleet;
pub mod geofence;
pub mod message;
pub mod notification;
pub mod tracking;
