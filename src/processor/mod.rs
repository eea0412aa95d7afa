pub mod assignment_manager;
pub mod emergency;
pub mod eta;
pub mod geofence;
pub mod ingestion;
pub mod message_processor;
pub mod notifier;
pub mod workers;
