use crate::models::message::LocationMessage;
use crate::processor::ingestion::{IngestOutcome, IngestionService};
use tracing::{debug, warn};

/// Decodes one tracker payload and feeds it to ingestion. Malformed payloads
/// and recoverable rejections are logged and dropped; only storage failures
/// are returned.
pub async fn process_message(ingestion: &IngestionService, payload: &[u8]) -> anyhow::Result<()> {
    let message: LocationMessage = match serde_json::from_slice(payload) {
        Ok(m) => m,
        Err(e) => {
            warn!("Failed to parse message: {}", e);
            return Ok(());
        }
    };

    let tracker_id = message.tracker_id.clone();
    match ingestion.ingest(message).await {
        Ok(IngestOutcome::Stored(_)) => Ok(()),
        Ok(IngestOutcome::Duplicate) => {
            debug!("Duplicate report from {}, skipping", tracker_id);
            Ok(())
        }
        Ok(IngestOutcome::Ignored(kind)) => {
            debug!("Ignored {:?} message from {}", kind, tracker_id);
            Ok(())
        }
        Err(e) if e.is_recoverable_ingest() => {
            warn!(device_id = %tracker_id, "Rejected location report: {}", e);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tracking::TrackingDevice;
    use crate::store::memory::{InMemoryDeviceStore, InMemoryLocationStore};
    use chrono::Duration;
    use std::sync::Arc;

    async fn ingestion() -> (IngestionService, Arc<InMemoryLocationStore>) {
        let devices = Arc::new(InMemoryDeviceStore::new());
        devices
            .register(TrackingDevice {
                device_id: "tracker-7".to_string(),
                vehicle_id: None,
                driver_id: None,
                is_active: true,
                last_seen: None,
                battery_level: None,
            })
            .await;
        let locations = Arc::new(InMemoryLocationStore::new());
        let service = IngestionService::new(devices, locations.clone(), 1.0, Duration::minutes(5));
        (service, locations)
    }

    #[tokio::test]
    async fn test_garbage_payload_is_dropped() {
        let (service, _) = ingestion().await;
        assert!(process_message(&service, b"{not json").await.is_ok());
    }

    #[tokio::test]
    async fn test_stale_and_unknown_reports_do_not_fail_the_consumer() {
        let (service, locations) = ingestion().await;
        let report = |tracker: &str, ts: i64| {
            format!(
                r#"{{"_type":"location","tracker_id":"{}","latitude":"19.43","longitude":"-99.13","timestamp":{}}}"#,
                tracker, ts
            )
        };

        process_message(&service, report("tracker-7", 200).as_bytes()).await.unwrap();
        process_message(&service, report("tracker-7", 100).as_bytes()).await.unwrap();
        process_message(&service, report("tracker-7", 200).as_bytes()).await.unwrap();
        process_message(&service, report("unknown", 300).as_bytes()).await.unwrap();

        assert_eq!(locations.count_for_device("tracker-7").await, 1);
    }
}
