mod common;

use common::*;
use siscom_dispatch::error::DispatchError;
use siscom_dispatch::processor::ingestion::IngestOutcome;
use siscom_dispatch::store::LocationStore;

#[tokio::test]
async fn test_replayed_report_is_stored_once() {
    let h = Harness::start().await;

    let first = h.ingestion.ingest(report(TRACKER, 1_700_000_000, PICKUP, 9.0)).await.unwrap();
    assert!(matches!(first, IngestOutcome::Stored(_)));

    for _ in 0..3 {
        let replay = h.ingestion.ingest(report(TRACKER, 1_700_000_000, PICKUP, 9.0)).await.unwrap();
        assert!(matches!(replay, IngestOutcome::Duplicate));
    }

    assert_eq!(h.locations.count_for_device(TRACKER).await, 1);
}

#[tokio::test]
async fn test_stale_report_keeps_last_known_location() {
    let h = Harness::start().await;

    h.ingestion.ingest(report(TRACKER, 1_700_000_100, DROPOFF, 12.0)).await.unwrap();
    let stale = h.ingestion.ingest(report(TRACKER, 1_700_000_050, PICKUP, 12.0)).await;
    match stale {
        Err(DispatchError::StaleReport { timestamp, latest, .. }) => {
            assert_eq!(timestamp, 1_700_000_050);
            assert_eq!(latest, 1_700_000_100);
        }
        other => panic!("expected StaleReport, got {:?}", other),
    }

    let latest = h.locations.latest_for_vehicle(h.vehicle_id).await.unwrap().unwrap();
    assert_eq!((latest.latitude, latest.longitude), DROPOFF);
    assert_eq!(h.locations.count_for_device(TRACKER).await, 1);

    let tracking = h.ingestion.tracking(h.vehicle_id).await.unwrap().unwrap();
    assert_eq!(tracking.current_location.timestamp.timestamp(), 1_700_000_100);
}

#[tokio::test]
async fn test_concurrent_reports_from_one_device_stay_ordered() {
    let h = Harness::start().await;

    let mut tasks = Vec::new();
    for offset in 0..20i64 {
        let ingestion = h.ingestion.clone();
        tasks.push(tokio::spawn(async move {
            ingestion
                .ingest(report(TRACKER, 1_700_000_000 + offset, PICKUP, 5.0))
                .await
        }));
    }

    let mut stored = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(IngestOutcome::Stored(_)) => stored += 1,
            Err(DispatchError::StaleReport { .. }) => {}
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    // Whatever the interleaving, nothing was stored twice and the projection
    // points at the newest accepted report.
    let history = h.locations.history(TRACKER, 100).await.unwrap();
    assert!(stored >= 1);
    assert_eq!(history.len(), stored);
    assert!(history.windows(2).all(|w| w[0].timestamp > w[1].timestamp));
    let latest = h.locations.latest_for_device(TRACKER).await.unwrap().unwrap();
    assert_eq!(latest.timestamp, history[0].timestamp);
}
