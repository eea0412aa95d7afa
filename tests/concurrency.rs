mod common;

use common::*;
use siscom_dispatch::error::DispatchError;
use siscom_dispatch::models::assignment::DispatchStatus;
use siscom_dispatch::processor::assignment_manager::AssignRequest;
use siscom_dispatch::store::NotificationStore;
use uuid::Uuid;

async fn confirmed_assignment(h: &Harness) -> Uuid {
    let created = h.manager.create(h.booking_id, 0, None).await.unwrap();
    h.manager
        .assign(
            created.id,
            AssignRequest {
                driver_id: Some(h.driver_id),
                vehicle_id: Some(h.vehicle_id),
                assigned_by: Some(Uuid::new_v4()),
            },
        )
        .await
        .unwrap();
    h.manager
        .transition(created.id, DispatchStatus::Assigned, DispatchStatus::Confirmed)
        .await
        .unwrap();
    created.id
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_transitions_from_confirmed() {
    for _ in 0..10 {
        let h = Harness::start().await;
        let id = confirmed_assignment(&h).await;

        let start = h.manager.clone();
        let cancel = h.manager.clone();
        let (started, cancelled) = tokio::join!(
            tokio::spawn(async move {
                start
                    .transition(id, DispatchStatus::Confirmed, DispatchStatus::EnRoute)
                    .await
            }),
            tokio::spawn(async move {
                cancel
                    .transition(id, DispatchStatus::Confirmed, DispatchStatus::Cancelled)
                    .await
            }),
        );
        let outcomes = [started.unwrap(), cancelled.unwrap()];

        let winners: Vec<_> = outcomes.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1, "exactly one transition wins: {:?}", outcomes);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(DispatchError::Conflict { assignment_id, .. }) if *assignment_id == id)));

        let stored = h.manager.get(id).await.unwrap();
        assert_eq!(stored.status, winners[0].status);

        // assigned + confirmed + the single winner
        let sent = h.notifications.list_for_assignment(id).await.unwrap();
        assert_eq!(sent.len(), 3);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_assignments_for_one_vehicle() {
    let h = Harness::start().await;
    let first = h.manager.create(h.booking_id, 0, None).await.unwrap();
    let second = h.manager.create(h.add_booking().await, 0, None).await.unwrap();

    let vehicle_id = h.vehicle_id;
    let (a, b) = (h.manager.clone(), h.manager.clone());
    let (r1, r2) = tokio::join!(
        tokio::spawn(async move {
            a.assign(
                first.id,
                AssignRequest {
                    vehicle_id: Some(vehicle_id),
                    ..Default::default()
                },
            )
            .await
        }),
        tokio::spawn(async move {
            b.assign(
                second.id,
                AssignRequest {
                    vehicle_id: Some(vehicle_id),
                    ..Default::default()
                },
            )
            .await
        }),
    );
    let outcomes = [r1.unwrap(), r2.unwrap()];

    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes.iter().any(|r| matches!(
        r,
        Err(DispatchError::ResourceBusy { resource: "vehicle", .. })
    )));
}
