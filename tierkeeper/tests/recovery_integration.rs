//! Integration tests for restarting a two-level deployment.
//!
//! Unfinished requests are persisted; a new service over the same request
//! store picks them up again.

mod common;

use std::time::Duration;

use common::*;
use tierkeeper::model::{EntityKey, RequestedState};
use tierkeeper::selection::SelectionQuery;
use tierkeeper::storage::Storage;
use tokio_util::sync::CancellationToken;

fn dataset_query() -> SelectionQuery {
    SelectionQuery::new().with_datasets("1")
}

async fn archived_deployment() -> Deployment {
    let d = Deployment::two_level(Duration::ZERO);
    d.put("a.dat", "alpha");
    settle(d.fsm()).await;
    d.service.archive(ALICE, &dataset_query()).unwrap();
    settle(d.fsm()).await;
    assert!(!d.main.exists("inv1/ds1").unwrap());
    d
}

#[tokio::test]
async fn test_restore_survives_restart() {
    let d = archived_deployment().await;
    d.service.restore(ALICE, &dataset_query()).unwrap();

    let restarted = d.reopen(config(Duration::ZERO));
    let fsm = restarted.fsm().unwrap();
    assert_eq!(fsm.recover().unwrap(), 1);
    assert_eq!(
        fsm.queued(EntityKey::Dataset(1)).map(|e| e.state),
        Some(RequestedState::Restore)
    );

    assert_eq!(settle(fsm).await, 1);
    assert!(d.main.exists("inv1/ds1/a.dat").unwrap());
}

#[tokio::test]
async fn test_prepared_request_survives_restart() {
    let d = archived_deployment().await;
    let id = d
        .service
        .prepare_data(ALICE, &dataset_query(), false, false)
        .unwrap();

    let restarted = d.reopen(config(Duration::ZERO));
    assert!(!restarted.is_prepared(&id).unwrap());

    let fsm = restarted.fsm().unwrap();
    assert_eq!(fsm.recover().unwrap(), 1);
    settle(fsm).await;

    assert!(restarted.is_prepared(&id).unwrap());
}

#[tokio::test]
async fn test_finished_requests_are_not_replayed() {
    let d = archived_deployment().await;

    let restarted = d.reopen(config(Duration::ZERO));
    assert_eq!(restarted.fsm().unwrap().recover().unwrap(), 0);
}

#[tokio::test]
async fn test_started_service_dispatches_recovered_work() {
    let d = archived_deployment().await;
    d.service.restore(ALICE, &dataset_query()).unwrap();

    let config = tierkeeper::service::ServiceConfig::builder()
        .fsm(
            tierkeeper::fsm::FsmConfig::default()
                .with_write_delay(Duration::ZERO)
                .with_process_interval(Duration::from_millis(20)),
        )
        .build();
    let restarted = d.reopen(config);
    let shutdown = CancellationToken::new();
    let handles = restarted.start(shutdown.clone()).unwrap();
    assert_eq!(handles.len(), 2);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !d.main.exists("inv1/ds1/a.dat").unwrap() {
        assert!(tokio::time::Instant::now() < deadline, "restore never ran");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    shutdown.cancel();
    for handle in handles {
        handle.await.unwrap();
    }
}
