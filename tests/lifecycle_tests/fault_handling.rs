//! Stories about failures the controller has to ride out or surface

use std::sync::Arc;
use std::time::Duration;

use s3control_operator::config::ControllerConfig;
use s3control_operator::crd::AccessPointPhase;
use s3control_operator::gateway::memory::{GatewayCall, MemoryGateway};
use s3control_operator::gateway::{AccessPointGateway, GatewayError, ProvisioningStatus};
use s3control_operator::status::{condition_types, find_condition, is_condition_true, reasons};

use super::helpers::*;

// =============================================================================
// Story: transient failures during deletion
// =============================================================================

#[tokio::test]
async fn story_throttled_delete_finishes_on_second_attempt() {
    let gateway = Arc::new(MemoryGateway::new());
    let controller = start(&gateway, fast_config());
    let key = record_key("ap-test-1");

    controller.apply(access_point("ap-test-1")).await.unwrap();
    controller
        .wait_for_phase(&key, AccessPointPhase::Synced, WAIT)
        .await
        .unwrap();

    gateway.inject_fault(GatewayCall::Delete, GatewayError::Throttled);
    controller.request_delete(&key).await.unwrap();
    controller.wait_for_removal(&key, WAIT).await.unwrap();

    assert_eq!(gateway.call_count(GatewayCall::Delete), 2);
    assert!(!gateway.exists(&ap_key("ap-test-1")));
    controller.shutdown().await;
}

#[tokio::test]
async fn story_delete_keeps_retrying_past_the_attempt_budget() {
    let gateway = Arc::new(MemoryGateway::new());
    let config = ControllerConfig {
        max_delete_attempts: 2,
        ..fast_config()
    };
    let controller = start(&gateway, config);
    let key = record_key("ap-stubborn");

    controller.apply(access_point("ap-stubborn")).await.unwrap();
    controller
        .wait_for_phase(&key, AccessPointPhase::Synced, WAIT)
        .await
        .unwrap();

    for _ in 0..3 {
        gateway.inject_fault(
            GatewayCall::Delete,
            GatewayError::ServiceUnavailable("503".to_string()),
        );
    }
    controller.request_delete(&key).await.unwrap();
    controller.wait_for_removal(&key, WAIT).await.unwrap();

    // Exhausting the budget is reported, never abandoned
    assert_eq!(gateway.call_count(GatewayCall::Delete), 4);
    assert!(!gateway.exists(&ap_key("ap-stubborn")));
    controller.shutdown().await;
}

// =============================================================================
// Story: access points that never become active
// =============================================================================

#[tokio::test]
async fn story_slow_activation_hits_the_creation_deadline() {
    let gateway = Arc::new(MemoryGateway::new().with_activation_fetches(u32::MAX));
    let config = ControllerConfig {
        creation_deadline: Duration::from_millis(200),
        ..fast_config()
    };
    let controller = start(&gateway, config);
    let key = record_key("ap-slow");

    controller.apply(access_point("ap-slow")).await.unwrap();
    let failed = controller
        .wait_for_phase(&key, AccessPointPhase::Error, WAIT)
        .await
        .unwrap();

    let terminal = find_condition(&failed.status, condition_types::TERMINAL).unwrap();
    assert_eq!(terminal.reason, reasons::DEADLINE_EXCEEDED);
    let ready = find_condition(&failed.status, condition_types::READY).unwrap();
    assert_eq!(ready.reason, reasons::DEADLINE_EXCEEDED);
    controller.shutdown().await;
}

#[tokio::test]
async fn story_failed_provisioning_is_terminal() {
    let gateway = Arc::new(MemoryGateway::new().with_activation_fetches(u32::MAX));
    let controller = start(&gateway, fast_config());
    let key = record_key("ap-doomed");

    controller.apply(access_point("ap-doomed")).await.unwrap();
    controller
        .wait_for_phase(&key, AccessPointPhase::Creating, WAIT)
        .await
        .unwrap();

    assert!(gateway.set_status(&ap_key("ap-doomed"), ProvisioningStatus::Failed));
    let failed = controller
        .wait_for_phase(&key, AccessPointPhase::Error, WAIT)
        .await
        .unwrap();
    assert!(is_condition_true(&failed.status, condition_types::TERMINAL));

    // Deleting a failed record still removes the access point
    controller.request_delete(&key).await.unwrap();
    controller.wait_for_removal(&key, WAIT).await.unwrap();
    assert!(!gateway.exists(&ap_key("ap-doomed")));
    controller.shutdown().await;
}

// =============================================================================
// Story: the access point disappears out of band
// =============================================================================

#[tokio::test]
async fn story_missing_access_point_is_recreated() {
    let gateway = Arc::new(MemoryGateway::new());
    let controller = start(&gateway, fast_config());
    let key = record_key("ap-vanishing");

    controller.apply(access_point("ap-vanishing")).await.unwrap();
    controller
        .wait_for_phase(&key, AccessPointPhase::Synced, WAIT)
        .await
        .unwrap();

    assert!(gateway.remove_out_of_band(&ap_key("ap-vanishing")));
    s3control_operator::retry::wait_for(WAIT, Duration::from_millis(20), "recreation", || {
        let gateway = gateway.clone();
        async move { gateway.exists(&ap_key("ap-vanishing")).then_some(()) }
    })
    .await
    .unwrap();

    assert_eq!(gateway.call_count(GatewayCall::Create), 2);
    controller
        .wait_for_phase(&key, AccessPointPhase::Synced, WAIT)
        .await
        .unwrap();
    controller.shutdown().await;
}

// =============================================================================
// Story: the name is already taken by someone else's access point
// =============================================================================

#[tokio::test]
async fn story_foreign_access_point_survives_the_record() {
    let gateway = Arc::new(MemoryGateway::new());
    let mut foreign = spec("ap-shared");
    foreign.bucket = "someone-elses-bucket".to_string();
    gateway.create(&foreign).await.unwrap();

    let controller = start(&gateway, fast_config());
    let key = record_key("ap-shared");
    controller.apply(access_point("ap-shared")).await.unwrap();

    let failed = controller
        .wait_for_phase(&key, AccessPointPhase::Error, WAIT)
        .await
        .unwrap();
    let terminal = find_condition(&failed.status, condition_types::TERMINAL).unwrap();
    assert_eq!(terminal.reason, reasons::CONFLICT);
    assert!(failed.status.identity.is_none());

    controller.request_delete(&key).await.unwrap();
    controller.wait_for_removal(&key, WAIT).await.unwrap();

    assert_eq!(gateway.call_count(GatewayCall::Delete), 0);
    let survivor = gateway.get(&ap_key("ap-shared")).unwrap();
    assert_eq!(survivor.bucket, "someone-elses-bucket");
    controller.shutdown().await;
}

// =============================================================================
// Story: specs that can never succeed
// =============================================================================

#[tokio::test]
async fn story_invalid_spec_never_reaches_the_gateway() {
    let gateway = Arc::new(MemoryGateway::new());
    let controller = start(&gateway, fast_config());
    let key = record_key("ap-broken");

    let mut broken = spec("ap-broken");
    broken.account_id = "not-an-account".to_string();
    controller
        .apply(access_point_with("ap-broken", broken))
        .await
        .unwrap();

    let failed = controller
        .wait_for_phase(&key, AccessPointPhase::Error, WAIT)
        .await
        .unwrap();
    let terminal = find_condition(&failed.status, condition_types::TERMINAL).unwrap();
    assert_eq!(terminal.reason, reasons::VALIDATION_ERROR);

    controller.request_delete(&key).await.unwrap();
    controller.wait_for_removal(&key, WAIT).await.unwrap();

    assert_eq!(gateway.call_count(GatewayCall::Create), 0);
    assert_eq!(gateway.call_count(GatewayCall::Delete), 0);
    controller.shutdown().await;
}
