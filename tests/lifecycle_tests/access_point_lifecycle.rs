//! Stories about creating, updating and deleting access points

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use s3control_operator::config::ControllerConfig;
use s3control_operator::crd::AccessPointPhase;
use s3control_operator::finalizer::ACCESS_POINT_FINALIZER;
use s3control_operator::gateway::memory::{GatewayCall, MemoryGateway};
use s3control_operator::retry::wait_for;
use s3control_operator::status::{condition_types, find_condition, reasons};
use s3control_operator::store::ApplyOutcome;

use super::helpers::*;

// =============================================================================
// Story: the ap-test-1 walkthrough
// =============================================================================
//
// An access point is created, the S3 Control API reports it active, and the
// record settles in Synced. The access point then disappears behind the
// controller's back; deleting the record sees NotFound and finishes at once.

#[tokio::test]
async fn story_ap_test_1_creates_syncs_and_deletes() {
    let gateway = Arc::new(MemoryGateway::new().with_activation_fetches(1));
    // No resync may recreate the access point before the delete
    let config = ControllerConfig {
        resync_interval: Duration::from_secs(60),
        ..fast_config()
    };
    let controller = start(&gateway, config);
    let key = record_key("ap-test-1");

    let outcome = controller.apply(access_point("ap-test-1")).await.unwrap();
    assert_eq!(outcome, ApplyOutcome::Created);

    let synced = controller
        .wait_for_phase(&key, AccessPointPhase::Synced, WAIT)
        .await
        .unwrap();
    assert_eq!(synced.status.identity, Some(ap_key("ap-test-1")));
    assert_eq!(
        synced.status.access_point_arn.as_deref(),
        Some("arn:aws:s3:us-west-2:123456789012:accesspoint/ap-test-1")
    );
    assert!(synced.finalizers.contains(&ACCESS_POINT_FINALIZER.to_string()));
    let ready = find_condition(&synced.status, condition_types::READY).unwrap();
    assert_eq!(ready.reason, reasons::SYNCED);

    assert!(gateway.remove_out_of_band(&ap_key("ap-test-1")));
    let deletes_before = gateway.call_count(GatewayCall::Delete);

    controller.request_delete(&key).await.unwrap();
    controller.wait_for_removal(&key, WAIT).await.unwrap();

    assert_eq!(gateway.call_count(GatewayCall::Delete), deletes_before + 1);
    controller.shutdown().await;
}

#[tokio::test]
async fn story_deleting_a_synced_access_point_removes_it() {
    let gateway = Arc::new(MemoryGateway::new());
    let controller = start(&gateway, fast_config());
    let key = record_key("ap-orders");

    controller.apply(access_point("ap-orders")).await.unwrap();
    controller
        .wait_for_phase(&key, AccessPointPhase::Synced, WAIT)
        .await
        .unwrap();
    assert!(gateway.exists(&ap_key("ap-orders")));

    controller.request_delete(&key).await.unwrap();
    controller.wait_for_removal(&key, WAIT).await.unwrap();

    assert!(!gateway.exists(&ap_key("ap-orders")));
    assert!(controller.list().is_empty());
    controller.shutdown().await;
}

// =============================================================================
// Story: updating mutable fields in place
// =============================================================================

#[tokio::test]
async fn story_policy_and_tag_changes_are_applied_in_place() {
    let gateway = Arc::new(MemoryGateway::new());
    let controller = start(&gateway, fast_config());
    let key = record_key("ap-analytics");

    controller.apply(access_point("ap-analytics")).await.unwrap();
    controller
        .wait_for_phase(&key, AccessPointPhase::Synced, WAIT)
        .await
        .unwrap();

    let mut updated = spec("ap-analytics");
    updated.policy = Some(r#"{"Version":"2012-10-17","Statement":[]}"#.to_string());
    updated.tags = BTreeMap::from([("team".to_string(), "analytics".to_string())]);
    let outcome = controller
        .apply(access_point_with("ap-analytics", updated))
        .await
        .unwrap();
    assert_eq!(outcome, ApplyOutcome::Updated);

    let observed = wait_for(WAIT, Duration::from_millis(20), "policy and tags", || {
        let gateway = gateway.clone();
        async move {
            gateway
                .get(&ap_key("ap-analytics"))
                .filter(|o| o.policy.is_some() && o.tags.contains_key("team"))
        }
    })
    .await
    .unwrap();
    assert_eq!(observed.tags["team"], "analytics");
    assert_eq!(gateway.call_count(GatewayCall::Create), 1);

    let snapshot = controller
        .wait_for_phase(&key, AccessPointPhase::Synced, WAIT)
        .await
        .unwrap();
    assert_eq!(snapshot.generation, 2);
    controller.shutdown().await;
}

#[tokio::test]
async fn story_out_of_band_tag_drift_is_repaired_on_resync() {
    let gateway = Arc::new(MemoryGateway::new());
    let controller = start(&gateway, fast_config());
    let key = record_key("ap-tags");

    let mut desired = spec("ap-tags");
    desired.tags = BTreeMap::from([("env".to_string(), "prod".to_string())]);
    controller
        .apply(access_point_with("ap-tags", desired))
        .await
        .unwrap();
    controller
        .wait_for_phase(&key, AccessPointPhase::Synced, WAIT)
        .await
        .unwrap();

    gateway.set_tags_out_of_band(
        &ap_key("ap-tags"),
        BTreeMap::from([
            ("env".to_string(), "dev".to_string()),
            ("stray".to_string(), "x".to_string()),
        ]),
    );

    let repaired = wait_for(WAIT, Duration::from_millis(20), "tag repair", || {
        let gateway = gateway.clone();
        async move {
            gateway.get(&ap_key("ap-tags")).filter(|o| {
                o.tags == BTreeMap::from([("env".to_string(), "prod".to_string())])
            })
        }
    })
    .await;
    assert!(repaired.is_ok());
    controller.shutdown().await;
}

#[tokio::test]
async fn story_identical_apply_is_a_no_op() {
    let gateway = Arc::new(MemoryGateway::new());
    let controller = start(&gateway, fast_config());

    assert_eq!(
        controller.apply(access_point("ap-same")).await.unwrap(),
        ApplyOutcome::Created
    );
    assert_eq!(
        controller.apply(access_point("ap-same")).await.unwrap(),
        ApplyOutcome::Unchanged
    );
    controller
        .wait_for_phase(&record_key("ap-same"), AccessPointPhase::Synced, WAIT)
        .await
        .unwrap();
    assert_eq!(gateway.call_count(GatewayCall::Create), 1);
    controller.shutdown().await;
}

// =============================================================================
// Story: immutable fields
// =============================================================================
//
// The bucket an access point is attached to cannot change. Changing it
// surfaces a validation error; reverting the spec brings the record back.

#[tokio::test]
async fn story_changing_the_bucket_is_rejected_until_reverted() {
    let gateway = Arc::new(MemoryGateway::new());
    let controller = start(&gateway, fast_config());
    let key = record_key("ap-pinned");

    controller.apply(access_point("ap-pinned")).await.unwrap();
    controller
        .wait_for_phase(&key, AccessPointPhase::Synced, WAIT)
        .await
        .unwrap();

    let mut moved = spec("ap-pinned");
    moved.bucket = "another-bucket".to_string();
    controller
        .apply(access_point_with("ap-pinned", moved))
        .await
        .unwrap();

    let failed = controller
        .wait_for_phase(&key, AccessPointPhase::Error, WAIT)
        .await
        .unwrap();
    let terminal = find_condition(&failed.status, condition_types::TERMINAL).unwrap();
    assert_eq!(terminal.reason, reasons::VALIDATION_ERROR);
    assert!(terminal.message.contains("spec.bucket"));
    assert_eq!(
        gateway.get(&ap_key("ap-pinned")).unwrap().bucket,
        "bootstrap-bucket"
    );

    controller.apply(access_point("ap-pinned")).await.unwrap();
    let recovered = controller
        .wait_for_phase(&key, AccessPointPhase::Synced, WAIT)
        .await
        .unwrap();
    let ready = find_condition(&recovered.status, condition_types::READY).unwrap();
    assert_eq!(ready.reason, reasons::SYNCED);
    controller.shutdown().await;
}
