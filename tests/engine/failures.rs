//! Failure classification and retry behaviour

use crate::common::*;
use std::time::Duration;

/// Transient request failures are retried until the store accepts the batch.
#[tokio::test(start_paused = true)]
async fn transient_failures_retry_until_success() {
    let bridge = ScriptedBridge::new();
    bridge.push_outcomes([
        ScriptedOutcome::Fail(timeout()),
        ScriptedOutcome::Fail(TransportError::new(FailureKind::Throttled, "429")),
        ScriptedOutcome::Fail(TransportError::new(FailureKind::Other, "connection reset")),
    ]);
    let writer = open_writer(&bridge, quiet_config().with_max_batch_size(2)).await;

    writer.write(doc(1)).await.unwrap();
    writer.write(doc(2)).await.unwrap();
    writer.flush().await.unwrap();

    assert_eq!(bridge.batch_targets(), vec![targets([1, 2]); 4]);
    let stats = writer.stats().await.unwrap();
    assert_eq!(stats.batches_failed, 3);
    assert_eq!(stats.records_requeued, 6);
    assert_eq!(stats.records_acknowledged, 2);
}

/// Retries wait for the configured backoff.
#[tokio::test(start_paused = true)]
async fn retry_waits_for_backoff() {
    let bridge = ScriptedBridge::new();
    bridge.push_outcome(ScriptedOutcome::Fail(timeout()));
    let config = quiet_config()
        .with_max_batch_size(1)
        .with_retry_backoff_ms(500);
    let writer = open_writer(&bridge, config).await;

    writer.write(doc(1)).await.unwrap();
    wait_for_stats(&writer, |s| s.batches_failed == 1).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(bridge.batch_count(), 1);

    bridge.wait_for_batches(2).await;
    writer.flush().await.unwrap();
    assert_eq!(writer.stats().await.unwrap().records_acknowledged, 1);
}

/// A fatal item-level cause halts the writer like a fatal request failure.
#[tokio::test(start_paused = true)]
async fn fatal_item_failure_halts_pipeline() {
    let bridge = ScriptedBridge::new();
    bridge.push_outcome(ScriptedOutcome::PartialFailure(vec![(
        0,
        TransportError::new(FailureKind::Unauthorized, "security_exception"),
    )]));
    let writer = open_writer(&bridge, quiet_config().with_max_batch_size(2)).await;

    writer.write(doc(1)).await.unwrap();
    writer.write(doc(2)).await.unwrap();

    match writer.flush().await {
        Err(SinkError::FatalTransport(fatal)) => {
            assert_eq!(fatal.message(), esink_engine::classifier::AUTH_FAILURE_MESSAGE);
        }
        other => panic!("expected fatal transport error, got {:?}", other),
    }
    assert_eq!(bridge.batch_count(), 1);
}

/// A custom classifier replaces the default chain.
#[tokio::test(start_paused = true)]
async fn custom_classifier_decides_fatality() {
    let bridge = ScriptedBridge::new();
    bridge.set_classifier(FatalExceptionClassifier::new().with_rule(
        "throttled",
        |err| {
            err.downcast_ref::<TransportError>()
                .map_or(false, |e| e.kind() == FailureKind::Throttled)
        },
        |cause| FatalError::new("store is shedding load", cause.clone()),
    ));
    bridge.push_outcomes([
        ScriptedOutcome::Fail(connection_refused()),
        ScriptedOutcome::Fail(TransportError::new(FailureKind::Throttled, "429")),
    ]);
    let writer = open_writer(&bridge, quiet_config().with_max_batch_size(1)).await;

    writer.write(doc(1)).await.unwrap();
    match writer.flush().await {
        Err(SinkError::FatalTransport(fatal)) => {
            assert_eq!(fatal.message(), "store is shedding load");
        }
        other => panic!("expected fatal transport error, got {:?}", other),
    }
    // Refused connection was retried under this chain
    assert_eq!(bridge.batch_count(), 2);
}

/// A response whose item count does not match the batch is retried whole.
#[tokio::test(start_paused = true)]
async fn mismatched_response_is_retried() {
    let bridge = ScriptedBridge::new();
    bridge.push_outcome(ScriptedOutcome::Items(1));
    let writer = open_writer(&bridge, quiet_config().with_max_batch_size(3)).await;

    for id in 0..3 {
        writer.write(doc(id)).await.unwrap();
    }
    writer.flush().await.unwrap();

    assert_eq!(bridge.batch_targets(), vec![targets(0..3), targets(0..3)]);
    let stats = writer.stats().await.unwrap();
    assert_eq!(stats.records_acknowledged, 3);
    assert_eq!(stats.records_requeued, 3);
}

/// Several rejected items come back in their original relative order.
#[tokio::test(start_paused = true)]
async fn rejected_items_keep_relative_order() {
    let bridge = ScriptedBridge::new();
    bridge.push_outcome(ScriptedOutcome::rejected([0, 2, 4]));
    let writer = open_writer(&bridge, quiet_config().with_max_batch_size(5)).await;

    for id in 0..5 {
        writer.write(doc(id)).await.unwrap();
    }
    writer.flush().await.unwrap();

    assert_eq!(
        bridge.batch_targets(),
        vec![targets(0..5), targets([0, 2, 4])]
    );
}

/// The `took` of the last response is reported.
#[tokio::test(start_paused = true)]
async fn last_took_is_reported() {
    let bridge = ScriptedBridge::new();
    bridge.set_took(Duration::from_millis(42));
    let writer = open_writer(&bridge, quiet_config()).await;

    writer.write(doc(1)).await.unwrap();
    writer.flush().await.unwrap();

    assert_eq!(
        writer.stats().await.unwrap().last_request_took,
        Some(Duration::from_millis(42))
    );
}
