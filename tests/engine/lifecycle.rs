//! Open, close and conversion

use crate::common::*;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Open
// ============================================================================

#[tokio::test]
async fn open_rejects_invalid_config() {
    let err = BulkSinkWriterBuilder::new(quiet_config().with_max_in_flight_requests(0))
        .open(ScriptedBridge::new(), converter())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SinkError::InvalidConfig(ConfigError::ZeroLimit("max_in_flight_requests"))
    ));
}

#[tokio::test]
async fn refused_connection_fails_open_fatally() {
    let bridge = ScriptedBridge::new();
    bridge.fail_connect(connection_refused());

    let err = BulkSinkWriterBuilder::new(quiet_config())
        .open(bridge, converter())
        .await
        .unwrap_err();
    assert!(matches!(err, SinkError::FatalTransport(_)));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn transient_connect_failure_is_retryable() {
    let bridge = ScriptedBridge::new();
    bridge.fail_connect(timeout());

    let err = BulkSinkWriterBuilder::new(quiet_config())
        .open(bridge, converter())
        .await
        .unwrap_err();
    assert!(matches!(err, SinkError::Connect(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn failed_verification_fails_open() {
    let bridge = ScriptedBridge::new();
    bridge.fail_verify(TransportError::new(FailureKind::Unauthorized, "401"));

    let err = BulkSinkWriterBuilder::new(quiet_config())
        .open(bridge.clone(), converter())
        .await
        .unwrap_err();
    assert!(matches!(err, SinkError::FatalTransport(_)));
    assert_eq!(bridge.clients_created(), 1);
}

// ============================================================================
// Close
// ============================================================================

#[tokio::test(start_paused = true)]
async fn close_flushes_and_cleans_up() {
    let bridge = ScriptedBridge::new();
    let writer = open_writer(&bridge, quiet_config()).await;

    for id in 0..25 {
        writer.write(doc(id)).await.unwrap();
    }
    writer.close().await.unwrap();

    let delivered: Vec<String> = bridge
        .batches()
        .iter()
        .flat_map(|batch| operation_targets(batch))
        .collect();
    assert_eq!(delivered, targets(0..25));
    assert!(bridge.cleaned_up());
}

#[tokio::test(start_paused = true)]
async fn close_times_out_on_stuck_transport() {
    let bridge = ScriptedBridge::new();
    bridge.hold();
    let writer = open_writer(&bridge, quiet_config().with_flush_timeout_ms(1_000)).await;

    writer.write(doc(1)).await.unwrap();
    let err = writer.close().await.unwrap_err();

    assert!(matches!(err, SinkError::FlushTimeout(t) if t == Duration::from_secs(1)));
    assert!(err.is_fatal());
}

#[tokio::test(start_paused = true)]
async fn flush_times_out_on_stuck_transport() {
    let bridge = ScriptedBridge::new();
    bridge.hold();
    let writer = open_writer(&bridge, quiet_config().with_flush_timeout_ms(500)).await;

    writer.write(doc(1)).await.unwrap();
    assert!(matches!(
        writer.flush().await,
        Err(SinkError::FlushTimeout(_))
    ));

    // The writer keeps running; releasing the transport completes delivery
    bridge.unhold();
    bridge.release(1);
    writer.flush().await.unwrap();
    assert_eq!(writer.stats().await.unwrap().records_acknowledged, 1);
}

/// Once a flush has timed out, new writes wait for the usual triggers again.
#[tokio::test(start_paused = true)]
async fn timed_out_flush_stops_forcing_dispatch() {
    let bridge = ScriptedBridge::new();
    bridge.hold();
    let config = quiet_config()
        .with_max_in_flight_requests(2)
        .with_flush_timeout_ms(500);
    let writer = open_writer(&bridge, config).await;

    writer.write(doc(1)).await.unwrap();
    assert!(matches!(
        writer.flush().await,
        Err(SinkError::FlushTimeout(_))
    ));

    writer.write(doc(2)).await.unwrap();
    writer.write(doc(3)).await.unwrap();
    let stats = writer.stats().await.unwrap();
    assert_eq!(stats.buffered_requests, 2);
    assert_eq!(stats.in_flight_batches, 1);
    assert_eq!(bridge.batch_count(), 1);

    bridge.unhold();
    bridge.release(1);
    writer.flush().await.unwrap();
    assert_eq!(bridge.batch_targets(), vec![targets([1]), targets([2, 3])]);
}

#[tokio::test(start_paused = true)]
async fn dropped_writer_stops_event_loop() {
    let bridge = ScriptedBridge::new();
    let writer = open_writer(&bridge, quiet_config()).await;
    writer.write(doc(1)).await.unwrap();
    drop(writer);

    for _ in 0..100 {
        if bridge.cleaned_up() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(bridge.cleaned_up());
    assert_eq!(bridge.batch_count(), 0);
}

// ============================================================================
// Conversion
// ============================================================================

#[tokio::test(start_paused = true)]
async fn converter_sees_stable_context() {
    let converter = OperationConverter::new(|doc: Doc, ctx: &SinkContext| {
        let target = format!("docs/{}-{}-{}", ctx.subtask_index(), ctx.next_sequence(), doc.id);
        Operation::index(target, Vec::new())
    });
    let bridge = ScriptedBridge::new();
    let writer = BulkSinkWriterBuilder::new(quiet_config())
        .with_subtask_index(3)
        .open(bridge.clone(), converter)
        .await
        .unwrap();

    writer.write(doc(10)).await.unwrap();
    writer.write(doc(20)).await.unwrap();
    assert_eq!(writer.context().subtask_index(), 3);
    writer.close().await.unwrap();

    assert_eq!(
        bridge.batch_targets(),
        vec![vec!["docs/3-0-10".to_string(), "docs/3-1-20".to_string()]]
    );
}

#[tokio::test(start_paused = true)]
async fn converter_stamps_retry_on_conflict_on_updates() {
    let converter = OperationConverter::new(|doc: Doc, _ctx: &SinkContext| {
        if doc.id % 2 == 0 {
            Operation::update(target(doc.id), b"{\"doc\":{}}".to_vec())
        } else {
            Operation::delete(target(doc.id))
        }
    })
    .with_retry_on_conflict(3);
    let bridge = ScriptedBridge::new();
    let writer = BulkSinkWriterBuilder::new(quiet_config())
        .open(bridge.clone(), converter)
        .await
        .unwrap();

    writer.write(doc(1)).await.unwrap();
    writer.write(doc(2)).await.unwrap();
    writer.close().await.unwrap();

    let batch = &bridge.batches()[0];
    assert_eq!(batch[0].kind(), OperationKind::Delete);
    assert_eq!(batch[0].retry_on_conflict(), 0);
    assert_eq!(batch[1].kind(), OperationKind::Update);
    assert_eq!(batch[1].retry_on_conflict(), 3);
}

/// Concurrent writers share one handle; every record is delivered once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writes_are_all_delivered() {
    let bridge = ScriptedBridge::new();
    let config = SinkConfig::for_testing()
        .with_max_batch_size(7)
        .with_max_buffered_requests(1_000)
        .with_max_in_flight_requests(3)
        .with_max_time_in_buffer_ms(20);
    let writer = Arc::new(open_writer(&bridge, config).await);

    let mut tasks = Vec::new();
    for worker in 0..4u64 {
        let writer = Arc::clone(&writer);
        tasks.push(tokio::spawn(async move {
            for n in 0..50u64 {
                writer.write(doc(worker * 1_000 + n)).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let writer = Arc::try_unwrap(writer).expect("sole owner");
    writer.close().await.unwrap();

    let mut delivered: Vec<String> = bridge
        .batches()
        .iter()
        .flat_map(|batch| operation_targets(batch))
        .collect();
    delivered.sort();
    let mut expected: Vec<String> = (0..4u64)
        .flat_map(|worker| (0..50u64).map(move |n| target(worker * 1_000 + n)))
        .collect();
    expected.sort();
    assert_eq!(delivered, expected);
    assert!(bridge.batches().iter().all(|batch| batch.len() <= 7));
}
