//! Checkpoint snapshots and restore

use crate::common::*;
use std::io::{Read, Write};
use tempfile::NamedTempFile;

/// With flush-on-checkpoint the snapshot is taken after everything was
/// delivered, so it is empty.
#[tokio::test(start_paused = true)]
async fn flush_on_checkpoint_persists_nothing() {
    let bridge = ScriptedBridge::new();
    let writer = open_writer(&bridge, quiet_config().with_flush_on_checkpoint(true)).await;

    for id in 0..3 {
        writer.write(doc(id)).await.unwrap();
    }
    let state = writer.snapshot_state().await.unwrap();

    assert!(state.is_empty());
    assert_eq!(state.state_size_in_bytes(), 0);
    assert_eq!(bridge.batch_targets(), vec![targets(0..3)]);
}

/// Without flush-on-checkpoint dispatched but unacknowledged batches are
/// persisted ahead of the buffer.
#[tokio::test(start_paused = true)]
async fn snapshot_includes_in_flight_operations() {
    let bridge = ScriptedBridge::new();
    bridge.hold();
    let config = quiet_config()
        .with_max_batch_size(2)
        .with_max_in_flight_requests(1)
        .with_flush_on_checkpoint(false);
    let writer = open_writer(&bridge, config).await;

    for id in 0..3 {
        writer.write(doc(id)).await.unwrap();
    }
    bridge.wait_for_batches(1).await;

    let state = writer.snapshot_state().await.unwrap();
    assert_eq!(operation_targets(state.operations()), targets(0..3));
    let expected: u64 = state.operations().iter().map(OperationSerializer::size).sum();
    assert_eq!(state.state_size_in_bytes(), expected);
}

/// A checkpoint written to disk restores into a new writer.
#[tokio::test(start_paused = true)]
async fn checkpoint_file_roundtrip() {
    let config = quiet_config().with_flush_on_checkpoint(false);
    let bridge = ScriptedBridge::new();
    let writer = open_writer(&bridge, config.clone()).await;
    for id in 10..15 {
        writer.write(doc(id)).await.unwrap();
    }

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&writer.checkpoint().await.unwrap()).unwrap();
    drop(writer);

    let mut bytes = Vec::new();
    std::fs::File::open(file.path())
        .unwrap()
        .read_to_end(&mut bytes)
        .unwrap();

    let restored_bridge = ScriptedBridge::new();
    let restored = BulkSinkWriterBuilder::new(config)
        .with_serialized_state(bytes)
        .open(restored_bridge.clone(), converter())
        .await
        .unwrap();
    restored.close().await.unwrap();

    assert_eq!(restored_bridge.batch_targets(), vec![targets(10..15)]);
}

/// Several checkpointed states restore in the order given, ahead of new
/// writes.
#[tokio::test(start_paused = true)]
async fn restored_states_precede_new_writes() {
    let first = BufferedRequestState::new(vec![
        Operation::index(target(1), b"{}".to_vec()),
        Operation::delete(target(2)),
    ]);
    let second = BufferedRequestState::new(vec![Operation::update(target(3), b"{}".to_vec())]);

    let bridge = ScriptedBridge::new();
    let writer = BulkSinkWriterBuilder::new(quiet_config())
        .with_restored_state([first, second])
        .open(bridge.clone(), converter())
        .await
        .unwrap();

    let stats = writer.stats().await.unwrap();
    assert_eq!(stats.buffered_requests, 3);
    assert_eq!(stats.records_admitted, 0);

    writer.write(doc(4)).await.unwrap();
    writer.flush().await.unwrap();

    let batches = bridge.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(operation_targets(&batches[0]), targets(1..=4));
    assert_eq!(batches[0][1].kind(), OperationKind::Delete);
    assert_eq!(batches[0][2].kind(), OperationKind::Update);
}

/// A restored backlog larger than the buffer is accepted, new writes are not.
#[tokio::test(start_paused = true)]
async fn oversized_restore_blocks_admission_until_drained() {
    let operations = (0..8)
        .map(|id| Operation::index(target(id), b"{}".to_vec()))
        .collect();
    let config = quiet_config()
        .with_max_batch_size(2)
        .with_max_buffered_requests(4);

    let bridge = ScriptedBridge::new();
    bridge.hold();
    let writer = BulkSinkWriterBuilder::new(config)
        .with_restored_state([BufferedRequestState::new(operations)])
        .open(bridge.clone(), converter())
        .await
        .unwrap();

    assert!(matches!(
        writer.write(doc(100)).await,
        Err(SinkError::BufferFull { capacity: 4 })
    ));

    bridge.unhold();
    bridge.release(2);
    writer.flush().await.unwrap();
    writer.write(doc(100)).await.unwrap();
    writer.close().await.unwrap();

    assert_eq!(writer_total(&bridge), 9);
}

/// Corrupt checkpoint bytes fail the open instead of being skipped.
#[tokio::test]
async fn corrupt_checkpoint_fails_open() {
    let state = BufferedRequestState::new(vec![Operation::delete(target(1))]);
    let mut bytes = BufferedStateSerializer.serialize(&state);
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;

    let bridge = ScriptedBridge::new();
    let err = BulkSinkWriterBuilder::new(quiet_config())
        .with_serialized_state(bytes)
        .open(bridge.clone(), converter())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SinkError::CorruptState(FormatError::ChecksumMismatch { .. })
    ));
    assert!(err.is_fatal());
    assert_eq!(bridge.clients_created(), 0);
}

#[tokio::test]
async fn truncated_checkpoint_fails_open() {
    let state = BufferedRequestState::new(vec![Operation::delete(target(1))]);
    let bytes = BufferedStateSerializer.serialize(&state);

    let err = BulkSinkWriterBuilder::new(quiet_config())
        .with_serialized_state(bytes[..bytes.len() / 2].to_vec())
        .open(ScriptedBridge::new(), converter())
        .await
        .unwrap_err();
    assert!(matches!(err, SinkError::CorruptState(_)));
}

fn writer_total(bridge: &ScriptedBridge) -> usize {
    bridge.batches().iter().map(Vec::len).sum()
}
