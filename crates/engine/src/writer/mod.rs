//! Bulk sink writer
//!
//! [`BulkSinkWriter`] is the caller-facing handle. It converts records into
//! operations and forwards requests to the writer's event loop, which owns
//! all buffer state. Open one with [`BulkSinkWriterBuilder`]:
//!
//! ```ignore
//! let writer = BulkSinkWriterBuilder::new(config)
//!     .with_restored_state(checkpointed)
//!     .open(bridge, converter)
//!     .await?;
//!
//! writer.write(record).await?;
//! let state = writer.snapshot_state().await?;
//! writer.close().await?;
//! ```

mod actor;
mod state;

use crate::bridge::BulkApiBridge;
use crate::classifier::Classification;
use crate::config::SinkConfig;
use crate::error::{Result, SinkError};
use crate::stats::WriterStats;
use actor::{Command, WriterActor};
use esink_core::{ElementConverter, SinkContext, TransportError};
use esink_durability::{BufferedRequestState, BufferedStateSerializer};
use state::WriterState;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info};

/// Capacity of the handle to event loop channel
const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Builder for [`BulkSinkWriter`]
#[derive(Debug, Default)]
pub struct BulkSinkWriterBuilder {
    config: SinkConfig,
    restored: Vec<BufferedRequestState>,
    serialized: Vec<Vec<u8>>,
    subtask_index: u32,
}

impl BulkSinkWriterBuilder {
    /// Start from a configuration
    pub fn new(config: SinkConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Replace the configuration
    pub fn with_config(mut self, config: SinkConfig) -> Self {
        self.config = config;
        self
    }

    /// Seed the buffer with checkpointed states, in order
    pub fn with_restored_state(mut self, states: impl IntoIterator<Item = BufferedRequestState>) -> Self {
        self.restored.extend(states);
        self
    }

    /// Seed the buffer with a serialized checkpoint, decoded on open
    pub fn with_serialized_state(mut self, bytes: Vec<u8>) -> Self {
        self.serialized.push(bytes);
        self
    }

    /// Index of the parallel subtask this writer runs as
    pub fn with_subtask_index(mut self, subtask_index: u32) -> Self {
        self.subtask_index = subtask_index;
        self
    }

    /// Connect through `bridge` and start the writer.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if the configuration fails validation
    /// - `CorruptState` if a serialized checkpoint cannot be decoded
    /// - `FatalTransport` if connecting fails with a fatal failure
    /// - `Connect` if connecting fails with a retryable failure
    pub async fn open<R, B, C>(self, bridge: B, converter: C) -> Result<BulkSinkWriter<R>>
    where
        B: BulkApiBridge,
        C: ElementConverter<R> + 'static,
    {
        self.config.validate()?;

        let serializer = BufferedStateSerializer;
        let mut states = self.restored;
        for bytes in &self.serialized {
            states.push(serializer.deserialize(bytes)?);
        }

        let client = bridge
            .create_client()
            .await
            .map_err(|err| connect_error(&bridge, err))?;
        bridge
            .verify_client_connection(&client)
            .await
            .map_err(|err| connect_error(&bridge, err))?;

        let mut state = WriterState::new(self.config.clone());
        let restored = state.restore(states, Instant::now());

        let context = SinkContext::new(self.subtask_index);
        info!(
            bridge = bridge.name(),
            writer = %context.writer_id(),
            subtask = self.subtask_index,
            restored,
            "bulk writer opened"
        );

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let actor = WriterActor::new(state, Arc::new(bridge), client, commands_rx);
        let task = tokio::spawn(actor.run());

        Ok(BulkSinkWriter {
            commands: commands_tx,
            task,
            converter: Box::new(converter),
            context,
            flush_timeout: self.config.flush_timeout(),
            flush_on_checkpoint: self.config.flush_on_checkpoint,
        })
    }
}

fn connect_error<B: BulkApiBridge>(bridge: &B, err: TransportError) -> SinkError {
    match bridge.classify_failure(&err) {
        Classification::Fatal(fatal) => {
            error!(bridge = bridge.name(), error = %fatal, "failed to connect");
            SinkError::FatalTransport(fatal)
        }
        Classification::NotFatal => SinkError::Connect(err),
    }
}

/// Handle to a running bulk writer.
///
/// Dropping the handle without [`close`](BulkSinkWriter::close) stops the
/// event loop and abandons anything still buffered.
pub struct BulkSinkWriter<R> {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
    converter: Box<dyn ElementConverter<R>>,
    context: SinkContext,
    flush_timeout: Duration,
    flush_on_checkpoint: bool,
}

impl<R> BulkSinkWriter<R> {
    /// Context handed to the converter
    pub fn context(&self) -> &SinkContext {
        &self.context
    }

    /// Convert and admit one record.
    ///
    /// Returns once the operation is buffered; delivery happens in the
    /// background. Fails with `RecordTooLarge` or `BufferFull` without
    /// buffering the record.
    pub async fn write(&self, record: R) -> Result<()> {
        let operation = self.converter.convert(record, &self.context);
        self.request(|reply| Command::Write { operation, reply })
            .await?
    }

    /// Dispatch everything buffered and wait until every batch resolved
    pub async fn flush(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Flush { reply })
            .await
            .map_err(|_| SinkError::Closed)?;
        match tokio::time::timeout(self.flush_timeout, rx).await {
            Ok(result) => result.map_err(|_| SinkError::Closed)?,
            Err(_) => {
                error!(timeout = ?self.flush_timeout, "flush timed out");
                Err(SinkError::FlushTimeout(self.flush_timeout))
            }
        }
    }

    /// Snapshot unacknowledged work without flushing
    pub async fn snapshot(&self) -> Result<BufferedRequestState> {
        self.request(|reply| Command::Snapshot { reply }).await?
    }

    /// Checkpoint hook: flush first when `flush_on_checkpoint` is set, then
    /// snapshot
    pub async fn snapshot_state(&self) -> Result<BufferedRequestState> {
        if self.flush_on_checkpoint {
            self.flush().await?;
        }
        self.snapshot().await
    }

    /// [`snapshot_state`](Self::snapshot_state), serialized
    pub async fn checkpoint(&self) -> Result<Vec<u8>> {
        let state = self.snapshot_state().await?;
        Ok(BufferedStateSerializer.serialize(&state))
    }

    /// Current counters
    pub async fn stats(&self) -> Result<WriterStats> {
        self.request(|reply| Command::Stats { reply }).await
    }

    /// Stop accepting writes, flush everything and release the client
    pub async fn close(self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Close { reply })
            .await
            .map_err(|_| SinkError::Closed)?;

        match tokio::time::timeout(self.flush_timeout, rx).await {
            Ok(result) => {
                let result = result.map_err(|_| SinkError::Closed)?;
                if let Err(err) = self.task.await {
                    error!(error = %err, "writer task failed");
                }
                result
            }
            Err(_) => {
                error!(timeout = ?self.flush_timeout, "close timed out, abandoning pending operations");
                self.task.abort();
                Err(SinkError::FlushTimeout(self.flush_timeout))
            }
        }
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| SinkError::Closed)?;
        rx.await.map_err(|_| SinkError::Closed)
    }
}

impl<R> fmt::Debug for BulkSinkWriter<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkSinkWriter")
            .field("writer_id", &self.context.writer_id())
            .field("subtask_index", &self.context.subtask_index())
            .finish()
    }
}
