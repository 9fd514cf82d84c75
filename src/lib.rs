//! esink - Async bulk-write sink for bulk-indexing stores
//!
//! esink delivers a stream of records to a remote bulk API (Elasticsearch and
//! friends) with batching, bounded in-flight requests, retry of failed items
//! and checkpointed buffers for at-least-once delivery.
//!
//! # Quick Start
//!
//! ```ignore
//! use esink::{BulkSinkWriterBuilder, Operation, OperationConverter, SinkConfig};
//!
//! let converter = OperationConverter::new(|doc: Doc, _ctx| {
//!     Operation::index(format!("docs/{}", doc.id), doc.to_json())
//! });
//! let writer = BulkSinkWriterBuilder::new(SinkConfig::default())
//!     .open(my_bridge, converter)
//!     .await?;
//!
//! writer.write(doc).await?;
//! let checkpoint = writer.checkpoint().await?;
//! writer.close().await?;
//! ```
//!
//! # Architecture
//!
//! - `esink-core`: operations, converters and transport failures
//! - `esink-durability`: operation codec and checkpoint format
//! - `esink-engine`: the writer event loop, classifier and bridge trait

pub use esink_core::{
    ElementConverter, FailureKind, Operation, OperationConverter, OperationKind, SinkContext,
    TransportError, WriterId,
};
pub use esink_durability::{
    BufferedRequestState, BufferedStateSerializer, FormatError, OperationSerializer,
};
pub use esink_engine::{
    BulkApiBridge, BulkResponse, BulkSinkWriter, BulkSinkWriterBuilder, Classification,
    ConfigError, FatalError, FatalExceptionClassifier, ItemResult, Result, SinkConfig, SinkError,
    WriterStats,
};
