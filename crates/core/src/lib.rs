//! Core types for esink
//!
//! This crate defines the foundational types shared by every layer:
//! - Operation / OperationKind: the unit of work sent to the store
//! - SinkContext / ElementConverter: record to operation conversion
//! - WriterId: identity of a writer instance
//! - TransportError / FailureKind: failures reported by the remote transport

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod convert;
pub mod error;
pub mod operation;
pub mod types;

pub use convert::{ElementConverter, OperationConverter, SinkContext};
pub use error::{FailureKind, TransportError};
pub use operation::{Operation, OperationKind};
pub use types::WriterId;
