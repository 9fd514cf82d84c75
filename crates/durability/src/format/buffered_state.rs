//! Checkpoint envelope for buffered operations.
//!
//! # Layout (Version 0x01)
//!
//! ```text
//! [Magic: "ESBS" (4 bytes)]
//! [Version: u8]
//! [Operation Count: u32 LE]
//! For each operation (in buffer order):
//!   [Encoded Length: u32 LE]
//!   [Encoded Operation]
//! [State Size In Bytes: u64 LE]
//! [CRC32: u32 LE over everything above]
//! ```
//!
//! The trailing byte total must equal the sum of the decoded operations'
//! sizes. A mismatch, a bad checksum or any truncation is reported as a
//! [`FormatError`]; a checkpoint is never partially restored.

use super::operation::OperationSerializer;
use super::FormatError;
use byteorder::{LittleEndian, ReadBytesExt};
use crc32fast::Hasher;
use esink_core::Operation;
use std::io::{Cursor, Read, Write};

/// Magic bytes identifying a buffered state: "ESBS"
pub const BUFFERED_STATE_MAGIC: [u8; 4] = *b"ESBS";

/// Current buffered state format version
pub const BUFFERED_STATE_FORMAT_VERSION: u8 = 1;

/// Magic + version + count
const HEADER_SIZE: usize = 4 + 1 + 4;

/// Byte total + CRC32
const TRAILER_SIZE: usize = 8 + 4;

/// Durable snapshot of a writer's unacknowledged operations
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BufferedRequestState {
    operations: Vec<Operation>,
    state_size_in_bytes: u64,
}

impl BufferedRequestState {
    /// Build a state, computing the byte total from the operations
    pub fn new(operations: Vec<Operation>) -> Self {
        let state_size_in_bytes = operations.iter().map(OperationSerializer::size).sum();
        Self {
            operations,
            state_size_in_bytes,
        }
    }

    /// An empty state
    pub fn empty() -> Self {
        Self::default()
    }

    /// Operations in buffer order
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Sum of the operations' sizes
    pub fn state_size_in_bytes(&self) -> u64 {
        self.state_size_in_bytes
    }

    /// Number of operations
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// True if the state holds no operations
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Consume the state, yielding its operations
    pub fn into_operations(self) -> Vec<Operation> {
        self.operations
    }
}

/// Serializes [`BufferedRequestState`] to and from the versioned layout
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferedStateSerializer;

impl BufferedStateSerializer {
    /// Format version written by this serializer
    pub fn version(&self) -> u8 {
        BUFFERED_STATE_FORMAT_VERSION
    }

    /// Serialize a state to bytes
    pub fn serialize(&self, state: &BufferedRequestState) -> Vec<u8> {
        let body_len: u64 = state
            .operations
            .iter()
            .map(|op| 4 + OperationSerializer::size(op))
            .sum();
        let mut buf = Vec::with_capacity(HEADER_SIZE + body_len as usize + TRAILER_SIZE);

        buf.extend_from_slice(&BUFFERED_STATE_MAGIC);
        buf.push(BUFFERED_STATE_FORMAT_VERSION);
        buf.extend_from_slice(&(state.operations.len() as u32).to_le_bytes());

        for op in &state.operations {
            let encoded = OperationSerializer::encode(op);
            buf.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
            buf.extend_from_slice(&encoded);
        }

        buf.extend_from_slice(&state.state_size_in_bytes.to_le_bytes());
        let crc = compute_crc(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Deserialize a state from bytes
    pub fn deserialize(&self, bytes: &[u8]) -> Result<BufferedRequestState, FormatError> {
        if bytes.len() < HEADER_SIZE + TRAILER_SIZE {
            return Err(FormatError::InsufficientData);
        }

        let magic: [u8; 4] = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if magic != BUFFERED_STATE_MAGIC {
            return Err(FormatError::BadMagic(magic));
        }

        let (body, crc_bytes) = bytes.split_at(bytes.len() - 4);
        let stored_crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let computed_crc = compute_crc(body);
        if stored_crc != computed_crc {
            return Err(FormatError::ChecksumMismatch {
                expected: stored_crc,
                computed: computed_crc,
            });
        }

        let version = body[4];
        if version != BUFFERED_STATE_FORMAT_VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }

        let mut cursor = Cursor::new(&body[5..]);
        let count = cursor.read_u32::<LittleEndian>()?;
        // Count is untrusted until every operation has been read
        let mut operations = Vec::with_capacity((count as usize).min(1024));
        for _ in 0..count {
            let len = cursor.read_u32::<LittleEndian>()? as usize;
            let start = cursor.position() as usize;
            let remaining = cursor.get_ref().len() - start;
            if len > remaining {
                return Err(FormatError::InsufficientData);
            }
            let encoded = &cursor.get_ref()[start..start + len];
            operations.push(OperationSerializer::decode(encoded)?);
            cursor.set_position((start + len) as u64);
        }

        let recorded = cursor.read_u64::<LittleEndian>()?;
        if cursor.position() as usize != cursor.get_ref().len() {
            return Err(FormatError::InvalidFormat(format!(
                "{} unexpected bytes after state",
                cursor.get_ref().len() - cursor.position() as usize
            )));
        }

        let state = BufferedRequestState::new(operations);
        if state.state_size_in_bytes != recorded {
            return Err(FormatError::SizeMismatch {
                recorded,
                computed: state.state_size_in_bytes,
            });
        }
        Ok(state)
    }

    /// Serialize a state into `writer`
    pub fn write_to<W: Write>(
        &self,
        state: &BufferedRequestState,
        writer: &mut W,
    ) -> Result<(), FormatError> {
        writer.write_all(&self.serialize(state))?;
        writer.flush()?;
        Ok(())
    }

    /// Read a whole serialized state from `reader`
    pub fn read_from<R: Read>(&self, reader: &mut R) -> Result<BufferedRequestState, FormatError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        self.deserialize(&bytes)
    }
}

fn compute_crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
