//! Operation encoding.
//!
//! # Layout
//!
//! ```text
//! [Kind: u8]
//! [Retry On Conflict: i32 LE]
//! [Target Length: u32 LE]
//! [Target: UTF-8 bytes]
//! [Has Payload: u8 (0 or 1)]
//! If has payload:
//!   [Payload Length: u32 LE]
//!   [Payload: bytes]
//! ```
//!
//! The encoded length doubles as the operation's size for batching
//! decisions, so size accounting is deterministic and grows with the payload.

use super::FormatError;
use byteorder::{LittleEndian, ReadBytesExt};
use esink_core::{Operation, OperationKind};
use std::io::{Cursor, Read, Write};

/// Kind + retry count + target length + payload flag
const FIXED_SIZE: u64 = 1 + 4 + 4 + 1;

/// Encodes, decodes and sizes single operations
#[derive(Debug, Clone, Copy, Default)]
pub struct OperationSerializer;

impl OperationSerializer {
    /// Size of `operation` in bytes, equal to its encoded length
    pub fn size(operation: &Operation) -> u64 {
        let payload = match operation.payload() {
            Some(payload) => 4 + payload.len() as u64,
            None => 0,
        };
        FIXED_SIZE + operation.target().len() as u64 + payload
    }

    /// Encode an operation
    pub fn encode(operation: &Operation) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::size(operation) as usize);
        buf.push(operation.kind().to_byte());
        buf.extend_from_slice(&operation.retry_on_conflict().to_le_bytes());
        buf.extend_from_slice(&(operation.target().len() as u32).to_le_bytes());
        buf.extend_from_slice(operation.target().as_bytes());
        match operation.payload() {
            Some(payload) => {
                buf.push(1);
                buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
                buf.extend_from_slice(payload);
            }
            None => buf.push(0),
        }
        buf
    }

    /// Write an encoded operation to `writer`
    pub fn write_to<W: Write>(operation: &Operation, writer: &mut W) -> Result<(), FormatError> {
        writer.write_all(&Self::encode(operation))?;
        Ok(())
    }

    /// Decode exactly one operation from `bytes`
    ///
    /// Trailing bytes after the operation are rejected.
    pub fn decode(bytes: &[u8]) -> Result<Operation, FormatError> {
        let mut cursor = Cursor::new(bytes);
        let operation = Self::read_from(&mut cursor)?;
        if cursor.position() as usize != bytes.len() {
            return Err(FormatError::InvalidFormat(format!(
                "{} trailing bytes after operation",
                bytes.len() - cursor.position() as usize
            )));
        }
        Ok(operation)
    }

    /// Read one operation from `reader`
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Operation, FormatError> {
        let tag = reader.read_u8()?;
        let kind = OperationKind::from_byte(tag).ok_or(FormatError::UnknownOperationKind(tag))?;
        let retry_on_conflict = reader.read_i32::<LittleEndian>()?;

        let target_len = reader.read_u32::<LittleEndian>()?;
        let target = String::from_utf8(read_exact_vec(reader, target_len)?)
            .map_err(|_| FormatError::InvalidUtf8)?;

        let payload = match reader.read_u8()? {
            0 => None,
            1 => {
                let payload_len = reader.read_u32::<LittleEndian>()?;
                Some(read_exact_vec(reader, payload_len)?)
            }
            flag => {
                return Err(FormatError::InvalidFormat(format!(
                    "invalid payload flag {}",
                    flag
                )))
            }
        };

        Ok(Operation::new(kind, target, payload).with_retry_on_conflict(retry_on_conflict))
    }
}

/// Read exactly `len` bytes without trusting `len` for the allocation
fn read_exact_vec<R: Read>(reader: &mut R, len: u32) -> Result<Vec<u8>, FormatError> {
    let mut buf = Vec::new();
    reader.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len as usize {
        return Err(FormatError::InsufficientData);
    }
    Ok(buf)
}
