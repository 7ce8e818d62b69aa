//! Operation records and WAL frame format.
//!
//! Frame format on disk: `encode(Operation) || encode(crc32)`, realized as
//! one bincode-encoded [`WalFrame`]. Field order is fixed by declaration, so
//! re-encoding a decoded operation reproduces the exact bytes the checksum
//! was computed over.

use burrow_common::{BurrowError, Result};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::ops::Range;

/// A single index delta carried with an operation.
///
/// `old_value`/`new_value` are the indexed field's value before and after the
/// operation; an empty string means "no entry on that side".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexOp {
    pub index: String,
    pub old_value: String,
    pub new_value: String,
}

/// A logical mutation: one put or delete against a partition, with the index
/// deltas it implies and the epoch it was buffered under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub partition: Vec<u8>,
    pub key: String,
    /// Serialized record value; empty for deletes.
    pub value: Vec<u8>,
    pub is_put: bool,
    pub index_ops: Vec<IndexOp>,
    pub epoch: u64,
}

impl Operation {
    /// Creates a put operation. The epoch is stamped at buffer-insertion
    /// time by the write path.
    pub fn put(partition: Vec<u8>, key: String, value: Vec<u8>, index_ops: Vec<IndexOp>) -> Self {
        Self {
            partition,
            key,
            value,
            is_put: true,
            index_ops,
            epoch: 0,
        }
    }

    /// Creates a delete (tombstone) operation.
    pub fn delete(partition: Vec<u8>, key: String, index_ops: Vec<IndexOp>) -> Self {
        Self {
            partition,
            key,
            value: Vec::new(),
            is_put: false,
            index_ops,
            epoch: 0,
        }
    }

    /// Encodes this operation to its canonical byte form.
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| BurrowError::Codec {
            context: "encode operation",
            source: e,
        })
    }
}

/// One WAL frame: an operation plus the CRC32 of its encoded form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalFrame {
    pub operation: Operation,
    pub checksum: u32,
}

/// Encodes an operation into its framed on-disk representation.
pub fn encode_frame(operation: &Operation) -> Result<Vec<u8>> {
    let encoded = operation.encode()?;
    let checksum = crc32fast::hash(&encoded);
    let frame = WalFrame {
        operation: operation.clone(),
        checksum,
    };
    bincode::serialize(&frame).map_err(|e| BurrowError::Codec {
        context: "encode WAL frame",
        source: e,
    })
}

/// Why a frame could not be produced by [`FrameReader::next_frame`].
#[derive(Debug)]
pub enum FrameError {
    /// The stream could not be decoded at this point. The reader position is
    /// undefined afterwards; callers must stop.
    Undecodable {
        index: usize,
        source: bincode::Error,
    },
    /// The frame decoded but its payload checksum did not match. The reader
    /// is positioned at the next frame; callers may skip and continue.
    ChecksumMismatch {
        index: usize,
        stored: u32,
        computed: u32,
    },
}

impl FrameError {
    /// The index of the offending frame within the stream.
    pub fn index(&self) -> usize {
        match self {
            FrameError::Undecodable { index, .. } => *index,
            FrameError::ChecksumMismatch { index, .. } => *index,
        }
    }
}

impl From<FrameError> for BurrowError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Undecodable { index, source } => BurrowError::WalCorrupted {
                index,
                reason: format!("undecodable frame: {}", source),
            },
            FrameError::ChecksumMismatch {
                index,
                stored,
                computed,
            } => BurrowError::WalCorrupted {
                index,
                reason: format!("checksum mismatch: stored={}, computed={}", stored, computed),
            },
        }
    }
}

/// Sequential reader over a WAL byte stream.
///
/// Yields each operation together with the byte range of its frame, so
/// truncation can copy surviving frames verbatim.
pub struct FrameReader<'a> {
    cursor: Cursor<&'a [u8]>,
    index: usize,
}

impl<'a> FrameReader<'a> {
    /// Creates a reader over the full WAL contents.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
            index: 0,
        }
    }

    /// Decodes the next frame. Returns `None` at a clean end of stream.
    pub fn next_frame(
        &mut self,
    ) -> Option<std::result::Result<(Operation, Range<usize>), FrameError>> {
        let start = self.cursor.position() as usize;
        if start >= self.cursor.get_ref().len() {
            return None;
        }

        let index = self.index;
        let frame: WalFrame = match bincode::deserialize_from(&mut self.cursor) {
            Ok(frame) => frame,
            Err(source) => return Some(Err(FrameError::Undecodable { index, source })),
        };
        let end = self.cursor.position() as usize;
        self.index += 1;

        let encoded = match frame.operation.encode() {
            Ok(encoded) => encoded,
            Err(_) => {
                return Some(Err(FrameError::Undecodable {
                    index,
                    source: Box::new(bincode::ErrorKind::Custom(
                        "operation re-encoding failed".to_string(),
                    )),
                }));
            }
        };
        let computed = crc32fast::hash(&encoded);
        if computed != frame.checksum {
            return Some(Err(FrameError::ChecksumMismatch {
                index,
                stored: frame.checksum,
                computed,
            }));
        }

        Some(Ok((frame.operation, start..end)))
    }
}
