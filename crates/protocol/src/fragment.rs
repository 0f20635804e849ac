//! Fragmentation and reassembly
//!
//! Payloads larger than [`MAX_PACKET_PAYLOAD`] travel as a chunked transfer:
//! a chunk-start packet whose offset field declares the total length, data
//! chunks at increasing offsets, and an empty terminating chunk that repeats
//! the total. The final data-bearing chunk additionally requests an
//! acknowledgment so the peer can report the remaining byte count.

use crate::error::{ProtocolError, Result};
use crate::header::options;

/// Largest payload that fits a single packet on the weakest transport
pub const MAX_PACKET_PAYLOAD: usize = 58;

/// Largest chunked transfer the receiver will buffer
pub const MAX_CHUNK_TRANSFER: usize = 0xffff;

/// One outbound fragment of a chunked transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment<'a> {
    /// Chunk option bits to merge into the header options byte
    pub options: u8,
    /// Value for the header chunk-offset field
    pub offset: u32,
    pub payload: &'a [u8],
}

/// Split `payload` into the wire fragments of one chunked transfer.
///
/// The caller is responsible for only invoking this for payloads that do not
/// fit a single packet; a short payload still produces a valid (single data
/// chunk) transfer.
pub fn split(payload: &[u8]) -> Result<Vec<Fragment<'_>>> {
    let total = payload.len();
    if total > MAX_CHUNK_TRANSFER {
        return Err(ProtocolError::ChunkTooLarge {
            total,
            max: MAX_CHUNK_TRANSFER,
        });
    }

    let mut fragments = Vec::with_capacity(total / MAX_PACKET_PAYLOAD + 2);
    let mut offset = 0usize;
    while offset < total {
        let end = usize::min(offset + MAX_PACKET_PAYLOAD, total);
        let first = offset == 0;
        let last_data = end == total;

        let mut opts = options::CHUNK;
        if first {
            // the start chunk declares the transfer length in its offset field
            opts |= options::CHUNK_START | options::ACKNOWLEDGE;
        }
        if last_data {
            opts |= options::ACKNOWLEDGE;
        }

        fragments.push(Fragment {
            options: opts,
            offset: if first { total as u32 } else { offset as u32 },
            payload: &payload[offset..end],
        });
        offset = end;
    }

    // empty terminator, offset repeats the total length
    fragments.push(Fragment {
        options: options::CHUNK,
        offset: total as u32,
        payload: &[],
    });

    Ok(fragments)
}

/// Reassembly buffer for one inbound chunked transfer.
///
/// Owned by a single client session; dropped the moment the transfer
/// completes or fails.
#[derive(Debug)]
pub struct ChunkBuffer {
    data: Vec<u8>,
    complete: bool,
}

impl ChunkBuffer {
    /// Allocate for a transfer whose start chunk declared `total` bytes.
    pub fn new(total: usize) -> Result<ChunkBuffer> {
        if total > MAX_CHUNK_TRANSFER {
            return Err(ProtocolError::ChunkTooLarge {
                total,
                max: MAX_CHUNK_TRANSFER,
            });
        }
        Ok(ChunkBuffer {
            data: vec![0; total],
            complete: false,
        })
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Hand out the reassembled payload once the terminator arrived.
    pub fn into_data(self) -> Vec<u8> {
        debug_assert!(self.complete);
        self.data
    }

    /// Copy one chunk into place, or mark the buffer complete for the empty
    /// terminating chunk.
    ///
    /// `lenient_total` tolerates terminators whose reported total disagrees
    /// with the declared capacity; some peripherals get this wrong.
    pub fn write(&mut self, offset: usize, chunk: &[u8], lenient_total: bool) -> Result<()> {
        if offset + chunk.len() > self.data.len() {
            return Err(ProtocolError::ChunkOverflow {
                offset,
                length: chunk.len(),
                capacity: self.data.len(),
            });
        }

        if chunk.is_empty() {
            if offset == self.data.len() || lenient_total {
                self.complete = true;
                return Ok(());
            }
            return Err(ProtocolError::ChunkTotalMismatch {
                reported: offset,
                expected: self.data.len(),
            });
        }

        self.data[offset..offset + chunk.len()].copy_from_slice(chunk);
        Ok(())
    }
}
