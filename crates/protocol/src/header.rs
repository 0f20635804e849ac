//! Packet header codec
//!
//! Every GIP packet starts with a three-byte fixed prefix (command, options,
//! sequence) followed by a varint packet length and, for chunked packets, a
//! varint chunk offset. The encoded header is always padded to an even number
//! of bytes for DMA alignment on the transport side: the final varint byte
//! gets its continuation bit set and a zero byte is appended.
//!
//! Transport buffers commonly carry several packets back to back; use
//! [`PacketIter`] to walk them.

use crate::error::{ProtocolError, Result};
use crate::varint::{get_varint, put_varint};

/// Fixed header prefix: command, options, sequence
pub const MIN_HEADER_LEN: usize = 3;

/// Option flags carried in the header options byte.
///
/// The low four bits address the logical sub-device (client id).
pub mod options {
    /// Request an acknowledgment from the receiver
    pub const ACKNOWLEDGE: u8 = 1 << 4;
    /// Command is defined by the protocol itself, not a peripheral driver
    pub const INTERNAL: u8 = 1 << 5;
    /// First packet of a chunked transfer
    pub const CHUNK_START: u8 = 1 << 6;
    /// Packet belongs to a chunked transfer
    pub const CHUNK: u8 = 1 << 7;
    /// Mask for the sub-device address
    pub const CLIENT_ID: u8 = 0x0f;
}

/// Decoded packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub command: u8,
    pub options: u8,
    pub sequence: u8,
    pub packet_length: u32,
    /// Present only when [`options::CHUNK`] is set. For a chunk-start packet
    /// and the empty terminating chunk this field carries the total transfer
    /// length instead of an offset.
    pub chunk_offset: u32,
}

impl Header {
    /// Logical sub-device address from the options byte
    pub fn client_id(&self) -> u8 {
        self.options & options::CLIENT_ID
    }

    pub fn is_internal(&self) -> bool {
        self.options & options::INTERNAL != 0
    }

    pub fn is_chunk(&self) -> bool {
        self.options & options::CHUNK != 0
    }

    pub fn is_chunk_start(&self) -> bool {
        self.options & options::CHUNK_START != 0
    }

    pub fn wants_acknowledge(&self) -> bool {
        self.options & options::ACKNOWLEDGE != 0
    }

    /// Encode the header into its minimal even-length byte form.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(10);
        buf.push(self.command);
        buf.push(self.options);
        buf.push(self.sequence);
        put_varint(&mut buf, self.packet_length);
        if self.is_chunk() {
            put_varint(&mut buf, self.chunk_offset);
        }

        if buf.len() % 2 != 0 {
            // extend the last varint with an empty continuation group
            let last = buf.len() - 1;
            buf[last] |= 0x80;
            buf.push(0);
        }

        buf
    }

    /// Decode a header from the front of `data`.
    ///
    /// Returns the header and its encoded length. A buffer shorter than the
    /// fixed prefix is a fatal parse error for that buffer.
    pub fn decode(data: &[u8]) -> Result<(Header, usize)> {
        if data.len() < MIN_HEADER_LEN {
            return Err(ProtocolError::HeaderTooShort {
                actual: data.len(),
                minimum: MIN_HEADER_LEN,
            });
        }

        let command = data[0];
        let options = data[1];
        let sequence = data[2];

        let (packet_length, mut used) = get_varint(&data[MIN_HEADER_LEN..])?;
        used += MIN_HEADER_LEN;

        let mut chunk_offset = 0;
        if options & options::CHUNK != 0 {
            let (offset, offset_len) = get_varint(&data[used..])?;
            chunk_offset = offset;
            used += offset_len;
        }

        Ok((
            Header {
                command,
                options,
                sequence,
                packet_length,
                chunk_offset,
            },
            used,
        ))
    }
}

/// A single packet sliced out of a transport buffer
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    pub header: Header,
    pub payload: &'a [u8],
}

/// Iterator over back-to-back packets in one transport buffer.
///
/// Stops cleanly when fewer than three bytes remain. A malformed header or a
/// packet length running past the buffer is yielded as an error once; the
/// corrupt tail is not retried.
pub struct PacketIter<'a> {
    data: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> PacketIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            failed: false,
        }
    }

    /// Offset of the next undecoded byte, for diagnostics.
    pub fn position(&self) -> usize {
        self.pos
    }
}

impl<'a> Iterator for PacketIter<'a> {
    type Item = Result<Packet<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.data.len() - self.pos < MIN_HEADER_LEN {
            return None;
        }

        let rest = &self.data[self.pos..];
        let (header, header_len) = match Header::decode(rest) {
            Ok(decoded) => decoded,
            Err(err) => {
                self.failed = true;
                return Some(Err(err));
            }
        };

        let total = header_len + header.packet_length as usize;
        if total > rest.len() {
            self.failed = true;
            return Some(Err(ProtocolError::TruncatedPacket {
                declared: header.packet_length as usize,
                available: rest.len() - header_len,
            }));
        }

        self.pos += total;
        Some(Ok(Packet {
            header,
            payload: &rest[header_len..total],
        }))
    }
}
