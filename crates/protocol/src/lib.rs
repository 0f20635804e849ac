//! Wire protocol for GIP peripherals
//!
//! This crate implements the pure, I/O-free parts of the game input protocol:
//! header and varint codecs, payload fragmentation and reassembly, command
//! bytes, identification parsing and the fixed-layout internal packets. The
//! session layer in the `bus` crate drives these against a transport.
//!
//! # Example
//!
//! ```
//! use protocol::{Header, PacketIter};
//!
//! let header = Header {
//!     command: 0x20,
//!     options: 0x00,
//!     sequence: 1,
//!     packet_length: 3,
//!     chunk_offset: 0,
//! };
//!
//! let mut buf = header.encode();
//! buf.extend_from_slice(&[0x01, 0x02, 0x03]);
//!
//! let packet = PacketIter::new(&buf).next().unwrap().unwrap();
//! assert_eq!(packet.header, header);
//! assert_eq!(packet.payload, &[0x01, 0x02, 0x03]);
//! ```

pub mod audio;
pub mod command;
pub mod error;
pub mod fragment;
pub mod header;
pub mod identify;
pub mod packets;
pub mod varint;

pub use audio::{AudioConfig, AudioControl, AudioFormat, ChatFormat};
pub use command::Command;
pub use error::{ProtocolError, Result};
pub use fragment::{ChunkBuffer, Fragment, MAX_CHUNK_TRANSFER, MAX_PACKET_PAYLOAD, split};
pub use header::{Header, MIN_HEADER_LEN, Packet, PacketIter, options};
pub use identify::{Identify, InterfaceGuid};
pub use packets::{
    Acknowledge, Announce, BatteryLevel, BatteryType, Led, LedMode, PowerMode, Rumble,
    SerialNumber, Status, Version, VirtualKey,
};
