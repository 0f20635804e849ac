//! Handshake message framing
//!
//! Every handshake message starts with a 6-byte header (context, options,
//! error, command, big-endian length). Data messages nest a 4-byte data
//! header (command, version, big-endian payload length) inside, and
//! host-originated messages end in an 8-byte zero trailer that v1 clients
//! require. Request frames carry no data header; their length field holds
//! the expected size of the reply's data section.

use crate::error::{AuthError, Result};

pub const HANDSHAKE_HEADER_LEN: usize = 6;
pub const DATA_HEADER_LEN: usize = 4;
pub const TRAILER_LEN: usize = 8;

/// Message contexts
pub mod context {
    pub const HANDSHAKE: u8 = 0x00;
    pub const CONTROL: u8 = 0x01;
}

/// Option bits in the handshake header
pub mod options {
    pub const ACKNOWLEDGE: u8 = 1 << 0;
    pub const REQUEST: u8 = 1 << 1;
    pub const FROM_HOST: u8 = 1 << 6;
    pub const FROM_CLIENT: u8 = (1 << 6) | (1 << 7);
}

/// v1 (RSA key transport) handshake commands
pub mod v1 {
    pub const HOST_HELLO: u8 = 0x01;
    pub const CLIENT_HELLO: u8 = 0x02;
    pub const CLIENT_CERTIFICATE: u8 = 0x03;
    pub const HOST_SECRET: u8 = 0x05;
    pub const HOST_FINISH: u8 = 0x07;
    pub const CLIENT_FINISH: u8 = 0x08;

    /// Host hello payload: 32 random bytes plus two reserved words
    pub const HOST_HELLO_LEN: usize = 40;
    pub const CLIENT_HELLO_LEN: usize = 80;
    pub const CERTIFICATE_MAX_LEN: usize = 1024;
    pub const CLIENT_FINISH_LEN: usize = 64;
}

/// v2 (ECDH) handshake commands
pub mod v2 {
    pub const HOST_HELLO: u8 = 0x21;
    pub const CLIENT_HELLO: u8 = 0x22;
    pub const CLIENT_CERTIFICATE: u8 = 0x23;
    pub const CLIENT_PUBKEY: u8 = 0x24;
    pub const HOST_PUBKEY: u8 = 0x25;
    pub const HOST_FINISH: u8 = 0x26;
    pub const CLIENT_FINISH: u8 = 0x27;

    /// Host hello payload: 32 random bytes plus one reserved word
    pub const HOST_HELLO_LEN: usize = 36;
    pub const CLIENT_HELLO_LEN: usize = 172;
    pub const CERTIFICATE_LEN: usize = 768;
    pub const CLIENT_PUBKEY_LEN: usize = 128;
    pub const CLIENT_FINISH_LEN: usize = 64;

    /// Offsets of the chip and revision strings in the certificate
    pub const CERT_CHIP: std::ops::Range<usize> = 140..172;
    pub const CERT_REVISION: std::ops::Range<usize> = 172..192;
}

/// Control commands (context 1)
pub mod control {
    pub const COMPLETE: u8 = 0x00;
    pub const RESET: u8 = 0x01;
}

/// Decoded 6-byte handshake header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeHeader {
    pub context: u8,
    pub options: u8,
    pub error: u8,
    pub command: u8,
    pub length: u16,
}

impl HandshakeHeader {
    pub fn decode(data: &[u8]) -> Result<HandshakeHeader> {
        if data.len() < HANDSHAKE_HEADER_LEN {
            return Err(AuthError::Malformed("short handshake header"));
        }
        Ok(HandshakeHeader {
            context: data[0],
            options: data[1],
            error: data[2],
            command: data[3],
            length: u16::from_be_bytes([data[4], data[5]]),
        })
    }
}

/// Decoded 4-byte data header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    pub command: u8,
    pub version: u8,
    pub length: u16,
}

impl DataHeader {
    pub fn decode(data: &[u8]) -> Result<DataHeader> {
        if data.len() < DATA_HEADER_LEN {
            return Err(AuthError::Malformed("short data header"));
        }
        Ok(DataHeader {
            command: data[0],
            version: data[1],
            length: u16::from_be_bytes([data[2], data[3]]),
        })
    }
}

fn protocol_version(command: u8) -> u8 {
    if command >= v2::HOST_HELLO { 0x02 } else { 0x01 }
}

/// Assemble a host data message: handshake header, data header, payload,
/// zero trailer.
pub fn build_data(command: u8, payload: &[u8]) -> Vec<u8> {
    let data_len = (DATA_HEADER_LEN + payload.len()) as u16;

    let mut msg = Vec::with_capacity(
        HANDSHAKE_HEADER_LEN + DATA_HEADER_LEN + payload.len() + TRAILER_LEN,
    );
    msg.push(context::HANDSHAKE);
    msg.push(options::ACKNOWLEDGE | options::FROM_HOST);
    msg.push(0); // error
    msg.push(command);
    msg.extend_from_slice(&data_len.to_be_bytes());

    msg.push(command);
    msg.push(protocol_version(command));
    msg.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    msg.extend_from_slice(payload);

    msg.extend_from_slice(&[0u8; TRAILER_LEN]);
    msg
}

/// Assemble a request frame asking the client for `command` with an
/// `expected_len`-byte body.
pub fn build_request(command: u8, expected_len: usize) -> Vec<u8> {
    let data_len = (DATA_HEADER_LEN + expected_len) as u16;

    let mut msg = Vec::with_capacity(HANDSHAKE_HEADER_LEN + TRAILER_LEN);
    msg.push(context::HANDSHAKE);
    msg.push(options::REQUEST | options::FROM_HOST);
    msg.push(0);
    msg.push(command);
    msg.extend_from_slice(&data_len.to_be_bytes());
    msg.extend_from_slice(&[0u8; TRAILER_LEN]);
    msg
}

/// Assemble the control message announcing handshake completion.
pub fn build_complete() -> [u8; 2] {
    [context::CONTROL, control::COMPLETE]
}

/// Bytes covered by the transcript hash in a sent data message: the data
/// header and payload, excluding the trailer.
pub fn transcript_range(msg: &[u8]) -> &[u8] {
    &msg[HANDSHAKE_HEADER_LEN..msg.len() - TRAILER_LEN]
}
