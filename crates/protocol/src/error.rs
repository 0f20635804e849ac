//! Protocol error types

use thiserror::Error;

/// Wire-level errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Buffer shorter than the fixed header prefix
    #[error("Header too short: {actual} bytes (minimum {minimum})")]
    HeaderTooShort { actual: usize, minimum: usize },

    /// Varint continuation ran past the supported width
    #[error("Varint too long or overflows 32 bits")]
    VarintOverflow,

    /// Varint field truncated mid-value
    #[error("Truncated varint")]
    TruncatedVarint,

    /// Declared packet length exceeds the remaining buffer
    #[error("Truncated packet: header declares {declared} payload bytes, {available} available")]
    TruncatedPacket { declared: usize, available: usize },

    /// Chunk data would land outside the reassembly buffer
    #[error("Chunk overflow: offset {offset} + length {length} exceeds capacity {capacity}")]
    ChunkOverflow {
        offset: usize,
        length: usize,
        capacity: usize,
    },

    /// Chunk transfer total larger than the protocol allows
    #[error("Chunk transfer too large: {total} bytes (max {max})")]
    ChunkTooLarge { total: usize, max: usize },

    /// Chunk data arrived with no transfer in progress
    #[error("Chunk without a pending transfer")]
    UnexpectedChunk,

    /// Terminating chunk disagreed with the declared transfer length
    #[error("Chunk total mismatch: terminator reports {reported}, buffer holds {expected}")]
    ChunkTotalMismatch { reported: usize, expected: usize },

    /// Fixed-size packet body shorter than its definition
    #[error("Invalid packet length: {actual} bytes (expected {expected})")]
    InvalidPacketLength { actual: usize, expected: usize },

    /// Capability table offset or count points outside the payload
    #[error("Invalid info element at offset {offset}")]
    InvalidInfoElement { offset: usize },

    /// Audio format byte not understood
    #[error("Unknown audio format: {0:#04x}")]
    UnknownAudioFormat(u8),

    /// Audio control subcommand byte not understood
    #[error("Unknown audio control subcommand: {0:#04x}")]
    UnknownAudioControl(u8),

    /// Audio format negotiation violated protocol state
    #[error("Audio format already negotiated")]
    AudioFormatNegotiated,
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
