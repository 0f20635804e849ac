//! Session layer error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    /// Wire-level parse failure
    #[error(transparent)]
    Protocol(#[from] protocol::ProtocolError),

    /// Authentication handshake failure
    #[error(transparent)]
    Auth(#[from] auth::AuthError),

    /// Transport backend failure
    #[error("Adapter error: {0}")]
    Adapter(#[from] common::Error),

    /// Encoded packet does not fit the transport buffer
    #[error("Send buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// Audio samples submitted before format negotiation finished
    #[error("Audio stream is not configured")]
    AudioNotReady,

    /// Audio sample block does not match the negotiated buffer size
    #[error("Invalid audio buffer: {actual} bytes (expected {expected})")]
    InvalidAudioBuffer { actual: usize, expected: usize },

    /// Driver callback failure, attributed to the bound driver
    #[error("Driver `{driver}` failed: {message}")]
    Driver {
        driver: &'static str,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, BusError>;
