//! Authentication error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Handshake message shorter than its header or declared body
    #[error("Malformed handshake message: {0}")]
    Malformed(&'static str),

    /// Acknowledgment arrived for a message the host never sent
    #[error("Unexpected acknowledgment for command {0:#04x}")]
    UnexpectedAck(u8),

    /// Handshake command outside the active protocol version
    #[error("Unexpected handshake command {0:#04x}")]
    UnexpectedCommand(u8),

    /// Peer reported an error in the handshake header
    #[error("Peer reported handshake error {0:#04x}")]
    PeerError(u8),

    /// Peer tried to upgrade the protocol more than once
    #[error("Repeated protocol upgrade")]
    RepeatedUpgrade,

    /// No usable public key found in the peer certificate
    #[error("Invalid peer certificate")]
    CertificateInvalid,

    /// Peer public key rejected by the curve implementation
    #[error("Invalid peer public key")]
    PublicKeyInvalid,

    /// RSA key construction or encryption failed
    #[error("RSA operation failed: {0}")]
    Rsa(#[from] rsa::Error),

    /// Peer Finished value disagreed with the transcript
    #[error("Finished verification failed")]
    FinishedMismatch,

    /// Outbound packet could not be handed to the session layer
    #[error("Transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;
