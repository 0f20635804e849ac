//! Device authentication for GIP peripherals
//!
//! Genuine peripherals prove themselves through a TLS-flavored handshake
//! carried over the authenticate command: hellos with 32-byte randoms, a
//! certificate exchange, RSA key transport (v1) or ephemeral P-256 ECDH
//! (v2), and Finished values derived from a running SHA-256 transcript.
//! The exported session key ends up at the link layer, which encrypts the
//! data channel with it.
//!
//! The [`Handshake`] state machine is transport-agnostic; the session layer
//! plugs in through the [`AuthSink`] trait.

pub mod crypto;
pub mod error;
pub mod handshake;
pub mod messages;

pub use error::{AuthError, Result};
pub use handshake::{AuthSink, Handshake};
