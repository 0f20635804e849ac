//! Common utilities for the GIP host stack
//!
//! This crate provides shared functionality between the session layer and
//! transport backends: error handling, logging setup and the async channel
//! bridge for transport thread communication.

pub mod channel;
pub mod error;
pub mod logging;

pub use channel::{
    BufferKind, TransportBridge, TransportCommand, TransportEvent, TransportWorker,
    create_transport_bridge,
};
pub use error::{Error, Result};
pub use logging::setup_logging;
