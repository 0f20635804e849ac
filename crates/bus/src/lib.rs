//! Session layer for GIP adapters
//!
//! This crate sits between a transport backend and the peripheral drivers.
//! The backend feeds raw buffers into an [`Adapter`] and implements
//! [`AdapterOps`] for the outbound direction; the adapter maintains one
//! session per logical client, walks the announce/identify/authenticate
//! flow, negotiates audio formats and routes everything else to whichever
//! [`drivers::DriverOps`] implementation matched the client's class strings.

pub mod adapter;
pub mod config;
pub mod drivers;
pub mod error;
mod registry;
pub mod session;

pub use adapter::{Adapter, AdapterOps};
pub use config::AdapterConfig;
pub use drivers::{Driver, DriverOps, DriverTable};
pub use error::{BusError, Result};
pub use registry::MAX_CLIENTS;
pub use session::ClientHandle;
