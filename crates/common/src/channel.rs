//! Async channel bridge between the Tokio runtime and a transport thread
//!
//! Transport backends (wired dongles, wireless radios) typically run their
//! own blocking thread around the hardware API. The bridge carries fully
//! framed packet buffers in both directions so neither side needs to know
//! how the other schedules its work.

use async_channel::{Receiver, Sender, bounded};

/// Which hardware pipe a buffer travels on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Data,
    Audio,
}

/// Commands from the Tokio runtime to the transport thread
#[derive(Debug)]
pub enum TransportCommand {
    /// Submit one framed packet buffer to the hardware
    Submit {
        kind: BufferKind,
        data: Vec<u8>,
    },

    /// Hand the negotiated session key to the link layer
    SetEncryptionKey {
        key: Vec<u8>,
    },

    /// Enable the isochronous audio pipe
    EnableAudio,

    /// Disable the isochronous audio pipe
    DisableAudio,

    /// Shutdown the transport thread gracefully
    Shutdown,
}

/// Events from the transport thread
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// One received transport buffer, possibly holding several packets
    Received {
        data: Vec<u8>,
    },

    /// The hardware went away; the adapter must tear down all sessions
    Removed,
}

/// Handle for the Tokio runtime (async)
#[derive(Clone)]
pub struct TransportBridge {
    cmd_tx: Sender<TransportCommand>,
    event_rx: Receiver<TransportEvent>,
}

impl TransportBridge {
    /// Send a command to the transport thread
    pub async fn send_command(&self, cmd: TransportCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive an event from the transport thread
    pub async fn recv_event(&self) -> crate::Result<TransportEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Handle for the transport thread (blocking)
pub struct TransportWorker {
    pub(crate) cmd_rx: Receiver<TransportCommand>,
    /// Event sender (public for the transport thread to access)
    pub event_tx: Sender<TransportEvent>,
}

impl TransportWorker {
    /// Receive a command from the Tokio runtime (blocking)
    pub fn recv_command(&self) -> crate::Result<TransportCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<TransportCommand> {
        self.cmd_rx.try_recv().ok()
    }

    /// Send an event to the Tokio runtime (blocking)
    pub fn send_event(&self, event: TransportEvent) -> crate::Result<()> {
        self.event_tx
            .send_blocking(event)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Create the channel bridge between Tokio and the transport thread
///
/// Returns (TransportBridge for Tokio, TransportWorker for the transport thread)
pub fn create_transport_bridge() -> (TransportBridge, TransportWorker) {
    let (cmd_tx, cmd_rx) = bounded(256);
    let (event_tx, event_rx) = bounded(256);

    (
        TransportBridge { cmd_tx, event_rx },
        TransportWorker { cmd_rx, event_tx },
    )
}
