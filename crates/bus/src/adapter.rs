//! Adapter core
//!
//! An adapter is one piece of host hardware carrying up to sixteen logical
//! clients. The transport backend hands inbound buffers to
//! [`Adapter::process_buffer`] and implements [`AdapterOps`] for the outbound
//! direction; everything in between (sessions, driver binding, chunked
//! transfers, authentication) lives here and in the session module.
//!
//! Outbound packets carry a sequence number shared per pipe across all
//! clients. Zero is reserved, so the counters skip it when they wrap.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, error, info};

use common::BufferKind;
use protocol::{AudioConfig, Command, Header, PacketIter, PowerMode, options};

use crate::config::AdapterConfig;
use crate::drivers::DriverTable;
use crate::error::{BusError, Result};
use crate::registry::Registry;

/// Lock a mutex, recovering the data from a panicked holder.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Outbound operations a transport backend provides.
///
/// Implementations are expected to hand buffers to a transport thread (see
/// `common::channel`) rather than block on the hardware; all methods are
/// called from the session path.
pub trait AdapterOps: Send + Sync + 'static {
    /// Largest buffer the hardware accepts on `kind`
    fn buffer_capacity(&self, kind: BufferKind) -> usize;

    /// Submit one fully framed buffer
    fn submit(&self, kind: BufferKind, data: Vec<u8>) -> common::Result<()>;

    /// Hand the negotiated session key to the link layer
    fn set_encryption_key(&self, key: &[u8]) -> common::Result<()>;

    /// Bring up the isochronous audio pipe
    fn enable_audio(&self) -> common::Result<()>;

    fn disable_audio(&self) -> common::Result<()>;
}

/// State shared between the adapter and its sessions
pub(crate) struct AdapterShared {
    pub(crate) ops: Arc<dyn AdapterOps>,
    pub(crate) config: AdapterConfig,
    pub(crate) drivers: DriverTable,
    data_sequence: Mutex<u8>,
    audio_sequence: Mutex<u8>,
}

impl AdapterShared {
    /// Encode and submit one data packet without touching the sequence
    /// counter; used for acknowledgments, which echo the peer's sequence.
    pub(crate) fn send_frame(&self, header: Header, payload: &[u8]) -> Result<()> {
        let mut buf = header.encode();
        buf.extend_from_slice(payload);

        let capacity = self.ops.buffer_capacity(BufferKind::Data);
        if buf.len() > capacity {
            return Err(BusError::BufferTooSmall {
                needed: buf.len(),
                available: capacity,
            });
        }

        Ok(self.ops.submit(BufferKind::Data, buf)?)
    }

    /// Assign the next data sequence number and submit the packet. The
    /// counter lock spans the submission so packets hit the transport in
    /// sequence order.
    pub(crate) fn send_data(&self, mut header: Header, payload: &[u8]) -> Result<()> {
        let mut sequence = lock(&self.data_sequence);
        while header.sequence == 0 {
            header.sequence = *sequence;
            *sequence = sequence.wrapping_add(1);
        }
        self.send_frame(header, payload)
    }

    /// Frame one interval worth of samples into sequence-numbered audio
    /// packets and submit them as a single isochronous buffer.
    pub(crate) fn send_audio_frames(
        &self,
        client_id: u8,
        config: &AudioConfig,
        samples: &[u8],
    ) -> Result<()> {
        let capacity = self.ops.buffer_capacity(BufferKind::Audio);
        let needed = samples.len().div_ceil(config.fragment_size) * config.packet_size;
        if needed > capacity {
            return Err(BusError::BufferTooSmall {
                needed,
                available: capacity,
            });
        }

        let mut buf = Vec::with_capacity(needed);
        let mut sequence = lock(&self.audio_sequence);
        for fragment in samples.chunks(config.fragment_size) {
            let mut header = Header {
                command: Command::AudioSamples.into(),
                options: client_id | options::INTERNAL,
                sequence: 0,
                packet_length: fragment.len() as u32,
                chunk_offset: 0,
            };
            while header.sequence == 0 {
                header.sequence = *sequence;
                *sequence = sequence.wrapping_add(1);
            }
            buf.extend_from_slice(&header.encode());
            buf.extend_from_slice(fragment);
        }

        Ok(self.ops.submit(BufferKind::Audio, buf)?)
    }
}

/// One host adapter and its client sessions.
pub struct Adapter {
    shared: Arc<AdapterShared>,
    sessions: Registry,
}

impl Adapter {
    pub fn new(ops: Arc<dyn AdapterOps>, config: AdapterConfig, drivers: DriverTable) -> Adapter {
        Adapter {
            shared: Arc::new(AdapterShared {
                ops,
                config,
                drivers,
                data_sequence: Mutex::new(0),
                audio_sequence: Mutex::new(0),
            }),
            sessions: Registry::default(),
        }
    }

    /// Feed one inbound transport buffer through the session layer.
    ///
    /// A malformed header or truncated packet poisons the rest of the buffer;
    /// the undecodable tail is logged and dropped, later buffers are
    /// unaffected. Per-packet errors only discard that packet.
    pub async fn process_buffer(&self, data: &[u8]) {
        let mut packets = PacketIter::new(data);
        while let Some(next) = packets.next() {
            let packet = match next {
                Ok(packet) => packet,
                Err(err) => {
                    error!(
                        %err,
                        tail = %hex::encode(&data[packets.position()..]),
                        "discarding undecodable buffer tail",
                    );
                    return;
                }
            };

            let id = packet.header.client_id();
            let session = self.sessions.get_or_create(id, &self.shared);
            match session.deliver(&packet).await {
                Ok(false) => {}
                Ok(true) => {
                    if let Some(session) = self.sessions.remove(id) {
                        session.teardown().await;
                    }
                    info!(client = id, "client disconnected");
                }
                Err(err) => {
                    error!(
                        client = id,
                        %err,
                        packet = %hex::encode(packet.payload),
                        "discarding packet",
                    );
                }
            }
        }
    }

    /// Tear down every session, detaching drivers and aborting handshakes.
    /// Called when the hardware goes away or the host shuts down.
    pub async fn teardown(&self) {
        for session in self.sessions.drain() {
            session.teardown().await;
        }
        // the transport may already be gone at this point
        if let Err(err) = self.shared.ops.disable_audio() {
            debug!(%err, "failed to disable audio during teardown");
        }
    }

    /// Power off the primary client. Wireless peripherals take their
    /// sub-devices down with them.
    pub fn power_off(&self) -> Result<()> {
        let header = Header {
            command: Command::Power.into(),
            options: options::INTERNAL,
            sequence: 0,
            packet_length: 1,
            chunk_offset: 0,
        };
        self.shared.send_data(header, &[PowerMode::Off as u8])
    }

    /// Hand a session key to the link layer directly, for transports that
    /// restore a previously negotiated key.
    pub fn set_encryption_key(&self, key: &[u8]) -> Result<()> {
        Ok(self.shared.ops.set_encryption_key(key)?)
    }
}
