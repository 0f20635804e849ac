//! Client sessions
//!
//! Each logical sub-device gets one session, created on first contact and
//! dropped when the peripheral reports disconnection. A session walks the
//! announce, identify and (driver permitting) authentication flow, reassembles
//! chunked transfers and routes everything else to the bound driver.
//!
//! Packets for one session are processed strictly in order; the state lock is
//! held across delivery, so driver callbacks never run concurrently for the
//! same client.

use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use auth::{AuthError, AuthSink, Handshake};
use protocol::audio::{self, AudioConfig, AudioControl, AudioFormat, ChatFormat};
use protocol::{
    Acknowledge, Announce, ChunkBuffer, Command, Header, Identify, Led, MAX_PACKET_PAYLOAD, Packet,
    PowerMode, ProtocolError, Rumble, SerialNumber, Status, VirtualKey, options, split,
};

use crate::adapter::{AdapterShared, lock};
use crate::drivers::Driver;
use crate::error::{BusError, Result};

/// Chat headsets negotiate audio through the reduced format command and
/// manage their own hardware volume
const CHAT_HEADSET_PRODUCT: u16 = 0x0111;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Connected,
    Announced,
    Identified,
    Disconnected,
}

struct ChunkTransfer {
    command: u8,
    buffer: ChunkBuffer,
}

struct SessionState {
    phase: Phase,
    chunk: Option<ChunkTransfer>,
    driver: Option<Driver>,
    handshake: Option<Arc<Handshake>>,
}

/// One client session. Owned by the adapter registry; driver callbacks see
/// it through [`ClientHandle`].
pub struct ClientSession {
    id: u8,
    shared: Arc<AdapterShared>,
    state: Mutex<SessionState>,
    // leaf fields behind std mutexes so ClientHandle can read them from
    // driver callbacks while the state lock is held
    announce: StdMutex<Option<Announce>>,
    identify: StdMutex<Option<Identify>>,
    pending_format: StdMutex<Option<(AudioFormat, AudioFormat)>>,
    audio_in: StdMutex<Option<AudioConfig>>,
    audio_out: StdMutex<Option<AudioConfig>>,
}

impl ClientSession {
    pub(crate) fn new(id: u8, shared: Arc<AdapterShared>) -> Arc<ClientSession> {
        Arc::new(ClientSession {
            id,
            shared,
            state: Mutex::new(SessionState {
                phase: Phase::Connected,
                chunk: None,
                driver: None,
                handshake: None,
            }),
            announce: StdMutex::new(None),
            identify: StdMutex::new(None),
            pending_format: StdMutex::new(None),
            audio_in: StdMutex::new(None),
            audio_out: StdMutex::new(None),
        })
    }

    /// Process one inbound packet. Returns true when the session reported
    /// disconnection and must be unregistered.
    pub(crate) async fn deliver(self: &Arc<Self>, packet: &Packet<'_>) -> Result<bool> {
        let mut state = self.state.lock().await;

        // a stale handle may race teardown; the torn-down session drops
        // everything
        if state.phase == Phase::Disconnected {
            return Ok(false);
        }

        if packet.header.is_chunk() {
            let Some(data) = self.reassemble(&mut state, packet)? else {
                return Ok(false);
            };
            return self.dispatch(
                &mut state,
                packet.header.command,
                packet.header.is_internal(),
                &data,
            );
        }

        if packet.header.wants_acknowledge() {
            self.acknowledge(&packet.header, packet.header.packet_length as u16, 0)?;
        }
        self.dispatch(
            &mut state,
            packet.header.command,
            packet.header.is_internal(),
            packet.payload,
        )
    }

    /// Detach the driver and abort an in-flight handshake.
    pub(crate) async fn teardown(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        if let Some(handshake) = state.handshake.take() {
            handshake.shutdown().await;
        }
        if let Some(driver) = state.driver.take() {
            let handle = ClientHandle {
                session: Arc::clone(self),
            };
            driver.ops.remove(&handle);
        }
        state.phase = Phase::Disconnected;
    }

    /// Fold one chunk into the transfer buffer, returning the reassembled
    /// payload once the terminator arrived. Acknowledgments go out before the
    /// chunk data is copied.
    fn reassemble(
        &self,
        state: &mut SessionState,
        packet: &Packet<'_>,
    ) -> Result<Option<Vec<u8>>> {
        let header = &packet.header;

        if header.is_chunk_start() {
            if state.chunk.is_some() {
                warn!(client = self.id, "dropping unfinished chunked transfer");
            }
            let total = header.chunk_offset as usize;
            let mut transfer = ChunkTransfer {
                command: header.command,
                buffer: ChunkBuffer::new(total)?,
            };
            self.acknowledge(
                header,
                packet.payload.len() as u16,
                total.saturating_sub(packet.payload.len()) as u16,
            )?;
            transfer.buffer.write(0, packet.payload, false)?;
            state.chunk = Some(transfer);
            return Ok(None);
        }

        let Some(transfer) = state.chunk.as_mut() else {
            // some peripherals repeat the empty terminator after a transfer
            // already completed
            if packet.payload.is_empty() {
                debug!(client = self.id, "ignoring spurious chunk completion");
                return Ok(None);
            }
            return Err(ProtocolError::UnexpectedChunk.into());
        };
        if header.command != transfer.command {
            state.chunk = None;
            return Err(ProtocolError::UnexpectedChunk.into());
        }

        if header.wants_acknowledge() {
            self.acknowledge(header, transfer.buffer.capacity() as u16, 0)?;
        }

        let lenient = self.shared.config.lenient_chunk_totals;
        if let Err(err) = transfer
            .buffer
            .write(header.chunk_offset as usize, packet.payload, lenient)
        {
            state.chunk = None;
            return Err(err.into());
        }

        if transfer.buffer.is_complete() {
            if let Some(transfer) = state.chunk.take() {
                return Ok(Some(transfer.buffer.into_data()));
            }
        }
        Ok(None)
    }

    fn acknowledge(&self, header: &Header, received: u16, remaining: u16) -> Result<()> {
        let ack = Acknowledge {
            command: header.command,
            options: self.id | options::INTERNAL,
            received,
            remaining,
        };
        let reply = Header {
            command: Command::Acknowledge.into(),
            options: self.id | options::INTERNAL,
            sequence: header.sequence,
            packet_length: Acknowledge::WIRE_LEN as u32,
            chunk_offset: 0,
        };
        self.shared.send_frame(reply, &ack.encode())
    }

    fn dispatch(
        self: &Arc<Self>,
        state: &mut SessionState,
        command: u8,
        internal: bool,
        payload: &[u8],
    ) -> Result<bool> {
        if !internal {
            self.driver_event(state, |driver, handle| {
                driver.ops.input(handle, command, payload)
            });
            return Ok(false);
        }

        match Command::from_byte(command) {
            Some(Command::Acknowledge) => {
                let ack = Acknowledge::decode(payload)?;
                debug!(
                    client = self.id,
                    command = ack.command,
                    received = ack.received,
                    remaining = ack.remaining,
                    "acknowledged",
                );
            }
            Some(Command::Announce) => self.handle_announce(state, payload)?,
            Some(Command::Status) => return self.handle_status(state, payload),
            Some(Command::Identify) => self.handle_identify(state, payload)?,
            Some(Command::VirtualKey) => {
                let key = VirtualKey::decode(payload)?;
                self.driver_event(state, |driver, handle| {
                    driver.ops.guide_button(handle, key.pressed)
                });
            }
            Some(Command::AudioControl) => self.handle_audio_control(state, payload)?,
            Some(Command::HidReport) => {
                self.driver_event(state, |driver, handle| driver.ops.hid_report(handle, payload));
            }
            Some(Command::AudioSamples) => {
                self.driver_event(state, |driver, handle| {
                    driver.ops.audio_samples(handle, payload)
                });
            }
            Some(Command::SerialNumber) => {
                let serial = SerialNumber::decode(payload)?;
                info!(client = self.id, serial = %serial.serial, "serial number");
            }
            Some(Command::Firmware) => {
                debug!(client = self.id, "ignoring firmware packet");
            }
            Some(Command::Authenticate) => self.handle_authenticate(state, payload),
            Some(other) => {
                debug!(client = self.id, command = ?other, "ignoring unexpected internal packet");
            }
            None => {
                debug!(client = self.id, command, "ignoring unknown internal command");
            }
        }
        Ok(false)
    }

    /// Run one driver callback, attributing failures to the driver instead
    /// of the packet.
    fn driver_event<F>(self: &Arc<Self>, state: &SessionState, event: F)
    where
        F: FnOnce(&Driver, &ClientHandle) -> Result<()>,
    {
        let Some(driver) = state.driver.as_ref() else {
            return;
        };
        let handle = ClientHandle {
            session: Arc::clone(self),
        };
        if let Err(err) = event(driver, &handle) {
            error!(client = self.id, driver = driver.name, %err, "driver callback failed");
        }
    }

    fn handle_announce(&self, state: &mut SessionState, payload: &[u8]) -> Result<()> {
        let announce = Announce::decode(payload)?;
        if state.phase != Phase::Connected {
            warn!(client = self.id, "repeated announce, restarting identification");
        }
        info!(
            client = self.id,
            vendor = announce.vendor_id,
            product = announce.product_id,
            "client announced",
        );
        *lock(&self.announce) = Some(announce);
        state.phase = Phase::Announced;

        self.send_internal(Command::Identify, &[])
    }

    fn handle_status(
        self: &Arc<Self>,
        state: &mut SessionState,
        payload: &[u8],
    ) -> Result<bool> {
        let status = Status::decode(payload)?;
        if !status.connected {
            state.phase = Phase::Disconnected;
            return Ok(true);
        }
        self.driver_event(state, |driver, handle| {
            driver
                .ops
                .battery(handle, status.battery_type, status.battery_level)
        });
        Ok(false)
    }

    fn handle_identify(self: &Arc<Self>, state: &mut SessionState, payload: &[u8]) -> Result<()> {
        if state.phase != Phase::Announced {
            debug!(client = self.id, "ignoring identification outside announce flow");
            return Ok(());
        }
        let identify = Identify::decode(payload)?;
        state.phase = Phase::Identified;

        let driver = self.shared.drivers.find(&identify.classes).cloned();
        let classes = identify.classes.clone();
        *lock(&self.identify) = Some(identify);

        let Some(driver) = driver else {
            warn!(client = self.id, classes = ?classes, "no driver for client");
            return Ok(());
        };
        info!(client = self.id, driver = driver.name, "driver bound");

        if driver.ops.handles_authentication() {
            let sink = Arc::new(SessionSender {
                shared: Arc::clone(&self.shared),
                id: self.id,
            });
            let handshake = Arc::new(Handshake::new(sink));
            match handshake.start() {
                Ok(()) => state.handshake = Some(handshake),
                Err(err) => error!(client = self.id, %err, "failed to start authentication"),
            }
        }

        state.driver = Some(driver);
        self.driver_event(state, |driver, handle| driver.ops.probe(handle));
        Ok(())
    }

    fn handle_audio_control(
        self: &Arc<Self>,
        state: &mut SessionState,
        payload: &[u8],
    ) -> Result<()> {
        match AudioControl::decode(payload)? {
            AudioControl::Format { input, output } => self.handle_format(state, input, output),
            AudioControl::FormatChat { in_out } => self.handle_format_chat(state, in_out),
            AudioControl::Volume { input, output, .. }
            | AudioControl::VolumeChat { input, output, .. } => {
                self.driver_event(state, |driver, handle| {
                    driver.ops.audio_volume(handle, input, output)
                });
                Ok(())
            }
        }
    }

    /// The client either echoed our format suggestion (accepted) or countered
    /// with the formats it supports, which we then suggest back.
    fn handle_format(
        self: &Arc<Self>,
        state: &mut SessionState,
        input: u8,
        output: u8,
    ) -> Result<()> {
        if lock(&self.audio_in).is_some() {
            return Err(ProtocolError::AudioFormatNegotiated.into());
        }
        let input = AudioFormat::from_byte(input)?;
        let output = AudioFormat::from_byte(output)?;

        if lock(&self.pending_format).take() == Some((input, output)) {
            return self.configure_audio(state, input, output);
        }

        *lock(&self.pending_format) = Some((input, output));
        self.send_internal(Command::AudioControl, &audio::encode_format(input, output))
    }

    fn handle_format_chat(
        self: &Arc<Self>,
        state: &mut SessionState,
        in_out: u8,
    ) -> Result<()> {
        if lock(&self.audio_in).is_some() {
            return Err(ProtocolError::AudioFormatNegotiated.into());
        }
        if in_out != ChatFormat::Khz24 as u8 {
            warn!(client = self.id, format = in_out, "unsupported chat audio format");
            return Ok(());
        }
        self.configure_audio(state, AudioFormat::Mono24KHz, AudioFormat::Mono24KHz)
    }

    fn configure_audio(
        self: &Arc<Self>,
        state: &SessionState,
        input: AudioFormat,
        output: AudioFormat,
    ) -> Result<()> {
        let count = self.shared.config.audio_packet_count;
        *lock(&self.audio_in) = Some(AudioConfig::new(input, count));
        *lock(&self.audio_out) = Some(AudioConfig::new(output, count));
        self.shared.ops.enable_audio()?;

        info!(client = self.id, ?input, ?output, "audio format negotiated");
        self.driver_event(state, |driver, handle| driver.ops.audio_ready(handle));
        Ok(())
    }

    fn handle_authenticate(&self, state: &mut SessionState, payload: &[u8]) {
        let Some(handshake) = state.handshake.as_ref() else {
            debug!(client = self.id, "ignoring authenticate packet without handshake");
            return;
        };
        // the handshake fails closed internally; the session keeps running
        if let Err(err) = handshake.process(payload) {
            error!(client = self.id, %err, "authentication failed");
        }
    }

    fn send_internal(&self, command: Command, payload: &[u8]) -> Result<()> {
        let header = Header {
            command: command.into(),
            options: self.id | options::INTERNAL,
            sequence: 0,
            packet_length: payload.len() as u32,
            chunk_offset: 0,
        };
        self.shared.send_data(header, payload)
    }
}

/// Outbound path from the authentication handshake into the session layer.
/// Large messages (certificates) go out as chunked transfers.
struct SessionSender {
    shared: Arc<AdapterShared>,
    id: u8,
}

impl SessionSender {
    fn transport(&self, err: BusError) -> AuthError {
        AuthError::Transport(err.to_string())
    }
}

impl AuthSink for SessionSender {
    fn send_authenticate(&self, data: &[u8], acknowledge: bool) -> auth::Result<()> {
        let command = Command::Authenticate.into();

        if data.len() <= MAX_PACKET_PAYLOAD {
            let mut opts = self.id | options::INTERNAL;
            if acknowledge {
                opts |= options::ACKNOWLEDGE;
            }
            let header = Header {
                command,
                options: opts,
                sequence: 0,
                packet_length: data.len() as u32,
                chunk_offset: 0,
            };
            return self
                .shared
                .send_data(header, data)
                .map_err(|err| self.transport(err));
        }

        let fragments = split(data).map_err(|err| self.transport(err.into()))?;
        for fragment in fragments {
            let header = Header {
                command,
                options: self.id | options::INTERNAL | fragment.options,
                sequence: 0,
                packet_length: fragment.payload.len() as u32,
                chunk_offset: fragment.offset,
            };
            self.shared
                .send_data(header, fragment.payload)
                .map_err(|err| self.transport(err))?;
        }
        Ok(())
    }

    fn install_session_key(&self, key: &[u8]) -> auth::Result<()> {
        info!(client = self.id, "authentication complete");
        self.shared
            .ops
            .set_encryption_key(key)
            .map_err(|err| AuthError::Transport(err.to_string()))
    }
}

/// Driver-facing view of one client session.
#[derive(Clone)]
pub struct ClientHandle {
    session: Arc<ClientSession>,
}

impl ClientHandle {
    pub fn id(&self) -> u8 {
        self.session.id
    }

    /// Hardware identity from the announce packet
    pub fn announce(&self) -> Option<Announce> {
        lock(&self.session.announce).clone()
    }

    /// Parsed identification data: capabilities, classes, interfaces
    pub fn identify(&self) -> Option<Identify> {
        lock(&self.session.identify).clone()
    }

    pub fn audio_config_in(&self) -> Option<AudioConfig> {
        *lock(&self.session.audio_in)
    }

    pub fn audio_config_out(&self) -> Option<AudioConfig> {
        *lock(&self.session.audio_out)
    }

    pub fn power_mode(&self, mode: PowerMode) -> Result<()> {
        self.session.send_internal(Command::Power, &[mode as u8])
    }

    pub fn led(&self, led: Led) -> Result<()> {
        self.session.send_internal(Command::Led, &led.encode())
    }

    pub fn rumble(&self, rumble: Rumble) -> Result<()> {
        self.session.send_internal(Command::Rumble, &rumble.encode())
    }

    /// Open audio format negotiation. Chat headsets only understand the
    /// reduced chat format command.
    pub fn suggest_audio_format(&self, input: AudioFormat, output: AudioFormat) -> Result<()> {
        if self.is_chat_headset() {
            return self.session.send_internal(
                Command::AudioControl,
                &audio::encode_format_chat(ChatFormat::Khz24),
            );
        }
        *lock(&self.session.pending_format) = Some((input, output));
        self.session
            .send_internal(Command::AudioControl, &audio::encode_format(input, output))
    }

    /// Pin the hardware volume to the maximum so the host mixer is the only
    /// volume control in the path.
    pub fn fix_audio_volume(&self) -> Result<()> {
        if self.is_chat_headset() {
            return Ok(());
        }
        self.session
            .send_internal(Command::AudioControl, &audio::encode_volume(100, 100))
    }

    /// Submit one interval worth of outbound samples. The block must match
    /// the negotiated buffer size exactly; on error the caller skips the
    /// cycle and retries with the next interval.
    pub fn send_audio_samples(&self, samples: &[u8]) -> Result<()> {
        let config = (*lock(&self.session.audio_out)).ok_or(BusError::AudioNotReady)?;
        if samples.len() != config.buffer_size {
            return Err(BusError::InvalidAudioBuffer {
                actual: samples.len(),
                expected: config.buffer_size,
            });
        }
        self.session
            .shared
            .send_audio_frames(self.session.id, &config, samples)
    }

    fn is_chat_headset(&self) -> bool {
        lock(&self.session.announce)
            .as_ref()
            .map(|announce| announce.product_id)
            == Some(CHAT_HEADSET_PRODUCT)
    }
}
