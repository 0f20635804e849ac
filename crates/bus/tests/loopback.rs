//! Session layer against a scripted peripheral

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::OsRng;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};
use tracing_subscriber::prelude::*;

use auth::crypto::{TranscriptHash, prf};
use bus::{Adapter, AdapterConfig, AdapterOps, ClientHandle, Driver, DriverOps, DriverTable};
use common::BufferKind;
use protocol::{
    Acknowledge, AudioFormat, BatteryLevel, BatteryType, Header, MAX_PACKET_PAYLOAD, PacketIter,
    options, split,
};

const GAMEPAD_CLASS: &str = "Windows.Xbox.Input.Gamepad";

struct FakeTransport {
    data: Mutex<Vec<Vec<u8>>>,
    audio: Mutex<Vec<Vec<u8>>>,
    key: Mutex<Option<Vec<u8>>>,
    audio_enabled: AtomicBool,
}

impl FakeTransport {
    fn new() -> Arc<FakeTransport> {
        Arc::new(FakeTransport {
            data: Mutex::new(Vec::new()),
            audio: Mutex::new(Vec::new()),
            key: Mutex::new(None),
            audio_enabled: AtomicBool::new(false),
        })
    }

    fn take_data(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.data.lock().unwrap())
    }

    /// Decode every pending outbound data frame
    fn take_frames(&self) -> Vec<(Header, Vec<u8>)> {
        self.take_data()
            .iter()
            .map(|buf| {
                let packet = PacketIter::new(buf).next().unwrap().unwrap();
                (packet.header, packet.payload.to_vec())
            })
            .collect()
    }

    fn take_one_frame(&self) -> (Header, Vec<u8>) {
        let mut frames = self.take_frames();
        assert_eq!(frames.len(), 1, "expected exactly one outbound frame");
        frames.remove(0)
    }
}

impl AdapterOps for FakeTransport {
    fn buffer_capacity(&self, kind: BufferKind) -> usize {
        match kind {
            BufferKind::Data => 64,
            BufferKind::Audio => 1600,
        }
    }

    fn submit(&self, kind: BufferKind, data: Vec<u8>) -> common::Result<()> {
        match kind {
            BufferKind::Data => self.data.lock().unwrap().push(data),
            BufferKind::Audio => self.audio.lock().unwrap().push(data),
        }
        Ok(())
    }

    fn set_encryption_key(&self, key: &[u8]) -> common::Result<()> {
        *self.key.lock().unwrap() = Some(key.to_vec());
        Ok(())
    }

    fn enable_audio(&self) -> common::Result<()> {
        self.audio_enabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disable_audio(&self) -> common::Result<()> {
        self.audio_enabled.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct Recording {
    authenticate: bool,
    handle: Mutex<Option<ClientHandle>>,
    inputs: Mutex<Vec<(u8, Vec<u8>)>>,
    hid_reports: Mutex<Vec<Vec<u8>>>,
    battery: Mutex<Vec<(BatteryType, BatteryLevel)>>,
    guide: Mutex<Vec<bool>>,
    audio_ready: AtomicBool,
    removed: AtomicBool,
}

struct RecordingDriver(Arc<Recording>);

impl DriverOps for RecordingDriver {
    fn probe(&self, client: &ClientHandle) -> bus::Result<()> {
        *self.0.handle.lock().unwrap() = Some(client.clone());
        Ok(())
    }

    fn remove(&self, _client: &ClientHandle) {
        self.0.removed.store(true, Ordering::SeqCst);
    }

    fn battery(
        &self,
        _client: &ClientHandle,
        battery_type: BatteryType,
        level: BatteryLevel,
    ) -> bus::Result<()> {
        self.0.battery.lock().unwrap().push((battery_type, level));
        Ok(())
    }

    fn guide_button(&self, _client: &ClientHandle, pressed: bool) -> bus::Result<()> {
        self.0.guide.lock().unwrap().push(pressed);
        Ok(())
    }

    fn audio_ready(&self, _client: &ClientHandle) -> bus::Result<()> {
        self.0.audio_ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn hid_report(&self, _client: &ClientHandle, data: &[u8]) -> bus::Result<()> {
        self.0.hid_reports.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    fn input(&self, _client: &ClientHandle, command: u8, data: &[u8]) -> bus::Result<()> {
        self.0.inputs.lock().unwrap().push((command, data.to_vec()));
        Ok(())
    }

    fn handles_authentication(&self) -> bool {
        self.0.authenticate
    }
}

fn setup(authenticate: bool) -> (Adapter, Arc<FakeTransport>, Arc<Recording>) {
    let transport = FakeTransport::new();
    let recording = Arc::new(Recording {
        authenticate,
        ..Recording::default()
    });
    let mut drivers = DriverTable::new();
    drivers.register(Driver {
        name: "recording",
        class: GAMEPAD_CLASS,
        ops: Arc::new(RecordingDriver(Arc::clone(&recording))),
    });
    let adapter = Adapter::new(
        Arc::clone(&transport) as Arc<dyn AdapterOps>,
        AdapterConfig::default(),
        drivers,
    );
    (adapter, transport, recording)
}

fn frame(command: u8, opts: u8, sequence: u8, payload: &[u8]) -> Vec<u8> {
    let header = Header {
        command,
        options: opts,
        sequence,
        packet_length: payload.len() as u32,
        chunk_offset: 0,
    };
    let mut buf = header.encode();
    buf.extend_from_slice(payload);
    buf
}

fn announce_packet(vendor: u16, product: u16) -> Vec<u8> {
    let mut data = vec![0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0, 0];
    data.extend_from_slice(&vendor.to_le_bytes());
    data.extend_from_slice(&product.to_le_bytes());
    data.extend_from_slice(&[0u8; 16]);
    data
}

fn identify_packet(classes: &[&str]) -> Vec<u8> {
    let mut region = vec![0u8; 16]; // offset table
    let class_offset = region.len() as u16;
    region.push(classes.len() as u8);
    for class in classes {
        region.extend_from_slice(&(class.len() as u16).to_le_bytes());
        region.extend_from_slice(class.as_bytes());
    }
    region[10..12].copy_from_slice(&class_offset.to_le_bytes());

    let mut data = vec![0u8; 16]; // preamble
    data.extend_from_slice(&region);
    data
}

/// Walk a client through announce and identify, discarding the host's
/// identification request.
async fn bind(adapter: &Adapter, transport: &FakeTransport, product: u16) {
    adapter
        .process_buffer(&frame(0x02, options::INTERNAL, 1, &announce_packet(0x045e, product)))
        .await;
    let (request, payload) = transport.take_one_frame();
    assert_eq!(request.command, 0x04);
    assert!(request.is_internal());
    assert!(payload.is_empty());

    adapter
        .process_buffer(&frame(
            0x04,
            options::INTERNAL,
            2,
            &identify_packet(&[GAMEPAD_CLASS]),
        ))
        .await;
}

#[tokio::test]
async fn announce_triggers_identification_request() {
    let (adapter, transport, recording) = setup(false);
    bind(&adapter, &transport, 0x02d1).await;
    let handle = recording.handle.lock().unwrap().clone().expect("driver probed");
    assert_eq!(handle.announce().unwrap().product_id, 0x02d1);
    assert_eq!(handle.identify().unwrap().classes, vec![GAMEPAD_CLASS]);
    assert!(transport.take_data().is_empty());
}

#[tokio::test]
async fn bound_driver_receives_events() {
    let (adapter, transport, recording) = setup(false);
    bind(&adapter, &transport, 0x02d1).await;

    // driver-owned input report
    adapter
        .process_buffer(&frame(0x20, 0x00, 3, &[0xaa, 0xbb]))
        .await;
    assert_eq!(
        recording.inputs.lock().unwrap().as_slice(),
        &[(0x20u8, vec![0xaa, 0xbb])]
    );

    // guide button
    adapter
        .process_buffer(&frame(0x07, options::INTERNAL, 4, &[0x01, 0x5b]))
        .await;
    assert_eq!(recording.guide.lock().unwrap().as_slice(), &[true]);

    // status with battery bits
    adapter
        .process_buffer(&frame(0x03, options::INTERNAL, 5, &[0x85, 0, 0, 0]))
        .await;
    assert_eq!(
        recording.battery.lock().unwrap().as_slice(),
        &[(BatteryType::Standard, BatteryLevel::Normal)]
    );
}

#[tokio::test]
async fn acknowledgment_echoes_the_packet() {
    let (adapter, transport, _) = setup(false);
    bind(&adapter, &transport, 0x02d1).await;

    adapter
        .process_buffer(&frame(
            0x20,
            options::ACKNOWLEDGE,
            9,
            &[0u8; 14],
        ))
        .await;

    let (header, payload) = transport.take_one_frame();
    assert_eq!(header.command, 0x01);
    assert_eq!(header.sequence, 9);
    assert!(header.is_internal());
    let ack = Acknowledge::decode(&payload).unwrap();
    assert_eq!(ack.command, 0x20);
    assert_eq!(ack.received, 14);
    assert_eq!(ack.remaining, 0);
}

#[tokio::test]
async fn chunked_transfer_reassembles_and_acknowledges() {
    let (adapter, transport, recording) = setup(false);
    bind(&adapter, &transport, 0x02d1).await;

    let payload: Vec<u8> = (0..200u32).map(|i| (i % 251) as u8).collect();
    for fragment in split(&payload).unwrap() {
        let header = Header {
            command: 0x0b,
            options: options::INTERNAL | fragment.options,
            sequence: 7,
            packet_length: fragment.payload.len() as u32,
            chunk_offset: fragment.offset,
        };
        let mut buf = header.encode();
        buf.extend_from_slice(fragment.payload);
        adapter.process_buffer(&buf).await;
    }

    assert_eq!(recording.hid_reports.lock().unwrap().as_slice(), &[payload]);

    let acks: Vec<Acknowledge> = transport
        .take_frames()
        .iter()
        .map(|(header, payload)| {
            assert_eq!(header.command, 0x01);
            Acknowledge::decode(payload).unwrap()
        })
        .collect();
    // the start chunk and the final data chunk request acknowledgment
    assert_eq!(acks.len(), 2);
    assert_eq!(acks[0].received, 58);
    assert_eq!(acks[0].remaining, 142);
    assert_eq!(acks[1].received, 200);
    assert_eq!(acks[1].remaining, 0);
}

/// Counts error-level events, so a test can tell a dropped packet from a
/// silently ignored one.
#[derive(Clone, Default)]
struct ErrorCount(Arc<AtomicUsize>);

impl ErrorCount {
    fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for ErrorCount {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if *event.metadata().level() == tracing::Level::ERROR {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[tokio::test]
async fn spurious_chunk_completion_is_ignored() {
    let (adapter, transport, recording) = setup(false);
    bind(&adapter, &transport, 0x02d1).await;

    let errors = ErrorCount::default();
    let _guard =
        tracing::subscriber::set_default(tracing_subscriber::registry().with(errors.clone()));

    // empty terminator with no transfer in flight
    let header = Header {
        command: 0x0b,
        options: options::INTERNAL | options::CHUNK,
        sequence: 3,
        packet_length: 0,
        chunk_offset: 200,
    };
    adapter.process_buffer(&header.encode()).await;
    assert_eq!(errors.get(), 0);
    assert!(transport.take_data().is_empty());
    assert!(recording.hid_reports.lock().unwrap().is_empty());

    // a chunk carrying data without a transfer is still an error
    let header = Header {
        command: 0x0b,
        options: options::INTERNAL | options::CHUNK,
        sequence: 4,
        packet_length: 4,
        chunk_offset: 58,
    };
    let mut buf = header.encode();
    buf.extend_from_slice(&[1, 2, 3, 4]);
    adapter.process_buffer(&buf).await;
    assert_eq!(errors.get(), 1);
    assert!(recording.hid_reports.lock().unwrap().is_empty());
}

#[tokio::test]
async fn restarted_chunk_transfer_drops_the_stale_buffer() {
    let (adapter, transport, recording) = setup(false);
    bind(&adapter, &transport, 0x02d1).await;

    // a transfer that never completes
    let header = Header {
        command: 0x0b,
        options: options::INTERNAL
            | options::CHUNK
            | options::CHUNK_START
            | options::ACKNOWLEDGE,
        sequence: 5,
        packet_length: 10,
        chunk_offset: 500,
    };
    let mut buf = header.encode();
    buf.extend_from_slice(&[0xee; 10]);
    adapter.process_buffer(&buf).await;
    transport.take_data();

    // the restart supersedes it; only the new payload reaches the driver
    let payload: Vec<u8> = (0..100).collect();
    for fragment in split(&payload).unwrap() {
        let header = Header {
            command: 0x0b,
            options: options::INTERNAL | fragment.options,
            sequence: 6,
            packet_length: fragment.payload.len() as u32,
            chunk_offset: fragment.offset,
        };
        let mut buf = header.encode();
        buf.extend_from_slice(fragment.payload);
        adapter.process_buffer(&buf).await;
    }
    assert_eq!(recording.hid_reports.lock().unwrap().as_slice(), &[payload]);
}

#[tokio::test]
async fn status_disconnect_removes_the_driver() {
    let (adapter, transport, recording) = setup(false);
    bind(&adapter, &transport, 0x02d1).await;

    adapter
        .process_buffer(&frame(0x03, options::INTERNAL, 6, &[0x00, 0, 0, 0]))
        .await;
    assert!(recording.removed.load(Ordering::SeqCst));

    // the stale session is gone; new input goes nowhere
    adapter
        .process_buffer(&frame(0x20, 0x00, 7, &[0x01]))
        .await;
    assert!(recording.inputs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn audio_format_negotiation_and_streaming() {
    let (adapter, transport, recording) = setup(false);
    bind(&adapter, &transport, 0x02d1).await;
    let handle = recording.handle.lock().unwrap().clone().unwrap();

    handle
        .suggest_audio_format(AudioFormat::Stereo48KHz, AudioFormat::Stereo48KHz)
        .unwrap();
    let (header, payload) = transport.take_one_frame();
    assert_eq!(header.command, 0x08);
    assert_eq!(payload, vec![0x02, 0x10, 0x10]);

    // the client counters with mono; the host re-suggests the counter
    adapter
        .process_buffer(&frame(0x08, options::INTERNAL, 8, &[0x02, 0x09, 0x09]))
        .await;
    let (_, payload) = transport.take_one_frame();
    assert_eq!(payload, vec![0x02, 0x09, 0x09]);
    assert!(!recording.audio_ready.load(Ordering::SeqCst));

    // the echo seals the negotiation
    adapter
        .process_buffer(&frame(0x08, options::INTERNAL, 9, &[0x02, 0x09, 0x09]))
        .await;
    assert!(recording.audio_ready.load(Ordering::SeqCst));
    assert!(transport.audio_enabled.load(Ordering::SeqCst));

    let config = handle.audio_config_out().unwrap();
    assert_eq!(config.format, AudioFormat::Mono24KHz);
    assert_eq!(config.buffer_size, 384);

    let err = handle.send_audio_samples(&[0u8; 100]).unwrap_err();
    assert!(matches!(err, bus::BusError::InvalidAudioBuffer { .. }));

    handle.send_audio_samples(&vec![0u8; 384]).unwrap();
    let audio = std::mem::take(&mut *transport.audio.lock().unwrap());
    assert_eq!(audio.len(), 1);
    let packets: Vec<_> = PacketIter::new(&audio[0]).map(Result::unwrap).collect();
    assert_eq!(packets.len(), 8);
    assert!(packets.iter().all(|p| p.payload.len() == 48));
}

#[tokio::test]
async fn chat_headset_uses_the_reduced_format_command() {
    let (adapter, transport, recording) = setup(false);
    bind(&adapter, &transport, 0x0111).await;
    let handle = recording.handle.lock().unwrap().clone().unwrap();

    handle
        .suggest_audio_format(AudioFormat::Stereo48KHz, AudioFormat::Stereo48KHz)
        .unwrap();
    let (_, payload) = transport.take_one_frame();
    assert_eq!(payload, vec![0x01, 0x04]);

    adapter
        .process_buffer(&frame(0x08, options::INTERNAL, 10, &[0x01, 0x04]))
        .await;
    assert!(recording.audio_ready.load(Ordering::SeqCst));
    assert_eq!(
        handle.audio_config_out().unwrap().format,
        AudioFormat::Mono24KHz
    );

    // chat headsets manage their own hardware volume
    handle.fix_audio_volume().unwrap();
    assert!(transport.take_data().is_empty());
}

// device-side helpers for the authentication exchange

fn be16(data: &[u8]) -> u16 {
    u16::from_be_bytes([data[0], data[1]])
}

fn ack_msg() -> Vec<u8> {
    vec![0x00, 0xc1, 0x00, 0x00, 0x00, 0x00]
}

fn client_msg(command: u8, version: u8, payload: &[u8]) -> Vec<u8> {
    let mut msg = vec![0x00, 0xc0, 0x00, command];
    msg.extend_from_slice(&((payload.len() + 4) as u16).to_be_bytes());
    msg.push(command);
    msg.push(version);
    msg.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    msg.extend_from_slice(payload);
    msg
}

fn host_transcript(msg: &[u8]) -> &[u8] {
    &msg[6..msg.len() - 8]
}

fn build_cert(key: &RsaPrivateKey) -> Vec<u8> {
    let public = key.to_public_key();
    let modulus = rsa::traits::PublicKeyParts::n(&public).to_bytes_be();
    let exponent = rsa::traits::PublicKeyParts::e(&public).to_bytes_be();
    assert_eq!(modulus.len(), 256);

    let mut cert = vec![0x5au8; 120];
    cert.extend_from_slice(&[0x30, 0x82, 0x01, 0x0a]);
    cert.extend_from_slice(&[0x02, 0x82, 0x01, 0x01, 0x00]);
    cert.extend_from_slice(&modulus);
    cert.extend_from_slice(&[0x02, 0x03]);
    let mut exp = [0u8; 3];
    exp[3 - exponent.len()..].copy_from_slice(&exponent);
    cert.extend_from_slice(&exp);
    cert.resize(1024, 0x00);
    cert
}

/// Feed one handshake message into the adapter, chunked like a real client
/// would send it.
async fn send_auth(adapter: &Adapter, data: &[u8]) {
    if data.len() <= MAX_PACKET_PAYLOAD {
        adapter
            .process_buffer(&frame(0x06, options::INTERNAL, 1, data))
            .await;
        return;
    }
    for fragment in split(data).unwrap() {
        let header = Header {
            command: 0x06,
            options: options::INTERNAL | fragment.options,
            sequence: 1,
            packet_length: fragment.payload.len() as u32,
            chunk_offset: fragment.offset,
        };
        let mut buf = header.encode();
        buf.extend_from_slice(fragment.payload);
        adapter.process_buffer(&buf).await;
    }
}

/// Reassemble outbound authenticate frames back into handshake messages,
/// skipping the acknowledgments the session layer emits.
#[derive(Default)]
struct AuthCollector {
    chunk: Option<Vec<u8>>,
    total: usize,
    messages: Vec<Vec<u8>>,
}

impl AuthCollector {
    fn drain(&mut self, transport: &FakeTransport) {
        for (header, payload) in transport.take_frames() {
            if header.command != 0x06 {
                continue;
            }
            if !header.is_chunk() {
                self.messages.push(payload);
                continue;
            }
            if header.is_chunk_start() {
                self.total = header.chunk_offset as usize;
                self.chunk = Some(payload);
            } else if payload.is_empty() {
                let data = self.chunk.take().expect("terminator without transfer");
                assert_eq!(data.len(), self.total);
                self.messages.push(data);
            } else {
                self.chunk.as_mut().expect("chunk without start").extend_from_slice(&payload);
            }
        }
    }

    /// Wait out the background key exchange for the next message.
    async fn next(&mut self, transport: &FakeTransport) -> Vec<u8> {
        for _ in 0..500 {
            self.drain(transport);
            if !self.messages.is_empty() {
                return self.messages.remove(0);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for a handshake message");
    }
}

#[tokio::test]
async fn authentication_runs_over_the_session_layer() {
    let rsa_key = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
    let (adapter, transport, _recording) = setup(true);
    let mut collector = AuthCollector::default();
    let mut device = TranscriptHash::new();

    bind(&adapter, &transport, 0x02d1).await;

    let hello = collector.next(&transport).await;
    assert_eq!(hello[3], 0x01);
    assert_eq!(hello.len(), 6 + 4 + 40 + 8);
    let host_random = hello[10..42].to_vec();
    device.update(host_transcript(&hello));

    send_auth(&adapter, &ack_msg()).await;
    let request = collector.next(&transport).await;
    assert_eq!(request[1], 0x42);
    assert_eq!(request[3], 0x02);
    assert_eq!(be16(&request[4..6]), 84);

    let client_random = [0x66u8; 32];
    let mut payload = client_random.to_vec();
    payload.extend_from_slice(&[0u8; 48]);
    let msg = client_msg(0x02, 0x01, &payload);
    send_auth(&adapter, &msg).await;
    device.update(&msg[6..]);

    let request = collector.next(&transport).await;
    assert_eq!(request[3], 0x03);

    let msg = client_msg(0x03, 0x01, &build_cert(&rsa_key));
    send_auth(&adapter, &msg).await;
    device.update(&msg[6..]);

    // the RSA exchange runs on a background task
    let secret_msg = collector.next(&transport).await;
    assert_eq!(secret_msg[3], 0x05);
    let encrypted = &secret_msg[10..secret_msg.len() - 8];
    let premaster = rsa_key.decrypt(Pkcs1v15Encrypt, encrypted).unwrap();
    assert_eq!(premaster.len(), 48);

    let mut seed = host_random;
    seed.extend_from_slice(&client_random);
    let master = prf(&premaster, "Master Secret", &seed, 48);
    device.update(host_transcript(&secret_msg));

    let digest = device.digest();
    send_auth(&adapter, &ack_msg()).await;
    let finish_msg = collector.next(&transport).await;
    assert_eq!(finish_msg[3], 0x07);
    assert_eq!(
        &finish_msg[10..42],
        &prf(&master, "Host Finished", &digest, 32)[..]
    );
    device.update(host_transcript(&finish_msg));

    send_auth(&adapter, &ack_msg()).await;
    let request = collector.next(&transport).await;
    assert_eq!(request[3], 0x08);

    let finished = prf(&master, "Device Finished", &device.digest(), 32);
    let mut payload = finished;
    payload.extend_from_slice(&[0u8; 32]);
    send_auth(&adapter, &client_msg(0x08, 0x01, &payload)).await;

    let complete = collector.next(&transport).await;
    assert_eq!(complete, vec![0x01, 0x00]);

    let key = transport.key.lock().unwrap().clone().expect("key installed");
    assert_eq!(
        key,
        prf(
            &master,
            "EXPORTER DAWN data channel session key for controller",
            &seed,
            16,
        )
    );
}
