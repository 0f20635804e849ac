//! Device authentication handshake
//!
//! The host drives the whole exchange: it sends its hello, requests the
//! client's hello, certificate and (for v2) public key, performs the key
//! exchange and verifies the Finished values against the running transcript.
//! Progress is ack-driven; the client acknowledges every host data message
//! and the acknowledgment determines the next step.
//!
//! A v1-addressed client that actually speaks v2 answers the first hello
//! with mismatched handshake and data commands. The host then restarts the
//! transcript and reissues its hello under the v2 command set. This upgrade
//! happens at most once per handshake.
//!
//! The expensive public-key operations run on blocking tasks so the session
//! layer never stalls; the task transmits the follow-up packet itself once
//! the math is done.

use std::sync::{Arc, Mutex};

use rand::RngCore;
use rand::rngs::OsRng;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::crypto::{
    self, ECDH_PUBKEY_LEN, RANDOM_LEN, SECRET_LEN, SESSION_KEY_LEN, TRANSCRIPT_LEN,
    TranscriptHash, prf,
};
use crate::error::{AuthError, Result};
use crate::messages::{
    self, DATA_HEADER_LEN, DataHeader, HANDSHAKE_HEADER_LEN, HandshakeHeader, options, v1, v2,
};

const LABEL_MASTER: &str = "Master Secret";
const LABEL_HOST_FINISHED: &str = "Host Finished";
const LABEL_DEVICE_FINISHED: &str = "Device Finished";
const LABEL_SESSION_KEY: &str = "EXPORTER DAWN data channel session key for controller";

/// Outbound path from the handshake into the session layer.
pub trait AuthSink: Send + Sync + 'static {
    /// Transmit one authenticate packet, optionally requesting a
    /// protocol-level acknowledgment.
    fn send_authenticate(&self, data: &[u8], acknowledge: bool) -> Result<()>;

    /// Hand the negotiated session key to the link layer.
    fn install_session_key(&self, key: &[u8]) -> Result<()>;
}

struct State {
    last_sent: u8,
    upgraded: bool,
    failed: bool,
    transcript: TranscriptHash,
    random_host: [u8; RANDOM_LEN],
    random_client: [u8; RANDOM_LEN],
    master_secret: Option<[u8; SECRET_LEN]>,
}

impl State {
    fn new() -> State {
        State {
            last_sent: 0,
            upgraded: false,
            failed: false,
            transcript: TranscriptHash::new(),
            random_host: [0; RANDOM_LEN],
            random_client: [0; RANDOM_LEN],
            master_secret: None,
        }
    }

    fn seed(&self) -> Vec<u8> {
        let mut seed = Vec::with_capacity(RANDOM_LEN * 2);
        seed.extend_from_slice(&self.random_host);
        seed.extend_from_slice(&self.random_client);
        seed
    }
}

/// One handshake instance, owned by a client session.
pub struct Handshake {
    sink: Arc<dyn AuthSink>,
    state: Arc<Mutex<State>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

fn send_data(state: &mut State, sink: &dyn AuthSink, command: u8, payload: &[u8]) -> Result<()> {
    let msg = messages::build_data(command, payload);
    state.transcript.update(messages::transcript_range(&msg));
    state.last_sent = command;
    sink.send_authenticate(&msg, true)
}

fn send_request(sink: &dyn AuthSink, command: u8, expected_len: usize) -> Result<()> {
    sink.send_authenticate(&messages::build_request(command, expected_len), true)
}

fn send_finish(state: &mut State, sink: &dyn AuthSink, command: u8) -> Result<()> {
    let master = state
        .master_secret
        .ok_or(AuthError::UnexpectedCommand(command))?;
    let digest = state.transcript.digest();
    let finished = prf(&master, LABEL_HOST_FINISHED, &digest, TRANSCRIPT_LEN);
    send_data(state, sink, command, &finished)
}

impl Handshake {
    pub fn new(sink: Arc<dyn AuthSink>) -> Handshake {
        Handshake {
            sink,
            state: Arc::new(Mutex::new(State::new())),
            task: Mutex::new(None),
        }
    }

    /// Kick off the exchange with a v1 host hello.
    pub fn start(&self) -> Result<()> {
        let mut state = self.lock_state();
        OsRng.fill_bytes(&mut state.random_host);

        let mut payload = [0u8; v1::HOST_HELLO_LEN];
        payload[..RANDOM_LEN].copy_from_slice(&state.random_host);
        send_data(&mut state, self.sink.as_ref(), v1::HOST_HELLO, &payload)
    }

    /// Feed one inbound authenticate packet into the state machine.
    pub fn process(&self, data: &[u8]) -> Result<()> {
        let header = HandshakeHeader::decode(data)?;
        let mut state = self.lock_state();

        if state.failed {
            debug!("ignoring handshake packet after failure");
            return Ok(());
        }

        if header.error != 0 {
            state.failed = true;
            return Err(AuthError::PeerError(header.error));
        }

        if header.options & options::ACKNOWLEDGE != 0 {
            return self.handle_ack(&mut state);
        }

        let result = self.handle_data(&mut state, data);
        if result.is_err() {
            state.failed = true;
        }
        result
    }

    /// Abort and await the in-flight crypto task, if any.
    pub async fn shutdown(&self) {
        let task = self.take_task();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
    }

    /// Wait for the in-flight crypto task to finish.
    pub async fn flush(&self) {
        let task = self.take_task();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn take_task(&self) -> Option<JoinHandle<()>> {
        match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    fn handle_ack(&self, state: &mut State) -> Result<()> {
        let sink = self.sink.as_ref();
        match state.last_sent {
            v1::HOST_HELLO => send_request(sink, v1::CLIENT_HELLO, v1::CLIENT_HELLO_LEN),
            v1::HOST_SECRET => send_finish(state, sink, v1::HOST_FINISH),
            v1::HOST_FINISH => send_request(sink, v1::CLIENT_FINISH, v1::CLIENT_FINISH_LEN),
            v2::HOST_HELLO => send_request(sink, v2::CLIENT_HELLO, v2::CLIENT_HELLO_LEN),
            v2::HOST_PUBKEY => send_finish(state, sink, v2::HOST_FINISH),
            v2::HOST_FINISH => send_request(sink, v2::CLIENT_FINISH, v2::CLIENT_FINISH_LEN),
            other => Err(AuthError::UnexpectedAck(other)),
        }
    }

    fn handle_data(&self, state: &mut State, data: &[u8]) -> Result<()> {
        let header = HandshakeHeader::decode(data)?;
        let inner = DataHeader::decode(&data[HANDSHAKE_HEADER_LEN..])?;

        // a v2 client answers the v1 hello with mismatched commands
        if header.command != inner.command {
            return self.upgrade(state);
        }

        let payload = &data[HANDSHAKE_HEADER_LEN + DATA_HEADER_LEN..];
        self.dispatch(state, inner.command, payload)?;

        // everything from the data header onward feeds the transcript,
        // after dispatch so requests go out against the prior digest
        state.transcript.update(&data[HANDSHAKE_HEADER_LEN..]);
        Ok(())
    }

    fn upgrade(&self, state: &mut State) -> Result<()> {
        if state.upgraded {
            return Err(AuthError::RepeatedUpgrade);
        }
        debug!("protocol upgrade to v2");

        state.upgraded = true;
        state.transcript.reset();
        OsRng.fill_bytes(&mut state.random_host);

        let mut payload = [0u8; v2::HOST_HELLO_LEN];
        payload[..RANDOM_LEN].copy_from_slice(&state.random_host);
        send_data(state, self.sink.as_ref(), v2::HOST_HELLO, &payload)
    }

    fn dispatch(&self, state: &mut State, command: u8, payload: &[u8]) -> Result<()> {
        let sink = self.sink.as_ref();
        match command {
            v1::CLIENT_HELLO => {
                if payload.len() < v1::CLIENT_HELLO_LEN {
                    return Err(AuthError::Malformed("short client hello"));
                }
                state.random_client.copy_from_slice(&payload[..RANDOM_LEN]);
                send_request(sink, v1::CLIENT_CERTIFICATE, v1::CERTIFICATE_MAX_LEN)
            }
            v1::CLIENT_CERTIFICATE => {
                if payload.len() > v1::CERTIFICATE_MAX_LEN {
                    return Err(AuthError::Malformed("oversized certificate"));
                }
                let pubkey = crypto::extract_rsa_pubkey(payload)?;
                self.spawn_rsa(state, pubkey);
                Ok(())
            }
            v2::CLIENT_HELLO => {
                if payload.len() < v2::CLIENT_HELLO_LEN {
                    return Err(AuthError::Malformed("short client hello"));
                }
                state.random_client.copy_from_slice(&payload[..RANDOM_LEN]);
                send_request(sink, v2::CLIENT_CERTIFICATE, v2::CERTIFICATE_LEN)
            }
            v2::CLIENT_CERTIFICATE => {
                if payload.len() < v2::CERTIFICATE_LEN {
                    return Err(AuthError::Malformed("short certificate"));
                }
                debug!(
                    chip = %String::from_utf8_lossy(&payload[v2::CERT_CHIP]),
                    revision = %String::from_utf8_lossy(&payload[v2::CERT_REVISION]),
                    "client certificate",
                );
                send_request(sink, v2::CLIENT_PUBKEY, v2::CLIENT_PUBKEY_LEN)
            }
            v2::CLIENT_PUBKEY => {
                if payload.len() < v2::CLIENT_PUBKEY_LEN {
                    return Err(AuthError::Malformed("short client pubkey"));
                }
                let mut peer = [0u8; ECDH_PUBKEY_LEN];
                peer.copy_from_slice(&payload[..ECDH_PUBKEY_LEN]);
                self.spawn_ecdh(peer);
                Ok(())
            }
            v1::CLIENT_FINISH | v2::CLIENT_FINISH => {
                if payload.len() < v1::CLIENT_FINISH_LEN {
                    return Err(AuthError::Malformed("short client finish"));
                }
                self.verify_finish(state, &payload[..TRANSCRIPT_LEN])
            }
            other => Err(AuthError::UnexpectedCommand(other)),
        }
    }

    fn verify_finish(&self, state: &mut State, finished: &[u8]) -> Result<()> {
        let master = state
            .master_secret
            .ok_or(AuthError::UnexpectedCommand(v1::CLIENT_FINISH))?;
        let digest = state.transcript.digest();
        let expected = prf(&master, LABEL_DEVICE_FINISHED, &digest, TRANSCRIPT_LEN);

        if finished != expected.as_slice() {
            return Err(AuthError::FinishedMismatch);
        }

        let key = prf(&master, LABEL_SESSION_KEY, &state.seed(), SESSION_KEY_LEN);
        self.sink.send_authenticate(&messages::build_complete(), false)?;
        self.sink.install_session_key(&key)
    }

    /// Encrypt a fresh premaster to the client's RSA key and derive the
    /// master secret, then send the host secret message.
    fn spawn_rsa(&self, state: &State, pubkey: rsa::RsaPublicKey) {
        let seed = state.seed();
        let shared_state = Arc::clone(&self.state);
        let sink = Arc::clone(&self.sink);

        self.store_task(tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || {
                let mut premaster = [0u8; SECRET_LEN];
                OsRng.fill_bytes(&mut premaster);
                let encrypted = crypto::encrypt_premaster(&pubkey, &premaster)?;
                let master = prf(&premaster, LABEL_MASTER, &seed, SECRET_LEN);
                Ok::<_, AuthError>((encrypted, master))
            })
            .await;

            finish_exchange(&shared_state, sink.as_ref(), v1::HOST_SECRET, result);
        }));
    }

    /// Run the ECDH exchange against the client's point and derive the
    /// master secret, then send the host pubkey message.
    fn spawn_ecdh(&self, peer: [u8; ECDH_PUBKEY_LEN]) {
        let shared_state = Arc::clone(&self.state);
        let sink = Arc::clone(&self.sink);

        self.store_task(tokio::spawn(async move {
            let seed = match shared_state.lock() {
                Ok(state) => state.seed(),
                Err(poisoned) => poisoned.into_inner().seed(),
            };

            let result = tokio::task::spawn_blocking(move || {
                let (pubkey, secret_hash) = crypto::ecdh_exchange(&peer)?;
                let master = prf(&secret_hash, LABEL_MASTER, &seed, SECRET_LEN);
                Ok::<_, AuthError>((pubkey.to_vec(), master))
            })
            .await;

            finish_exchange(&shared_state, sink.as_ref(), v2::HOST_PUBKEY, result);
        }));
    }

    fn store_task(&self, task: JoinHandle<()>) {
        let mut slot = match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(task);
    }
}

type ExchangeOutput = std::result::Result<Result<(Vec<u8>, Vec<u8>)>, tokio::task::JoinError>;

fn finish_exchange(state: &Mutex<State>, sink: &dyn AuthSink, command: u8, result: ExchangeOutput) {
    let mut state = match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    let (payload, master) = match result {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => {
            error!(%err, "key exchange failed");
            state.failed = true;
            return;
        }
        Err(err) => {
            debug!(%err, "key exchange task cancelled");
            return;
        }
    };

    if state.failed {
        return;
    }

    let mut secret = [0u8; SECRET_LEN];
    secret.copy_from_slice(&master);
    state.master_secret = Some(secret);

    if let Err(err) = send_data(&mut state, sink, command, &payload) {
        warn!(%err, "failed to send key exchange packet");
        state.failed = true;
    }
}
