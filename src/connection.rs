//! A single session's connection: dials the transport, runs the Noise
//! handshake, then pairs or resumes, and finally pumps application nodes.
//!
//! Two cooperative tasks per connection: the receive loop (decrypts and
//! decodes inbound frames) and the driver (sequences handshake, pairing or
//! resume, then steady state). They talk over a bounded node channel; the
//! supervisor listens on the connection's event channel.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, info, warn};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde_json::json;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{timeout, timeout_at, Instant};

use crate::binary::{self, Attrs, Node, NodeContent};
use crate::config::Config;
use crate::crypto::key_pair::KeyPair;
use crate::framing::FrameDecoder;
use crate::noise::{self, HandshakeError};
use crate::socket::{NoiseSocket, SocketError};
use crate::store::{CredentialStore, Credentials, Owner, StoreError};
use crate::transport::{Transport, TransportEvent, TransportFactory};

/// Inbound queue capacity between the receive loop and the driver.
const NODE_QUEUE_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Authenticated,
}

/// Lifecycle notifications delivered to the supervisor. Emitted from the
/// connection's own tasks; the receiver drains them promptly, nothing here
/// blocks on external work.
#[derive(Debug)]
pub enum ConnectionEvent {
    QrReady { qr: String, pairing_ref: String },
    Ready { owner: Owner, resumed: bool },
    PersistFailed { reason: String },
    Node(Node),
    Closed { error: Option<String> },
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Dial failed: {0}")]
    DialFailed(String),
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    #[error("QR pairing window expired")]
    QrExpired,
    #[error("Server rejected the session resume")]
    ResumeRejected,
    #[error("Connection is not authenticated")]
    NotConnected,
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Binary codec error: {0}")]
    Codec(#[from] binary::BinaryError),
}

pub type Result<T> = std::result::Result<T, ConnectionError>;

pub struct Connection {
    session_id: String,
    config: Config,
    store: Arc<CredentialStore>,
    transport_factory: Arc<dyn TransportFactory>,
    events_tx: mpsc::Sender<ConnectionEvent>,

    state: RwLock<ConnectionState>,
    noise_socket: Mutex<Option<Arc<NoiseSocket>>>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    /// Outbound frames are strictly serialised; one writer at a time.
    write_lock: Mutex<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl Connection {
    pub fn new(
        session_id: String,
        config: Config,
        store: Arc<CredentialStore>,
        transport_factory: Arc<dyn TransportFactory>,
        events_tx: mpsc::Sender<ConnectionEvent>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            session_id,
            config,
            store,
            transport_factory,
            events_tx,
            state: RwLock::new(ConnectionState::Disconnected),
            noise_socket: Mutex::new(None),
            transport: Mutex::new(None),
            write_lock: Mutex::new(()),
            shutdown_tx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read().expect("state lock poisoned")
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write().expect("state lock poisoned") = state;
    }

    /// Dials, performs the handshake, then pairs or resumes, and pumps
    /// nodes until the transport dies or the connection is closed. Always
    /// leaves the connection `Disconnected` and emits `Closed` on exit.
    pub async fn run(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let result = tokio::select! {
            res = self.clone().run_inner() => res,
            _ = shutdown_rx.wait_for(|stop| *stop) => Ok(()),
        };

        if let Some(transport) = self.transport.lock().await.take() {
            transport.disconnect().await;
        }
        *self.noise_socket.lock().await = None;
        self.set_state(ConnectionState::Disconnected);

        let error = match result {
            Ok(()) => None,
            Err(e) => {
                warn!("Session {}: connection failed: {e}", self.session_id);
                Some(e.to_string())
            }
        };
        let _ = self.events_tx.send(ConnectionEvent::Closed { error }).await;
    }

    async fn run_inner(self: Arc<Self>) -> Result<()> {
        self.set_state(ConnectionState::Connecting);

        // A credential load failure degrades to a fresh pairing.
        let creds = match self.store.load(&self.session_id).await {
            Ok(creds) => creds,
            Err(e) => {
                warn!(
                    "Session {}: failed to load credentials, falling back to pairing: {e}",
                    self.session_id
                );
                None
            }
        };

        let static_kp = creds
            .as_ref()
            .map(|c| c.noise_key.clone())
            .unwrap_or_default();
        let resume_payload = creds
            .as_ref()
            .map(|c| {
                serde_json::to_vec(&json!({
                    "registrationId": c.registration_id,
                    "id": c.me.id,
                }))
                .unwrap_or_default()
            })
            .unwrap_or_default();

        let (transport, mut transport_events) = self
            .transport_factory
            .create_transport()
            .await
            .map_err(|e| ConnectionError::DialFailed(e.to_string()))?;
        *self.transport.lock().await = Some(transport.clone());

        let (socket, ephemeral_public) = noise::do_handshake(
            &static_kp,
            resume_payload,
            transport,
            &mut transport_events,
        )
        .await?;
        *self.noise_socket.lock().await = Some(socket.clone());
        self.set_state(ConnectionState::Connected);
        info!("Session {}: transport established", self.session_id);

        let (node_tx, mut node_rx) = mpsc::channel(NODE_QUEUE_CAPACITY);
        tokio::task::spawn(receive_loop(
            self.session_id.clone(),
            transport_events,
            socket.clone(),
            node_tx,
        ));

        let (owner, resumed) = match creds {
            Some(creds) => match self.resume(&creds, &mut node_rx).await {
                Ok(()) => (creds.me.clone(), true),
                Err(e) => {
                    warn!(
                        "Session {}: resume failed ({e}), falling back to pairing",
                        self.session_id
                    );
                    let owner = self
                        .pair(&static_kp, &ephemeral_public, &mut node_rx)
                        .await?;
                    (owner, false)
                }
            },
            None => {
                let owner = self
                    .pair(&static_kp, &ephemeral_public, &mut node_rx)
                    .await?;
                (owner, false)
            }
        };

        self.set_state(ConnectionState::Authenticated);
        info!(
            "Session {}: authenticated as {} (resumed: {resumed})",
            self.session_id, owner.id
        );
        let _ = self
            .events_tx
            .send(ConnectionEvent::Ready { owner, resumed })
            .await;

        // Steady state: forward inbound nodes to the supervisor until the
        // receive loop ends.
        while let Some(node) = node_rx.recv().await {
            let _ = self.events_tx.send(ConnectionEvent::Node(node)).await;
        }
        Ok(())
    }

    /// QR pairing: emits the pairing string and waits for the server's
    /// auth message, persisting fresh credentials on success.
    async fn pair(
        &self,
        static_kp: &KeyPair,
        ephemeral_public: &[u8; 32],
        node_rx: &mut mpsc::Receiver<Node>,
    ) -> Result<Owner> {
        let pairing_ref: String = rand::rng()
            .sample_iter(Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        let qr = format!(
            "2@{pairing_ref},{},{}",
            BASE64.encode(ephemeral_public),
            self.session_id
        );

        debug!("Session {}: QR ready", self.session_id);
        let _ = self
            .events_tx
            .send(ConnectionEvent::QrReady {
                qr,
                pairing_ref: pairing_ref.clone(),
            })
            .await;

        let deadline = Instant::now() + self.config.qr_timeout;
        let owner = loop {
            let node = match timeout_at(deadline, node_rx.recv()).await {
                Ok(Some(node)) => node,
                Ok(None) => return Err(ConnectionError::NotConnected),
                Err(_) => return Err(ConnectionError::QrExpired),
            };

            if node.tag == "success" {
                match parse_owner(&node) {
                    Some(owner) => break owner,
                    None => {
                        warn!(
                            "Session {}: auth message missing owner jid, still waiting",
                            self.session_id
                        );
                    }
                }
            } else {
                debug!(
                    "Session {}: ignoring {:?} node during pairing wait",
                    self.session_id, node.tag
                );
            }
        };

        let creds = Credentials::generate(static_kp.clone(), owner.clone());
        if let Err(e) = self.store.save(&self.session_id, &creds).await {
            // Paired in memory but not on disk; the session will not
            // survive a restart.
            warn!(
                "Session {}: failed to persist credentials: {e}",
                self.session_id
            );
            let _ = self
                .events_tx
                .send(ConnectionEvent::PersistFailed {
                    reason: e.to_string(),
                })
                .await;
        }
        Ok(owner)
    }

    /// Resume with persisted credentials: one `iq` round-trip carrying the
    /// opaque resume token.
    async fn resume(&self, creds: &Credentials, node_rx: &mut mpsc::Receiver<Node>) -> Result<()> {
        let mut attrs = Attrs::new();
        attrs.insert("id".into(), "resume-1".into());
        attrs.insert("type".into(), "set".into());
        attrs.insert("to".into(), "s.whatsapp.net".into());
        attrs.insert("xmlns".into(), "auth".into());
        let node = Node::new(
            "iq",
            attrs,
            Some(NodeContent::Bytes(creds.adv_secret_key.clone())),
        );
        self.send_node_unchecked(&node).await?;

        match timeout(self.config.resume_timeout, node_rx.recv()).await {
            Ok(Some(response)) => {
                let accepted = response.tag == "success"
                    || (response.tag == "iq" && response.get_attr("type") == Some("result"));
                if accepted {
                    Ok(())
                } else {
                    Err(ConnectionError::ResumeRejected)
                }
            }
            Ok(None) => Err(ConnectionError::NotConnected),
            Err(_) => Err(ConnectionError::ResumeRejected),
        }
    }

    /// Sends an application node. Only valid once authenticated.
    pub async fn send_node(&self, node: &Node) -> Result<()> {
        if self.state() != ConnectionState::Authenticated {
            return Err(ConnectionError::NotConnected);
        }
        self.send_node_unchecked(node).await
    }

    async fn send_node_unchecked(&self, node: &Node) -> Result<()> {
        let socket = self
            .noise_socket
            .lock()
            .await
            .clone()
            .ok_or(ConnectionError::NotConnected)?;
        let payload = binary::marshal(node)?;
        let _writer = self.write_lock.lock().await;
        socket.encrypt_and_send(&payload).await?;
        Ok(())
    }

    /// Closes the connection: stops the driver and receive tasks and sends
    /// a normal-closure frame.
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(transport) = self.transport.lock().await.take() {
            transport.disconnect().await;
        }
        *self.noise_socket.lock().await = None;
        self.set_state(ConnectionState::Disconnected);
    }
}

/// Pulls the owner record out of the server's auth message.
fn parse_owner(node: &Node) -> Option<Owner> {
    let jid = node.get_attr("jid")?;
    Some(Owner {
        id: jid.to_string(),
        name: node.get_attr("name").unwrap_or_default().to_string(),
    })
}

/// Receive task: reassembles frames, decrypts them, decodes nodes, and
/// queues them for the driver. Ends when the transport does.
async fn receive_loop(
    session_id: String,
    mut transport_events: mpsc::Receiver<TransportEvent>,
    socket: Arc<NoiseSocket>,
    node_tx: mpsc::Sender<Node>,
) {
    let mut frame_decoder = FrameDecoder::new();

    while let Some(event) = transport_events.recv().await {
        let data = match event {
            TransportEvent::DataReceived(data) => data,
            TransportEvent::Connected => continue,
            TransportEvent::Disconnected => break,
        };

        frame_decoder.feed(&data);
        while let Some(frame) = frame_decoder.decode_frame() {
            let plaintext = match socket.decrypt_frame(&frame) {
                Ok(plaintext) => plaintext,
                Err(e) => {
                    warn!("Session {session_id}: dropping undecryptable frame: {e}");
                    return;
                }
            };
            let node = match binary::unmarshal(&plaintext) {
                Ok(node) => node,
                Err(e) => {
                    warn!("Session {session_id}: dropping malformed node: {e}");
                    continue;
                }
            };

            // Bounded queue: drop the newest on overflow. The server
            // retransmits unacknowledged payloads in steady state.
            match node_tx.try_send(node) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Session {session_id}: inbound queue full, dropping node");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return,
            }
        }
    }
}
