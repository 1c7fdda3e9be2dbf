//! In-process mock of the chat server: a channel-backed transport whose far
//! end speaks the Noise_XX responder role, pairs or resumes sessions, and
//! echoes receipts. No network involved.
#![allow(dead_code)]

use aes_gcm::aead::Aead;
use aes_gcm::Aes256Gcm;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, sleep_until, Instant};

use waconnect::binary::{self, Attrs, Node};
use waconnect::crypto::gcm::generate_iv;
use waconnect::crypto::key_pair::KeyPair;
use waconnect::framing::{self, FrameDecoder, CONN_HEADER};
use waconnect::noise::handshake::NoiseHandshake;
use waconnect::noise::NOISE_START_PATTERN;
use waconnect::proto;
use waconnect::transport::{Transport, TransportEvent, TransportFactory};

pub const MOCK_OWNER_JID: &str = "15551234567@s.whatsapp.net";

/// How the mock behaves once a client dials it.
#[derive(Clone)]
pub enum ServerMode {
    /// Complete the XX handshake as responder, then serve the session.
    Respond(RespondOptions),
    /// Reply to the ClientHello with ten junk bytes and hang up.
    Malformed,
    /// Accept the connection and never send a byte.
    Silent,
}

#[derive(Clone)]
pub struct RespondOptions {
    /// When set, send the pairing auth message this long after the
    /// handshake completes (simulates the phone scanning the QR).
    pub auth_delay: Option<Duration>,
    /// Answer resume `iq` requests with a success node.
    pub accept_resume: bool,
    /// Deliver the ServerHello frame split across two chunks.
    pub split_server_hello: bool,
    /// Deliver a junk frame ahead of the ServerHello.
    pub stray_prefix: bool,
}

impl Default for RespondOptions {
    fn default() -> Self {
        Self {
            auth_delay: Some(Duration::from_millis(50)),
            accept_resume: false,
            split_server_hello: false,
            stray_prefix: false,
        }
    }
}

pub struct MockServerFactory {
    mode: ServerMode,
}

impl MockServerFactory {
    pub fn new(mode: ServerMode) -> Self {
        Self { mode }
    }

    pub fn pairing() -> Self {
        Self::new(ServerMode::Respond(RespondOptions::default()))
    }

    pub fn resuming() -> Self {
        Self::new(ServerMode::Respond(RespondOptions {
            auth_delay: None,
            accept_resume: true,
            ..RespondOptions::default()
        }))
    }
}

#[async_trait]
impl TransportFactory for MockServerFactory {
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        let (event_tx, event_rx) = mpsc::channel(100);
        let (c2s_tx, c2s_rx) = mpsc::channel::<Vec<u8>>(100);

        let transport = Arc::new(ChannelTransport {
            c2s_tx: Mutex::new(Some(c2s_tx)),
        });

        tokio::task::spawn(run_server(self.mode.clone(), c2s_rx, event_tx.clone()));
        let _ = event_tx.send(TransportEvent::Connected).await;

        Ok((transport, event_rx))
    }
}

/// Client-side transport half: every `send` becomes one chunk on the
/// server's inbound channel.
struct ChannelTransport {
    c2s_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, data: &[u8]) -> Result<(), anyhow::Error> {
        let guard = self.c2s_tx.lock().await;
        let tx = guard
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Socket is closed"))?;
        tx.send(data.to_vec())
            .await
            .map_err(|_| anyhow::anyhow!("Server hung up"))
    }

    async fn disconnect(&self) {
        self.c2s_tx.lock().await.take();
    }
}

async fn run_server(
    mode: ServerMode,
    mut c2s_rx: mpsc::Receiver<Vec<u8>>,
    event_tx: mpsc::Sender<TransportEvent>,
) {
    match mode {
        ServerMode::Silent => {
            while c2s_rx.recv().await.is_some() {}
        }
        ServerMode::Malformed => {
            let _ = c2s_rx.recv().await;
            let _ = event_tx
                .send(TransportEvent::DataReceived(Bytes::from_static(
                    &[0xAB; 10],
                )))
                .await;
        }
        ServerMode::Respond(opts) => {
            let _ = run_responder(opts, &mut c2s_rx, &event_tx).await;
        }
    }
    let _ = event_tx.send(TransportEvent::Disconnected).await;
}

struct FrameReader {
    decoder: FrameDecoder,
    header_stripped: bool,
}

impl FrameReader {
    fn new() -> Self {
        Self {
            decoder: FrameDecoder::new(),
            header_stripped: false,
        }
    }

    async fn next_frame(&mut self, c2s_rx: &mut mpsc::Receiver<Vec<u8>>) -> Option<Bytes> {
        loop {
            if let Some(frame) = self.decoder.decode_frame() {
                return Some(frame);
            }
            let chunk = c2s_rx.recv().await?;
            let chunk = if !self.header_stripped && chunk.starts_with(&CONN_HEADER) {
                self.header_stripped = true;
                &chunk[CONN_HEADER.len()..]
            } else {
                &chunk[..]
            };
            self.decoder.feed(chunk);
        }
    }
}

/// Post-split server-side transport keys. Directions are mirrored from the
/// initiator's split.
struct ServerTransportKeys {
    write_key: Aes256Gcm,
    read_key: Aes256Gcm,
    write_counter: u32,
    read_counter: u32,
}

impl ServerTransportKeys {
    fn encrypt_node(&mut self, node: &Node) -> Vec<u8> {
        let plaintext = binary::marshal(node).expect("marshal");
        let iv = generate_iv(self.write_counter);
        self.write_counter += 1;
        let ciphertext = self
            .write_key
            .encrypt(iv.as_ref().into(), plaintext.as_slice())
            .expect("encrypt");
        framing::encode_frame(&ciphertext, None).expect("frame")
    }

    fn decrypt_node(&mut self, frame: &[u8]) -> Option<Node> {
        let iv = generate_iv(self.read_counter);
        self.read_counter += 1;
        let plaintext = self.read_key.decrypt(iv.as_ref().into(), frame).ok()?;
        binary::unmarshal(&plaintext).ok()
    }
}

fn success_node() -> Node {
    let mut attrs = Attrs::new();
    attrs.insert("jid".into(), MOCK_OWNER_JID.into());
    attrs.insert("name".into(), "Mock Owner".into());
    Node::new("success", attrs, None)
}

fn receipt_node(message_id: &str) -> Node {
    let mut attrs = Attrs::new();
    attrs.insert("id".into(), message_id.into());
    attrs.insert("from".into(), MOCK_OWNER_JID.into());
    Node::new("receipt", attrs, None)
}

fn echo_message_node(message_id: &str, body: &str) -> Node {
    use waconnect::binary::NodeContent;

    let mut attrs = Attrs::new();
    attrs.insert("id".into(), format!("echo-{message_id}"));
    attrs.insert("from".into(), MOCK_OWNER_JID.into());
    Node::new(
        "message",
        attrs,
        Some(NodeContent::Nodes(vec![Node::new(
            "body",
            Attrs::new(),
            Some(NodeContent::String(body.to_string())),
        )])),
    )
}

async fn run_responder(
    opts: RespondOptions,
    c2s_rx: &mut mpsc::Receiver<Vec<u8>>,
    event_tx: &mpsc::Sender<TransportEvent>,
) -> Option<()> {
    let mut reader = FrameReader::new();

    // Message 1: ClientHello.
    let hello_frame = reader.next_frame(c2s_rx).await?;
    let client_hello = proto::find_field(&hello_frame, 2).ok()??;
    let client_ephemeral: [u8; 32] = proto::find_field(client_hello, 1)
        .ok()??
        .try_into()
        .ok()?;

    let mut noise = NoiseHandshake::new(NOISE_START_PATTERN, &CONN_HEADER).expect("noise init");
    noise.authenticate(&client_ephemeral);

    let server_ephemeral = KeyPair::new();
    let server_static = KeyPair::new();

    // Message 2: ServerHello (e, ee, s).
    noise.authenticate(&server_ephemeral.public_key);
    noise
        .mix_into_key(&server_ephemeral.dh(&client_ephemeral))
        .expect("mix ee");
    let encrypted_static = noise
        .encrypt(&server_static.public_key)
        .expect("encrypt static");
    noise
        .mix_into_key(&server_static.dh(&client_ephemeral))
        .expect("mix es");

    let mut inner = Vec::new();
    proto::encode_bytes_field(1, &server_ephemeral.public_key, &mut inner);
    proto::encode_bytes_field(2, &encrypted_static, &mut inner);
    let mut server_hello = Vec::new();
    proto::encode_bytes_field(3, &inner, &mut server_hello);
    let framed = framing::encode_frame(&server_hello, None).expect("frame");

    if opts.stray_prefix {
        let junk = framing::encode_frame(&[0xEE; 10], None).expect("frame");
        event_tx
            .send(TransportEvent::DataReceived(junk.into()))
            .await
            .ok()?;
    }
    if opts.split_server_hello {
        let mid = framed.len() / 2;
        event_tx
            .send(TransportEvent::DataReceived(Bytes::copy_from_slice(
                &framed[..mid],
            )))
            .await
            .ok()?;
        sleep(Duration::from_millis(10)).await;
        event_tx
            .send(TransportEvent::DataReceived(Bytes::copy_from_slice(
                &framed[mid..],
            )))
            .await
            .ok()?;
    } else {
        event_tx
            .send(TransportEvent::DataReceived(framed.into()))
            .await
            .ok()?;
    }

    // Message 3: ClientFinish (s, se).
    let finish_frame = reader.next_frame(c2s_rx).await?;
    let client_finish = proto::find_field(&finish_frame, 4).ok()??;
    let encrypted_client_static = proto::find_field(client_finish, 1).ok()??;
    let client_static: [u8; 32] = noise
        .decrypt(encrypted_client_static)
        .expect("decrypt client static")
        .try_into()
        .ok()?;
    noise
        .mix_into_key(&server_ephemeral.dh(&client_static))
        .expect("mix se");
    if let Ok(Some(payload_ct)) = proto::find_field(client_finish, 2) {
        let _resume_hint = noise.decrypt(payload_ct).expect("decrypt payload");
    }

    // Split. The initiator writes with the first key, so ours are swapped.
    let (k1, k2) = noise.finish().expect("split");
    let mut keys = ServerTransportKeys {
        write_key: k2,
        read_key: k1,
        write_counter: 0,
        read_counter: 0,
    };

    let auth_at = opts.auth_delay.map(|delay| Instant::now() + delay);
    let mut auth_sent = false;
    let auth_timer = async {
        match auth_at {
            Some(at) => sleep_until(at).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(auth_timer);

    loop {
        tokio::select! {
            _ = &mut auth_timer, if !auth_sent => {
                auth_sent = true;
                let framed = keys.encrypt_node(&success_node());
                event_tx
                    .send(TransportEvent::DataReceived(framed.into()))
                    .await
                    .ok()?;
            }
            chunk = c2s_rx.recv() => {
                let chunk = chunk?;
                reader.decoder.feed(&chunk);
                while let Some(frame) = reader.decoder.decode_frame() {
                    let Some(node) = keys.decrypt_node(&frame) else {
                        return Some(());
                    };
                    match node.tag.as_str() {
                        "iq" if opts.accept_resume => {
                            let framed = keys.encrypt_node(&success_node());
                            event_tx
                                .send(TransportEvent::DataReceived(framed.into()))
                                .await
                                .ok()?;
                        }
                        "message" => {
                            // Acknowledge, then echo the text back like a
                            // chat peer would.
                            let id = node.get_attr("id").unwrap_or_default().to_string();
                            let body = node
                                .get_optional_child("body")
                                .and_then(|b| b.content_string())
                                .unwrap_or_default()
                                .to_string();
                            for reply in [receipt_node(&id), echo_message_node(&id, &body)] {
                                let framed = keys.encrypt_node(&reply);
                                event_tx
                                    .send(TransportEvent::DataReceived(framed.into()))
                                    .await
                                    .ok()?;
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

/// Waits for the next delivery record of the given event type, failing the
/// test if it does not arrive in time. Other event types are skipped.
pub async fn expect_event(
    delivery_rx: &mut mpsc::Receiver<waconnect::events::EventRecord>,
    event: &str,
    within: Duration,
) -> waconnect::events::EventRecord {
    let deadline = Instant::now() + within;
    loop {
        let record = tokio::time::timeout_at(deadline, delivery_rx.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {event}"))
            .expect("delivery channel closed");
        if record.event == event {
            return record;
        }
    }
}
