//! Transport seam between the connection logic and the network.
//!
//! The transport moves raw bytes: framing and encryption live above it.
//! Tests swap in channel-backed implementations of [`Transport`] /
//! [`TransportFactory`], production uses the WebSocket implementation
//! below.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_websockets::{ClientBuilder, MaybeTlsStream, Message, WebSocketStream};

pub const WS_URL: &str = "wss://web.whatsapp.com/ws/chat";
pub const WS_ORIGIN: &str = "https://web.whatsapp.com";

/// Bounds any individual read so a dead peer cannot hang the receive task.
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// An event produced by the transport layer.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The transport has successfully connected.
    Connected,
    /// A chunk of binary data arrived. Chunk boundaries are arbitrary; the
    /// consumer reassembles frames.
    DataReceived(Bytes),
    /// The connection was lost or closed.
    Disconnected,
}

/// Represents an active network connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one binary message to the server.
    async fn send(&self, data: &[u8]) -> Result<(), anyhow::Error>;

    /// Closes the connection with a normal-closure frame.
    async fn disconnect(&self);
}

/// A factory responsible for creating new transport instances.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error>;
}

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

pub struct WebSocketTransport {
    ws_sink: Arc<Mutex<Option<WsSink>>>,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, data: &[u8]) -> Result<(), anyhow::Error> {
        let mut sink_guard = self.ws_sink.lock().await;
        let sink = sink_guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Socket is closed"))?;

        debug!("--> Sending {} bytes", data.len());
        sink.send(Message::binary(Bytes::copy_from_slice(data)))
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket send error: {e}"))?;
        Ok(())
    }

    async fn disconnect(&self) {
        let mut sink_guard = self.ws_sink.lock().await;
        if let Some(mut sink) = sink_guard.take() {
            let _ = sink.send(Message::close(None, "")).await;
            let _ = sink.close().await;
        }
    }
}

#[derive(Default)]
pub struct WebSocketTransportFactory;

impl WebSocketTransportFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportFactory for WebSocketTransportFactory {
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
            debug!("rustls crypto provider install: {e:?}");
        }

        info!("Dialing {WS_URL}");
        let uri: http::Uri = WS_URL
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse URL: {e}"))?;

        let (client, _response) = ClientBuilder::from_uri(uri)
            .add_header(
                http::header::ORIGIN,
                http::HeaderValue::from_static(WS_ORIGIN),
            )
            .map_err(|e| anyhow::anyhow!("Failed to set Origin header: {e}"))?
            .connect()
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket connect failed: {e}"))?;

        let (sink, stream) = client.split();
        let transport = Arc::new(WebSocketTransport {
            ws_sink: Arc::new(Mutex::new(Some(sink))),
        });

        let (event_tx, event_rx) = mpsc::channel(100);
        tokio::task::spawn(read_pump(stream, event_tx.clone()));
        let _ = event_tx.send(TransportEvent::Connected).await;

        Ok((transport, event_rx))
    }
}

async fn read_pump(mut stream: WsStream, event_tx: mpsc::Sender<TransportEvent>) {
    loop {
        let msg = match timeout(READ_TIMEOUT, stream.next()).await {
            Ok(msg) => msg,
            Err(_) => {
                warn!("Read timed out after {READ_TIMEOUT:?}, closing read pump");
                break;
            }
        };

        match msg {
            Some(Ok(msg)) => {
                if msg.is_binary() {
                    let data = Bytes::copy_from_slice(msg.as_payload());
                    trace!("<-- Received WebSocket message: {} bytes", data.len());
                    if event_tx
                        .send(TransportEvent::DataReceived(data))
                        .await
                        .is_err()
                    {
                        warn!("Event receiver dropped, closing read pump");
                        break;
                    }
                } else if msg.is_close() {
                    trace!("Received close frame");
                    break;
                }
            }
            Some(Err(e)) => {
                error!("Error reading from websocket: {e}");
                break;
            }
            None => {
                trace!("Websocket stream ended");
                break;
            }
        }
    }

    let _ = event_tx.send(TransportEvent::Disconnected).await;
}
