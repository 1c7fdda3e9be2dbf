//! Owns every session's connection, keyed by session identifier, and fans
//! lifecycle and message events out to the external delivery collaborator.

use chrono::{DateTime, Utc};
use log::{info, warn};
use rand::RngCore;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock as AsyncRwLock};
use tokio::task::JoinHandle;

use crate::binary::{Attrs, Node, NodeContent};
use crate::config::Config;
use crate::connection::{Connection, ConnectionError, ConnectionEvent};
use crate::events::{self, EventRecord};
use crate::store::CredentialStore;
use crate::transport::TransportFactory;

/// Capacity of the per-connection event channel into the supervisor.
const EVENT_QUEUE_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Connecting,
    QrReady,
    Ready,
    Disconnected,
}

/// Snapshot of one session's lifecycle, counters and pairing state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pairing_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub messages_sent: u64,
    pub messages_received: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
}

impl SessionRecord {
    fn new(id: String) -> Self {
        Self {
            id,
            status: SessionStatus::Connecting,
            pairing_ref: None,
            qr: None,
            phone_number: None,
            messages_sent: 0,
            messages_received: 0,
            connected_at: None,
            last_activity_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SessionStats {
    pub total: usize,
    pub ready: usize,
    pub initializing: usize,
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Session already exists")]
    SessionExists,
    #[error("Session not found")]
    SessionNotFound,
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
}

pub type Result<T> = std::result::Result<T, SupervisorError>;

struct SessionHandle {
    connection: Arc<Connection>,
    record: Arc<RwLock<SessionRecord>>,
    driver: JoinHandle<()>,
    pump: JoinHandle<()>,
}

pub struct Supervisor {
    config: Config,
    store: Arc<CredentialStore>,
    transport_factory: Arc<dyn TransportFactory>,
    sessions: AsyncRwLock<HashMap<String, SessionHandle>>,
    delivery_tx: mpsc::Sender<EventRecord>,
}

impl Supervisor {
    /// Builds the supervisor. `delivery_tx` is the hand-off point to the
    /// event-delivery subsystem; the supervisor only produces records.
    pub async fn new(
        config: Config,
        transport_factory: Arc<dyn TransportFactory>,
        delivery_tx: mpsc::Sender<EventRecord>,
    ) -> std::io::Result<Self> {
        let store = Arc::new(CredentialStore::new(config.session_dir.clone()).await?);
        Ok(Self {
            config,
            store,
            transport_factory,
            sessions: AsyncRwLock::new(HashMap::new()),
            delivery_tx,
        })
    }

    /// Registers a session and starts its connection in the background.
    /// Returns as soon as the session is tracked.
    pub async fn create(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(session_id) {
            return Err(SupervisorError::SessionExists);
        }

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let connection = Arc::new(Connection::new(
            session_id.to_string(),
            self.config.clone(),
            self.store.clone(),
            self.transport_factory.clone(),
            events_tx,
        ));
        let record = Arc::new(RwLock::new(SessionRecord::new(session_id.to_string())));

        let driver = tokio::task::spawn(connection.clone().run());
        let pump = tokio::task::spawn(event_pump(
            session_id.to_string(),
            events_rx,
            record.clone(),
            self.delivery_tx.clone(),
        ));

        info!("Session {session_id}: created");
        sessions.insert(
            session_id.to_string(),
            SessionHandle {
                connection,
                record,
                driver,
                pump,
            },
        );
        Ok(())
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionRecord> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .map(|h| h.record.read().expect("record lock poisoned").clone())
    }

    pub async fn list(&self) -> Vec<SessionRecord> {
        let sessions = self.sessions.read().await;
        let mut records: Vec<_> = sessions
            .values()
            .map(|h| h.record.read().expect("record lock poisoned").clone())
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    pub async fn stats(&self) -> SessionStats {
        let sessions = self.sessions.read().await;
        let mut stats = SessionStats {
            total: sessions.len(),
            ..Default::default()
        };
        for handle in sessions.values() {
            match handle.record.read().expect("record lock poisoned").status {
                SessionStatus::Ready => stats.ready += 1,
                SessionStatus::Connecting | SessionStatus::QrReady => stats.initializing += 1,
                SessionStatus::Disconnected => {}
            }
        }
        stats
    }

    /// Closes a session's connection and removes its on-disk state.
    pub async fn delete(&self, session_id: &str) -> Result<()> {
        let SessionHandle {
            connection,
            record: _,
            driver,
            pump,
        } = {
            let mut sessions = self.sessions.write().await;
            sessions
                .remove(session_id)
                .ok_or(SupervisorError::SessionNotFound)?
        };

        connection.close().await;
        let _ = driver.await;
        // Dropping the connection closes its event channel, letting the
        // pump drain the final events and exit.
        drop(connection);
        let _ = pump.await;
        self.store.delete_session(session_id).await?;
        info!("Session {session_id}: deleted");
        Ok(())
    }

    /// Sends a text message through a ready session. Returns the message id.
    pub async fn send_text(&self, session_id: &str, to: &str, body: &str) -> Result<String> {
        let (connection, record) = {
            let sessions = self.sessions.read().await;
            let handle = sessions
                .get(session_id)
                .ok_or(SupervisorError::SessionNotFound)?;
            (handle.connection.clone(), handle.record.clone())
        };

        let message_id = generate_message_id();
        let mut attrs = Attrs::new();
        attrs.insert("id".into(), message_id.clone());
        attrs.insert("to".into(), to.to_string());
        attrs.insert("type".into(), "text".into());
        let node = Node::new(
            "message",
            attrs,
            Some(NodeContent::Nodes(vec![Node::new(
                "body",
                Attrs::new(),
                Some(NodeContent::String(body.to_string())),
            )])),
        );

        connection.send_node(&node).await?;

        let mut record = record.write().expect("record lock poisoned");
        record.messages_sent += 1;
        record.last_activity_at = Utc::now();
        Ok(message_id)
    }

    /// Re-creates a session for every directory under the session root that
    /// holds credentials. Called once at startup.
    pub async fn load_persisted(&self) -> Result<usize> {
        let persisted = self.store.list_persisted().await?;
        let mut loaded = 0;
        for session_id in persisted {
            info!("Loading persisted session: {session_id}");
            match self.create(&session_id).await {
                Ok(()) => loaded += 1,
                Err(SupervisorError::SessionExists) => {}
                Err(e) => warn!("Failed to load persisted session {session_id}: {e}"),
            }
        }
        Ok(loaded)
    }

    /// Closes every connection without touching persisted state.
    pub async fn disconnect_all(&self) {
        let sessions = self.sessions.read().await;
        for (session_id, handle) in sessions.iter() {
            info!("Session {session_id}: disconnecting");
            handle.connection.close().await;
        }
    }
}

fn generate_message_id() -> String {
    let mut bytes = [0u8; 8];
    rand::rng().fill_bytes(&mut bytes);
    format!("3EB0{}", hex_upper(&bytes))
}

fn hex_upper(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

/// Consumes one connection's events: keeps the session record current and
/// forwards externally visible transitions as tagged records.
async fn event_pump(
    session_id: String,
    mut events_rx: mpsc::Receiver<ConnectionEvent>,
    record: Arc<RwLock<SessionRecord>>,
    delivery_tx: mpsc::Sender<EventRecord>,
) {
    while let Some(event) = events_rx.recv().await {
        let outbound = match event {
            ConnectionEvent::QrReady { qr, pairing_ref } => {
                {
                    let mut record = record.write().expect("record lock poisoned");
                    record.status = SessionStatus::QrReady;
                    record.qr = Some(qr.clone());
                    record.pairing_ref = Some(pairing_ref);
                    record.last_activity_at = Utc::now();
                }
                Some(EventRecord::new(
                    events::SESSION_QR_READY,
                    json!({ "sessionId": session_id, "qr": qr }),
                ))
            }
            ConnectionEvent::Ready { owner, resumed } => {
                let phone_number = owner
                    .id
                    .split('@')
                    .next()
                    .unwrap_or_default()
                    .to_string();
                {
                    let mut record = record.write().expect("record lock poisoned");
                    record.status = SessionStatus::Ready;
                    record.phone_number = Some(phone_number.clone());
                    record.qr = None;
                    record.pairing_ref = None;
                    record.connected_at = Some(Utc::now());
                    record.last_activity_at = Utc::now();
                }
                Some(EventRecord::new(
                    events::SESSION_CONNECTED,
                    json!({
                        "sessionId": session_id,
                        "phoneNumber": phone_number,
                        "resumed": resumed,
                    }),
                ))
            }
            ConnectionEvent::PersistFailed { reason } => Some(EventRecord::new(
                events::SESSION_PERSIST_FAILED,
                json!({ "sessionId": session_id, "reason": reason }),
            )),
            ConnectionEvent::Node(node) => {
                let outbound = events::event_for_node(&session_id, &node);
                if outbound.is_some() {
                    let mut record = record.write().expect("record lock poisoned");
                    if node.tag == "message" {
                        record.messages_received += 1;
                    }
                    record.last_activity_at = Utc::now();
                }
                outbound
            }
            ConnectionEvent::Closed { error } => {
                {
                    let mut record = record.write().expect("record lock poisoned");
                    record.status = SessionStatus::Disconnected;
                    record.qr = None;
                    record.last_activity_at = Utc::now();
                }
                Some(EventRecord::new(
                    events::SESSION_DISCONNECTED,
                    json!({ "sessionId": session_id, "error": error }),
                ))
            }
        };

        if let Some(record) = outbound {
            if delivery_tx.send(record).await.is_err() {
                // Delivery side is gone; keep updating records regardless.
                warn!("Session {session_id}: event delivery channel closed");
            }
        }
    }
}
