//! Wire-protocol core of a multi-session WhatsApp gateway: the Noise_XX
//! handshake engine, the binary-node and handshake codecs, the framed
//! WebSocket transport, and the supervisor that multiplexes sessions over
//! them. The REST surface and event-delivery subsystems are external
//! collaborators and consume this crate's public types.

pub mod binary;
pub mod config;
pub mod connection;
pub mod crypto;
pub mod events;
pub mod framing;
pub mod noise;
pub mod proto;
pub mod socket;
pub mod store;
pub mod supervisor;
pub mod transport;

pub use config::Config;
pub use supervisor::{SessionRecord, SessionStats, SessionStatus, Supervisor, SupervisorError};
