//! Live session protocol: wire schema, event classification, and the
//! WebSocket client driving the connect → setup → ready lifecycle.
//!
//! # Architecture
//!
//! - [`messages`] - serde types for every wire record kind, validated at the
//!   boundary
//! - [`events`] - the closed [`InboundEvent`] set and the [`SessionState`]
//!   machine
//! - [`client`] - the [`LiveClient`] owning the transport, keepalive, and
//!   reconnection/resumption
//!
//! Consumers subscribe to classified events over a channel; they never see
//! raw frames or the transport.

pub mod client;
pub mod config;
pub mod events;
pub mod messages;

pub use client::LiveClient;
pub use config::{
    CONNECT_TIMEOUT_SECS, INBOUND_SAMPLE_RATE, KEEPALIVE_INTERVAL_SECS, LIVE_WS_URL, LiveConfig,
    OUTBOUND_AUDIO_MIME, OUTBOUND_SAMPLE_RATE, ReconnectPolicy,
};
pub use events::{InboundEvent, OutboundMessage, SessionState};
pub use messages::{ClientMessage, FunctionDeclaration, ServerFrame};
