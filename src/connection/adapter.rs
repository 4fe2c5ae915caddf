//! Protocol engine adapter contract.
//!
//! The coordinator drives sessions exclusively through this trait; the wire
//! protocol (framing, handshake, retransmission) is the implementation's
//! concern. Implementations publish inbound events on a broadcast channel so
//! intake never blocks processing.

use crate::messaging::ingest::InboundMessage;
use crate::store::types::BrokerConfig;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

/// Observable session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Inbound events emitted by an adapter, dispatched by variant.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    ConnectionChanged(ConnectionStatus),
    Message(InboundMessage),
    SubscriptionAck { filter: String },
    Error { message: String },
}

#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    #[error("connect to {host}:{port} failed: {reason}")]
    ConnectFailed {
        host: String,
        port: u16,
        reason: String,
    },
    #[error("no active session")]
    NotConnected,
    #[error("{op} failed for '{filter}': {reason}")]
    RequestFailed {
        op: &'static str,
        filter: String,
        reason: String,
    },
}

#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    /// Open a session to the broker. The optional secret is the resolved
    /// credential for `config.credentials_ref`; it must not be retained
    /// beyond the call.
    async fn connect(&self, config: &BrokerConfig, secret: Option<String>)
        -> Result<(), AdapterError>;

    /// Close the current session. Idempotent.
    async fn disconnect(&self);

    async fn subscribe(&self, filter: &str, qos: u8) -> Result<(), AdapterError>;

    async fn unsubscribe(&self, filter: &str) -> Result<(), AdapterError>;

    /// Subscribe to the adapter's event stream. Slow consumers may observe
    /// lag; the stream is best-effort by design.
    fn events(&self) -> broadcast::Receiver<ClientEvent>;
}
