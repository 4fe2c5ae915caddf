//! mqttwatch: an MQTT notification watcher core.
//!
//! The crate keeps one broker session alive according to the desired state
//! recorded in a persisted store, classifies inbound traffic against topic
//! subscriptions, and trims history by retention policy:
//!
//! - `core`: configuration loading and the clock seam.
//! - `store`: persisted brokers, topics, app state, policies, messages,
//!   counters, and the secret store collaborator.
//! - `messaging`: topic filter matching, the ingestion pipeline, and the
//!   retention engine.
//! - `connection`: the protocol adapter contract, the rumqttc adapter, the
//!   reconciling coordinator, and the save-gate connectivity test.
//! - `ops`: alert delivery, the diagnostics ring, and tracing bootstrap.
//! - `cli`: the command-line surface.

pub mod cli;
pub mod connection;
pub mod core;
pub mod messaging;
pub mod ops;
pub mod store;

pub use connection::{
    AdapterError, ClientEvent, ConnectionSnapshot, ConnectionStatus, Coordinator, ProtocolAdapter,
    RumqttAdapter, SnapshotStatus,
};
pub use messaging::{InboundMessage, IngestEngine, RetentionEngine};
pub use store::{Store, StoreError};
