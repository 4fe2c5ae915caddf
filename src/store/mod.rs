//! Persisted configuration and message storage.

pub mod repo;
pub mod secrets;
pub mod types;

pub use repo::{Store, StoreError, TEST_WINDOW_MS};
pub use secrets::{FileSecretStore, MemorySecretStore, SecretStore};
pub use types::{
    AppState, BrokerConfig, BrokerId, ConnectionMode, CredentialsRef, MessageRecord,
    ProtocolVersion, RetentionPolicy, TopicConfig, TopicCounter,
};
