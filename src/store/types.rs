//! Persisted domain records.
//!
//! Every type here round-trips through the store manifest; fields use
//! wall-clock milliseconds for timestamps.

use serde::{Deserialize, Serialize};

pub type BrokerId = u64;

/// Protocol version preference for a broker session.
///
/// `Auto` negotiates by trying the newer version first and falling back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolVersion {
    V5,
    V311,
    Auto,
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::Auto
    }
}

/// Reference to a secret held by the secret store, never the secret itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialsRef {
    pub alias: String,
}

/// A registered broker endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Zero means "not yet persisted"; the store assigns an id on save.
    pub id: BrokerId,
    pub label: String,
    pub host: String,
    pub port: u16,
    pub tls: bool,
    #[serde(default)]
    pub protocol_version: ProtocolVersion,
    pub username: Option<String>,
    pub credentials_ref: Option<CredentialsRef>,
    pub client_id: Option<String>,
    pub keepalive_secs: u16,
    pub clean_start: bool,
    pub session_expiry_secs: u32,
    /// Millis of the last successful connectivity test. Saving requires this
    /// to fall within the freshness window enforced by the store.
    pub last_test_passed_at: Option<i64>,
}

/// A topic subscription belonging to one broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    pub id: u64,
    pub broker_id: BrokerId,
    /// Hierarchical filter with `+`/`#` wildcards.
    pub filter: String,
    pub qos: u8,
    pub enabled: bool,
    pub notify_enabled: bool,
    /// Whether retained replays count as new activity.
    pub retained_as_new: bool,
}

/// Connectivity mode chosen by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    /// Connect only while the UI is visible.
    VisibleOnly,
    /// Keep a session while the persistent flag is set.
    Persistent,
}

/// Process-wide singleton state, created with defaults on first access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppState {
    pub active_broker_id: Option<BrokerId>,
    pub mode: ConnectionMode,
    pub global_mute_until: Option<i64>,
    pub last_session_started_at: Option<i64>,
    pub show_previews: bool,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            active_broker_id: None,
            mode: ConnectionMode::VisibleOnly,
            global_mute_until: None,
            last_session_started_at: None,
            show_previews: true,
        }
    }
}

impl AppState {
    /// Muted strictly before the mute-until timestamp, unmuted at/after it.
    pub fn is_muted(&self, now: i64) -> bool {
        match self.global_mute_until {
            Some(until) => until > now,
            None => false,
        }
    }
}

/// Trimming policy. Scope is encoded by the optional fields: both set means
/// topic-specific, only `broker_id` means broker default, neither means the
/// global default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub id: u64,
    pub broker_id: Option<BrokerId>,
    pub filter: Option<String>,
    pub max_messages: usize,
    pub max_age_days: i64,
    pub trim_on_insert: bool,
}

pub const DEFAULT_MAX_MESSAGES: usize = 1000;
pub const DEFAULT_MAX_AGE_DAYS: i64 = 30;

impl RetentionPolicy {
    /// Global default policy, auto-created on first lookup.
    pub fn global_default() -> Self {
        Self {
            id: 0,
            broker_id: None,
            filter: None,
            max_messages: DEFAULT_MAX_MESSAGES,
            max_age_days: DEFAULT_MAX_AGE_DAYS,
            trim_on_insert: true,
        }
    }

    /// Broker-level default for a freshly saved broker.
    pub fn broker_default(broker_id: BrokerId) -> Self {
        Self {
            broker_id: Some(broker_id),
            ..Self::global_default()
        }
    }
}

/// A persisted inbound message. Immutable once created; removed individually
/// or by a retention sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: u64,
    pub broker_id: BrokerId,
    pub topic: String,
    pub received_at: i64,
    pub payload: Vec<u8>,
    pub preview: String,
    pub qos: u8,
    pub retained: bool,
    pub duplicate: bool,
    pub packet_id: Option<u16>,
    /// Derived on ingest: live traffic, or a retained replay the matched
    /// topic config opted into counting.
    pub new_activity: bool,
}

/// Per (broker, topic) unread/total counters. Total is monotonic; unread is
/// bounded below by zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicCounter {
    pub broker_id: BrokerId,
    pub topic: String,
    pub unread: u64,
    pub total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mute_checks_expiration() {
        let state = AppState {
            global_mute_until: Some(2_000),
            ..AppState::default()
        };
        assert!(state.is_muted(1_000));
        assert!(!state.is_muted(2_000));
        assert!(!state.is_muted(3_000));
        assert!(!AppState::default().is_muted(0));
    }
}
