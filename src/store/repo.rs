//! Persisted configuration store.
//!
//! Single JSON manifest loaded at open and rewritten after every mutation,
//! guarded by one async mutex. The mutex doubles as the serialization point
//! for counter updates, so per-key counters never race. App-state and
//! topic-set changes are published over watch channels for observers.

use crate::store::types::{
    AppState, BrokerConfig, BrokerId, ConnectionMode, MessageRecord, RetentionPolicy, TopicConfig,
    TopicCounter,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{watch, Mutex};

/// Freshness window for the broker save gate: a connectivity test older than
/// this blocks persisting the config.
pub const TEST_WINDOW_MS: i64 = 5 * 60 * 1000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("broker must pass a connection test before save")]
    NotTested,
    #[error("connection test expired; re-test before save")]
    TestExpired,
    #[error("broker {0} not found")]
    BrokerNotFound(BrokerId),
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    next_id: u64,
    brokers: Vec<BrokerConfig>,
    topics: Vec<TopicConfig>,
    app_state: Option<AppState>,
    policies: Vec<RetentionPolicy>,
    messages: Vec<MessageRecord>,
    counters: Vec<TopicCounter>,
}

impl Manifest {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Repository facade over the persisted manifest.
#[derive(Clone)]
pub struct Store {
    inner: std::sync::Arc<Mutex<Manifest>>,
    path: Option<PathBuf>,
    app_state_tx: std::sync::Arc<watch::Sender<AppState>>,
    topics_rev_tx: std::sync::Arc<watch::Sender<u64>>,
}

impl Store {
    /// Open a file-backed store, loading the manifest if it exists.
    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        let manifest = if path.exists() {
            let raw = fs::read(&path)?;
            serde_json::from_slice(&raw)?
        } else {
            Manifest::default()
        };
        Ok(Self::with_manifest(manifest, Some(path)))
    }

    /// Purely in-memory store for tests and ephemeral runs.
    pub fn in_memory() -> Self {
        Self::with_manifest(Manifest::default(), None)
    }

    fn with_manifest(manifest: Manifest, path: Option<PathBuf>) -> Self {
        let initial_state = manifest.app_state.clone().unwrap_or_default();
        let (app_state_tx, _) = watch::channel(initial_state);
        let (topics_rev_tx, _) = watch::channel(0u64);
        Self {
            inner: std::sync::Arc::new(Mutex::new(manifest)),
            path,
            app_state_tx: std::sync::Arc::new(app_state_tx),
            topics_rev_tx: std::sync::Arc::new(topics_rev_tx),
        }
    }

    fn flush(&self, manifest: &Manifest) -> Result<(), StoreError> {
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let raw = serde_json::to_vec_pretty(manifest)?;
            fs::write(path, raw)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Brokers
    // -----------------------------------------------------------------------

    /// Persist a broker config. Enforces the connectivity-test freshness gate
    /// and guarantees a broker-default retention policy exists afterwards.
    pub async fn save_broker(
        &self,
        mut config: BrokerConfig,
        now: i64,
    ) -> Result<BrokerId, StoreError> {
        let tested_at = config.last_test_passed_at.ok_or(StoreError::NotTested)?;
        if now - tested_at > TEST_WINDOW_MS {
            return Err(StoreError::TestExpired);
        }

        let mut manifest = self.inner.lock().await;
        if config.id == 0 {
            config.id = manifest.allocate_id();
        }
        let id = config.id;
        match manifest.brokers.iter_mut().find(|b| b.id == id) {
            Some(existing) => *existing = config,
            None => manifest.brokers.push(config),
        }
        if !manifest
            .policies
            .iter()
            .any(|p| p.broker_id == Some(id) && p.filter.is_none())
        {
            let mut policy = RetentionPolicy::broker_default(id);
            policy.id = manifest.allocate_id();
            manifest.policies.push(policy);
        }
        self.flush(&manifest)?;
        Ok(id)
    }

    pub async fn broker(&self, id: BrokerId) -> Result<Option<BrokerConfig>, StoreError> {
        let manifest = self.inner.lock().await;
        Ok(manifest.brokers.iter().find(|b| b.id == id).cloned())
    }

    /// All brokers, ordered by label for stable listings.
    pub async fn brokers(&self) -> Result<Vec<BrokerConfig>, StoreError> {
        let manifest = self.inner.lock().await;
        let mut brokers = manifest.brokers.clone();
        brokers.sort_by(|a, b| a.label.cmp(&b.label));
        Ok(brokers)
    }

    pub async fn delete_broker(&self, id: BrokerId) -> Result<(), StoreError> {
        let mut manifest = self.inner.lock().await;
        manifest.brokers.retain(|b| b.id != id);
        self.flush(&manifest)
    }

    // -----------------------------------------------------------------------
    // Topic subscriptions
    // -----------------------------------------------------------------------

    pub async fn upsert_topic(&self, mut config: TopicConfig) -> Result<u64, StoreError> {
        let mut manifest = self.inner.lock().await;
        if config.id == 0 {
            config.id = manifest.allocate_id();
        }
        let id = config.id;
        match manifest.topics.iter_mut().find(|t| t.id == id) {
            Some(existing) => *existing = config,
            None => manifest.topics.push(config),
        }
        self.flush(&manifest)?;
        self.notify_topics_changed();
        Ok(id)
    }

    pub async fn delete_topic(&self, id: u64) -> Result<(), StoreError> {
        let mut manifest = self.inner.lock().await;
        manifest.topics.retain(|t| t.id != id);
        self.flush(&manifest)?;
        self.notify_topics_changed();
        Ok(())
    }

    pub async fn topics_for_broker(
        &self,
        broker_id: BrokerId,
    ) -> Result<Vec<TopicConfig>, StoreError> {
        let manifest = self.inner.lock().await;
        Ok(manifest
            .topics
            .iter()
            .filter(|t| t.broker_id == broker_id)
            .cloned()
            .collect())
    }

    pub async fn enabled_topics_for_broker(
        &self,
        broker_id: BrokerId,
    ) -> Result<Vec<TopicConfig>, StoreError> {
        Ok(self
            .topics_for_broker(broker_id)
            .await?
            .into_iter()
            .filter(|t| t.enabled)
            .collect())
    }

    /// Revision counter bumped on every topic mutation. Observers re-read the
    /// full topic set on change rather than diffing payloads.
    pub fn watch_topics(&self) -> watch::Receiver<u64> {
        self.topics_rev_tx.subscribe()
    }

    fn notify_topics_changed(&self) {
        self.topics_rev_tx.send_modify(|rev| *rev += 1);
    }

    // -----------------------------------------------------------------------
    // App state
    // -----------------------------------------------------------------------

    /// Current app state, created with defaults and persisted on first access.
    pub async fn app_state(&self) -> Result<AppState, StoreError> {
        let mut manifest = self.inner.lock().await;
        if let Some(state) = &manifest.app_state {
            return Ok(state.clone());
        }
        let state = AppState::default();
        manifest.app_state = Some(state.clone());
        self.flush(&manifest)?;
        Ok(state)
    }

    pub fn watch_app_state(&self) -> watch::Receiver<AppState> {
        self.app_state_tx.subscribe()
    }

    async fn update_app_state<F>(&self, transform: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut AppState),
    {
        let mut manifest = self.inner.lock().await;
        let mut state = manifest.app_state.clone().unwrap_or_default();
        transform(&mut state);
        manifest.app_state = Some(state.clone());
        self.flush(&manifest)?;
        let _ = self.app_state_tx.send(state);
        Ok(())
    }

    pub async fn set_active_broker(&self, id: Option<BrokerId>) -> Result<(), StoreError> {
        self.update_app_state(|s| s.active_broker_id = id).await
    }

    pub async fn set_connection_mode(&self, mode: ConnectionMode) -> Result<(), StoreError> {
        self.update_app_state(|s| s.mode = mode).await
    }

    pub async fn set_global_mute_until(&self, until: Option<i64>) -> Result<(), StoreError> {
        self.update_app_state(|s| s.global_mute_until = until).await
    }

    pub async fn set_last_session_started_at(&self, at: Option<i64>) -> Result<(), StoreError> {
        self.update_app_state(|s| s.last_session_started_at = at)
            .await
    }

    pub async fn set_show_previews(&self, enabled: bool) -> Result<(), StoreError> {
        self.update_app_state(|s| s.show_previews = enabled).await
    }

    // -----------------------------------------------------------------------
    // Retention policies
    // -----------------------------------------------------------------------

    /// Three-tier policy lookup: topic-specific, broker default, global
    /// default. The global default is auto-created on first use.
    pub async fn policy_for_topic(
        &self,
        broker_id: BrokerId,
        topic: &str,
    ) -> Result<RetentionPolicy, StoreError> {
        let mut manifest = self.inner.lock().await;
        if let Some(policy) = manifest
            .policies
            .iter()
            .find(|p| p.broker_id == Some(broker_id) && p.filter.as_deref() == Some(topic))
        {
            return Ok(policy.clone());
        }
        if let Some(policy) = manifest
            .policies
            .iter()
            .find(|p| p.broker_id == Some(broker_id) && p.filter.is_none())
        {
            return Ok(policy.clone());
        }
        if let Some(policy) = manifest
            .policies
            .iter()
            .find(|p| p.broker_id.is_none() && p.filter.is_none())
        {
            return Ok(policy.clone());
        }
        let mut policy = RetentionPolicy::global_default();
        policy.id = manifest.allocate_id();
        manifest.policies.push(policy.clone());
        self.flush(&manifest)?;
        Ok(policy)
    }

    pub async fn upsert_policy(&self, mut policy: RetentionPolicy) -> Result<u64, StoreError> {
        let mut manifest = self.inner.lock().await;
        if policy.id == 0 {
            policy.id = manifest.allocate_id();
        }
        let id = policy.id;
        match manifest.policies.iter_mut().find(|p| p.id == id) {
            Some(existing) => *existing = policy,
            None => manifest.policies.push(policy),
        }
        self.flush(&manifest)?;
        Ok(id)
    }

    pub async fn ensure_default_for_broker(&self, broker_id: BrokerId) -> Result<(), StoreError> {
        let mut manifest = self.inner.lock().await;
        if !manifest
            .policies
            .iter()
            .any(|p| p.broker_id == Some(broker_id) && p.filter.is_none())
        {
            let mut policy = RetentionPolicy::broker_default(broker_id);
            policy.id = manifest.allocate_id();
            manifest.policies.push(policy);
            self.flush(&manifest)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    pub async fn insert_message(&self, mut record: MessageRecord) -> Result<u64, StoreError> {
        let mut manifest = self.inner.lock().await;
        record.id = manifest.allocate_id();
        let id = record.id;
        manifest.messages.push(record);
        self.flush(&manifest)?;
        Ok(id)
    }

    /// Most recent messages for a broker, newest first.
    pub async fn recent_messages(
        &self,
        broker_id: BrokerId,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let manifest = self.inner.lock().await;
        let mut messages: Vec<MessageRecord> = manifest
            .messages
            .iter()
            .filter(|m| m.broker_id == broker_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| (b.received_at, b.id).cmp(&(a.received_at, a.id)));
        messages.truncate(limit);
        Ok(messages)
    }

    pub async fn delete_messages_older_than(
        &self,
        broker_id: BrokerId,
        topic: &str,
        cutoff: i64,
    ) -> Result<usize, StoreError> {
        let mut manifest = self.inner.lock().await;
        let before = manifest.messages.len();
        manifest
            .messages
            .retain(|m| !(m.broker_id == broker_id && m.topic == topic && m.received_at < cutoff));
        let removed = before - manifest.messages.len();
        if removed > 0 {
            self.flush(&manifest)?;
        }
        Ok(removed)
    }

    pub async fn count_for_topic(
        &self,
        broker_id: BrokerId,
        topic: &str,
    ) -> Result<usize, StoreError> {
        let manifest = self.inner.lock().await;
        Ok(manifest
            .messages
            .iter()
            .filter(|m| m.broker_id == broker_id && m.topic == topic)
            .count())
    }

    /// Delete the oldest records for a (broker, topic) so that only the
    /// newest `keep` remain.
    pub async fn delete_overflow(
        &self,
        broker_id: BrokerId,
        topic: &str,
        keep: usize,
    ) -> Result<usize, StoreError> {
        let mut manifest = self.inner.lock().await;
        let mut ids: Vec<(i64, u64)> = manifest
            .messages
            .iter()
            .filter(|m| m.broker_id == broker_id && m.topic == topic)
            .map(|m| (m.received_at, m.id))
            .collect();
        if ids.len() <= keep {
            return Ok(0);
        }
        // Oldest first; everything before the keep-window goes.
        ids.sort_unstable();
        let excess = ids.len() - keep;
        let doomed: Vec<u64> = ids.into_iter().take(excess).map(|(_, id)| id).collect();
        manifest.messages.retain(|m| !doomed.contains(&m.id));
        self.flush(&manifest)?;
        Ok(excess)
    }

    pub async fn delete_message(&self, id: u64) -> Result<(), StoreError> {
        let mut manifest = self.inner.lock().await;
        manifest.messages.retain(|m| m.id != id);
        self.flush(&manifest)
    }

    // -----------------------------------------------------------------------
    // Topic counters
    // -----------------------------------------------------------------------

    pub async fn counter(
        &self,
        broker_id: BrokerId,
        topic: &str,
    ) -> Result<Option<TopicCounter>, StoreError> {
        let manifest = self.inner.lock().await;
        Ok(manifest
            .counters
            .iter()
            .find(|c| c.broker_id == broker_id && c.topic == topic)
            .cloned())
    }

    /// Bump counters for one ingested message: total always, unread only for
    /// new activity.
    pub async fn apply_counter(
        &self,
        broker_id: BrokerId,
        topic: &str,
        new_activity: bool,
    ) -> Result<(), StoreError> {
        let mut manifest = self.inner.lock().await;
        match manifest
            .counters
            .iter_mut()
            .find(|c| c.broker_id == broker_id && c.topic == topic)
        {
            Some(counter) => {
                counter.total += 1;
                if new_activity {
                    counter.unread += 1;
                }
            }
            None => manifest.counters.push(TopicCounter {
                broker_id,
                topic: topic.to_string(),
                unread: u64::from(new_activity),
                total: 1,
            }),
        }
        self.flush(&manifest)
    }

    pub async fn reset_unread_for_topic(
        &self,
        broker_id: BrokerId,
        topic: &str,
    ) -> Result<(), StoreError> {
        let mut manifest = self.inner.lock().await;
        if let Some(counter) = manifest
            .counters
            .iter_mut()
            .find(|c| c.broker_id == broker_id && c.topic == topic)
        {
            counter.unread = 0;
            self.flush(&manifest)?;
        }
        Ok(())
    }

    pub async fn reset_unread_for_broker(&self, broker_id: BrokerId) -> Result<(), StoreError> {
        let mut manifest = self.inner.lock().await;
        let mut touched = false;
        for counter in manifest
            .counters
            .iter_mut()
            .filter(|c| c.broker_id == broker_id)
        {
            touched |= counter.unread != 0;
            counter.unread = 0;
        }
        if touched {
            self.flush(&manifest)?;
        }
        Ok(())
    }

    pub async fn unread_count_for_broker(&self, broker_id: BrokerId) -> Result<u64, StoreError> {
        let manifest = self.inner.lock().await;
        Ok(manifest
            .counters
            .iter()
            .filter(|c| c.broker_id == broker_id)
            .map(|c| c.unread)
            .sum())
    }
}
