//! Connection coordinator.
//!
//! Owns the single broker session and reconciles it against desired state:
//! - desired state = app state (active broker, mode) plus the UI-visible and
//!   persistent-service flags,
//! - observed state = the session snapshot published on a watch channel.
//!
//! Reconciliation requests are coalesced through a bounded signal channel;
//! a full queue means a pass is already pending, so dropped signals are safe.
//! Inbound adapter events are dispatched from a dedicated task so the wire
//! pump never waits on persistence.

use crate::connection::adapter::{ClientEvent, ConnectionStatus, ProtocolAdapter};
use crate::core::time::Clock;
use crate::messaging::ingest::{InboundMessage, IngestEngine};
use crate::messaging::topics::best_notify_match;
use crate::ops::alerts::AlertSink;
use crate::ops::diag::DiagnosticsLog;
use crate::store::repo::Store;
use crate::store::types::{BrokerConfig, BrokerId, ConnectionMode, TopicConfig};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// Pending reconcile signals kept before coalescing kicks in.
const RECONCILE_QUEUE: usize = 64;

/// Observable session state, replaced wholesale on every change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub status: SnapshotStatus,
    pub broker_id: Option<BrokerId>,
    pub broker_label: Option<String>,
    pub connected_since: Option<i64>,
    pub message_count: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SnapshotStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

#[derive(Default)]
struct SessionState {
    connected_broker_id: Option<BrokerId>,
    active_broker: Option<BrokerConfig>,
    active_topics: Vec<TopicConfig>,
    subscribed: HashSet<String>,
    topic_watch: Option<JoinHandle<()>>,
}

struct Inner<C: Clock> {
    store: Store,
    adapter: Arc<dyn ProtocolAdapter>,
    secrets: Arc<dyn crate::store::secrets::SecretStore>,
    alerts: Arc<dyn AlertSink>,
    diag: DiagnosticsLog,
    clock: C,
    ingest: IngestEngine<C>,
    snapshot_tx: watch::Sender<ConnectionSnapshot>,
    reconcile_tx: mpsc::Sender<()>,
    ui_visible: AtomicBool,
    persistent_running: AtomicBool,
    session: Mutex<SessionState>,
}

pub struct Coordinator<C: Clock> {
    inner: Arc<Inner<C>>,
    reconcile_rx: parking_lot::Mutex<Option<mpsc::Receiver<()>>>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl<C: Clock> Coordinator<C> {
    pub fn new(
        store: Store,
        adapter: Arc<dyn ProtocolAdapter>,
        secrets: Arc<dyn crate::store::secrets::SecretStore>,
        alerts: Arc<dyn AlertSink>,
        diag: DiagnosticsLog,
        clock: C,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(ConnectionSnapshot::default());
        let (reconcile_tx, reconcile_rx) = mpsc::channel(RECONCILE_QUEUE);
        let inner = Arc::new(Inner {
            ingest: IngestEngine::new(store.clone(), clock.clone()),
            store,
            adapter,
            secrets,
            alerts,
            diag,
            clock,
            snapshot_tx,
            reconcile_tx,
            ui_visible: AtomicBool::new(false),
            persistent_running: AtomicBool::new(false),
            session: Mutex::new(SessionState::default()),
        });
        Self {
            inner,
            reconcile_rx: parking_lot::Mutex::new(Some(reconcile_rx)),
            tasks: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Start the background tasks. Call once; restarting after shutdown is
    /// not supported.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();

        // App-state changes feed the reconcile signal.
        let inner = self.inner.clone();
        let mut app_state_rx = inner.store.watch_app_state();
        tasks.push(tokio::spawn(async move {
            while app_state_rx.changed().await.is_ok() {
                inner.request_reconcile();
            }
        }));

        // Adapter events drive ingestion and the snapshot.
        let inner = self.inner.clone();
        let mut events_rx = inner.adapter.events();
        tasks.push(tokio::spawn(async move {
            loop {
                match events_rx.recv().await {
                    Ok(event) => inner.dispatch(event).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "adapter event stream lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        // Reconcile consumer. One pass per signal, coalesced by the queue.
        let inner = self.inner.clone();
        let mut reconcile_rx = self
            .reconcile_rx
            .lock()
            .take()
            .expect("coordinator started twice");
        tasks.push(tokio::spawn(async move {
            while reconcile_rx.recv().await.is_some() {
                if let Err(err) = Inner::reconcile_once(&inner).await {
                    tracing::warn!(error = %err, "reconcile pass failed");
                }
            }
        }));

        // Initial pass so the session converges on startup even when no
        // flag or app-state change follows.
        self.inner.request_reconcile();
    }

    /// Mark the UI as visible or hidden and reconcile.
    pub fn set_ui_visible(&self, visible: bool) {
        self.inner.ui_visible.store(visible, Ordering::SeqCst);
        self.inner.request_reconcile();
    }

    /// Mark the persistent service as running or stopped and reconcile.
    pub fn set_persistent_running(&self, running: bool) {
        self.inner
            .persistent_running
            .store(running, Ordering::SeqCst);
        self.inner.request_reconcile();
    }

    pub fn request_reconcile(&self) {
        self.inner.request_reconcile();
    }

    pub fn watch_snapshot(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    /// Stop the background tasks and close any open session.
    pub async fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.inner.disconnect_session("shutdown").await;
    }
}

impl<C: Clock> Inner<C> {
    /// Lossy by design: a full queue means a pass is already pending.
    fn request_reconcile(&self) {
        let _ = self.reconcile_tx.try_send(());
    }

    async fn reconcile_once(this: &Arc<Self>) -> Result<()> {
        let state = this
            .store
            .app_state()
            .await
            .context("load app state for reconcile")?;
        let should_connect = match state.mode {
            ConnectionMode::VisibleOnly => this.ui_visible.load(Ordering::SeqCst),
            ConnectionMode::Persistent => this.persistent_running.load(Ordering::SeqCst),
        };

        let target = state.active_broker_id.filter(|_| should_connect);
        let Some(broker_id) = target else {
            this.disconnect_session("no active connection target").await;
            return Ok(());
        };

        let already_connected = {
            let session = this.session.lock().await;
            session.connected_broker_id == Some(broker_id)
                && this.snapshot_tx.borrow().status == SnapshotStatus::Connected
        };
        if !already_connected {
            Self::connect_to(this, broker_id).await?;
        }
        Ok(())
    }

    async fn connect_to(this: &Arc<Self>, broker_id: BrokerId) -> Result<()> {
        this.disconnect_session("switching broker").await;

        let Some(broker) = this
            .store
            .broker(broker_id)
            .await
            .context("load broker config")?
        else {
            this.diag
                .log(format!("connect aborted: broker {broker_id} not found"));
            this.snapshot_tx.send_modify(|s| {
                s.status = SnapshotStatus::Error;
                s.broker_id = Some(broker_id);
                s.last_error = Some("broker not found".to_string());
            });
            return Ok(());
        };

        this.snapshot_tx.send_modify(|s| {
            s.status = SnapshotStatus::Connecting;
            s.broker_id = Some(broker_id);
            s.broker_label = Some(broker.label.clone());
            s.connected_since = None;
            s.message_count = 0;
            s.last_error = None;
        });

        let secret = match &broker.credentials_ref {
            Some(reference) => this
                .secrets
                .get(&reference.alias)
                .await
                .context("resolve broker credential")?,
            None => None,
        };

        if let Err(err) = this.adapter.connect(&broker, secret).await {
            tracing::warn!(broker = %broker.label, error = %err, "connect failed");
            this.diag
                .log(format!("connect to '{}' failed: {err}", broker.label));
            this.snapshot_tx.send_modify(|s| {
                s.status = SnapshotStatus::Error;
                s.last_error = Some(err.to_string());
            });
            return Ok(());
        }

        let now = this.clock.now_millis();
        {
            let mut session = this.session.lock().await;
            session.connected_broker_id = Some(broker_id);
            session.active_broker = Some(broker.clone());
        }

        // Snapshot must show Connected before the watch task runs its first
        // sync pass, or the pass bails on the status guard.
        this.snapshot_tx.send_modify(|s| {
            s.status = SnapshotStatus::Connected;
            s.connected_since = Some(now);
            s.message_count = 0;
        });
        this.store
            .set_last_session_started_at(Some(now))
            .await
            .context("record session start")?;
        this.diag.log(format!("connected to '{}'", broker.label));
        tracing::info!(broker = %broker.label, "session established");

        {
            let mut session = this.session.lock().await;
            if let Some(old) = session.topic_watch.take() {
                old.abort();
            }
            session.topic_watch = Some(tokio::spawn(Arc::clone(this).watch_topics(broker_id)));
        }

        Ok(())
    }

    /// Keep wire subscriptions in step with the configured topic set while
    /// the session lasts. Runs as the session's topic-watch task.
    async fn watch_topics(self: Arc<Self>, broker_id: BrokerId) {
        let mut topics_rx = self.store.watch_topics();
        loop {
            if let Err(err) = self.sync_subscriptions(broker_id).await {
                tracing::warn!(error = %err, "subscription sync failed");
            }
            if topics_rx.changed().await.is_err() {
                break;
            }
        }
    }

    async fn sync_subscriptions(&self, broker_id: BrokerId) -> Result<()> {
        let topics = self
            .store
            .topics_for_broker(broker_id)
            .await
            .context("load topics for sync")?;

        let mut session = self.session.lock().await;
        session.active_topics = topics.clone();
        if session.connected_broker_id != Some(broker_id)
            || self.snapshot_tx.borrow().status != SnapshotStatus::Connected
        {
            return Ok(());
        }

        let wanted: HashSet<String> = topics
            .iter()
            .filter(|t| t.enabled)
            .map(|t| t.filter.clone())
            .collect();

        for gone in session.subscribed.difference(&wanted) {
            if let Err(err) = self.adapter.unsubscribe(gone).await {
                tracing::warn!(filter = %gone, error = %err, "unsubscribe failed");
                self.diag.log(format!("unsubscribe '{gone}' failed: {err}"));
            }
        }
        for added in wanted.difference(&session.subscribed) {
            let qos = topics
                .iter()
                .find(|t| &t.filter == added)
                .map_or(1, |t| t.qos);
            if let Err(err) = self.adapter.subscribe(added, qos).await {
                tracing::warn!(filter = %added, error = %err, "subscribe failed");
                self.diag.log(format!("subscribe '{added}' failed: {err}"));
            }
        }
        session.subscribed = wanted;
        Ok(())
    }

    async fn dispatch(&self, event: ClientEvent) {
        match event {
            ClientEvent::ConnectionChanged(status) => self.handle_connection_state(status).await,
            ClientEvent::Message(message) => self.handle_message(message).await,
            ClientEvent::SubscriptionAck { filter } => {
                tracing::debug!(filter = %filter, "subscription acknowledged");
                self.diag.log(format!("subscribed to '{filter}'"));
            }
            ClientEvent::Error { message } => {
                self.diag.log(format!("session error: {message}"));
                self.snapshot_tx.send_modify(|s| {
                    s.status = SnapshotStatus::Error;
                    s.last_error = Some(message);
                });
            }
        }
    }

    async fn handle_connection_state(&self, status: ConnectionStatus) {
        match status {
            ConnectionStatus::Connected => {
                self.snapshot_tx.send_modify(|s| {
                    s.status = SnapshotStatus::Connected;
                    s.last_error = None;
                });
            }
            ConnectionStatus::Connecting => {
                self.snapshot_tx
                    .send_modify(|s| s.status = SnapshotStatus::Connecting);
            }
            ConnectionStatus::Disconnected => {
                self.snapshot_tx.send_modify(|s| {
                    s.status = SnapshotStatus::Disconnected;
                    s.connected_since = None;
                    s.message_count = 0;
                });
            }
            ConnectionStatus::Error => {
                self.snapshot_tx
                    .send_modify(|s| s.status = SnapshotStatus::Error);
            }
        }
    }

    async fn handle_message(&self, message: InboundMessage) {
        let (broker_id, broker_label, topics) = {
            let session = self.session.lock().await;
            let Some(broker_id) = session.connected_broker_id else {
                return;
            };
            let label = session
                .active_broker
                .as_ref()
                .map(|b| b.label.clone())
                .unwrap_or_default();
            (broker_id, label, session.active_topics.clone())
        };

        let record = match self.ingest.ingest(broker_id, &message).await {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(topic = %message.topic, error = %err, "ingest failed");
                return;
            }
        };
        self.snapshot_tx.send_modify(|s| s.message_count += 1);

        let notify = best_notify_match(topics.iter(), &message.topic).is_some();
        if !notify || !record.new_activity {
            return;
        }
        let muted = match self.store.app_state().await {
            Ok(state) => state.is_muted(self.clock.now_millis()),
            Err(err) => {
                tracing::warn!(error = %err, "mute check failed");
                false
            }
        };
        if !muted {
            self.alerts.notify(&broker_label, &record);
        }
    }

    /// Tear down the current session if one is active. Keeps the last label
    /// and error in the snapshot for display.
    async fn disconnect_session(&self, reason: &str) {
        let mut session = self.session.lock().await;
        if let Some(watch) = session.topic_watch.take() {
            watch.abort();
        }
        let was_active = session.connected_broker_id.is_some()
            || self.snapshot_tx.borrow().status != SnapshotStatus::Disconnected;
        session.connected_broker_id = None;
        session.active_broker = None;
        session.active_topics.clear();
        session.subscribed.clear();
        drop(session);

        if !was_active {
            return;
        }
        self.adapter.disconnect().await;
        self.diag.log(format!("session closed: {reason}"));
        self.snapshot_tx.send_modify(|s| {
            s.status = SnapshotStatus::Disconnected;
            s.connected_since = None;
            s.message_count = 0;
        });
    }
}
