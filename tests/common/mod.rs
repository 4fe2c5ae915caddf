//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use mqttwatch::connection::{AdapterError, ClientEvent, ConnectionStatus, ProtocolAdapter};
use mqttwatch::store::{BrokerConfig, ProtocolVersion, Store, TopicConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect { broker_id: u64, secret: Option<String> },
    Disconnect,
    Subscribe { filter: String, qos: u8 },
    Unsubscribe { filter: String },
}

/// Scripted adapter recording every call. Connect succeeds unless a failure
/// is armed; success emits a Connected event like the real engine.
pub struct MockAdapter {
    events_tx: broadcast::Sender<ClientEvent>,
    calls: Mutex<Vec<Call>>,
    fail_connect: Mutex<Option<String>>,
}

impl MockAdapter {
    pub fn new() -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            events_tx,
            calls: Mutex::new(Vec::new()),
            fail_connect: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn fail_next_connect(&self, reason: &str) {
        *self.fail_connect.lock() = Some(reason.to_string());
    }

    pub fn emit(&self, event: ClientEvent) {
        let _ = self.events_tx.send(event);
    }
}

#[async_trait]
impl ProtocolAdapter for MockAdapter {
    async fn connect(
        &self,
        config: &BrokerConfig,
        secret: Option<String>,
    ) -> Result<(), AdapterError> {
        self.calls.lock().push(Call::Connect {
            broker_id: config.id,
            secret,
        });
        if let Some(reason) = self.fail_connect.lock().take() {
            return Err(AdapterError::ConnectFailed {
                host: config.host.clone(),
                port: config.port,
                reason,
            });
        }
        self.emit(ClientEvent::ConnectionChanged(ConnectionStatus::Connected));
        Ok(())
    }

    async fn disconnect(&self) {
        self.calls.lock().push(Call::Disconnect);
        self.emit(ClientEvent::ConnectionChanged(
            ConnectionStatus::Disconnected,
        ));
    }

    async fn subscribe(&self, filter: &str, qos: u8) -> Result<(), AdapterError> {
        self.calls.lock().push(Call::Subscribe {
            filter: filter.to_string(),
            qos,
        });
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), AdapterError> {
        self.calls.lock().push(Call::Unsubscribe {
            filter: filter.to_string(),
        });
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events_tx.subscribe()
    }
}

/// Poll until the condition holds or two seconds elapse.
pub async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Persist a broker that already passed its connectivity test.
pub async fn seed_broker(store: &Store, label: &str) -> u64 {
    store
        .save_broker(
            BrokerConfig {
                id: 0,
                label: label.to_string(),
                host: format!("{label}.local"),
                port: 1883,
                tls: false,
                protocol_version: ProtocolVersion::V311,
                username: None,
                credentials_ref: None,
                client_id: None,
                keepalive_secs: 30,
                clean_start: true,
                session_expiry_secs: 0,
                last_test_passed_at: Some(0),
            },
            0,
        )
        .await
        .unwrap()
}

pub async fn seed_topic(store: &Store, broker_id: u64, filter: &str) -> u64 {
    store
        .upsert_topic(TopicConfig {
            id: 0,
            broker_id,
            filter: filter.to_string(),
            qos: 1,
            enabled: true,
            notify_enabled: true,
            retained_as_new: false,
        })
        .await
        .unwrap()
}
