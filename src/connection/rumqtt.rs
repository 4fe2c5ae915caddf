//! Live protocol adapter backed by rumqttc.
//!
//! Speaks MQTT 5 or 3.1.1 per the broker's protocol preference; `Auto` tries
//! v5 first and falls back to 3.1.1. One background pump task per session
//! translates eventloop traffic into [`ClientEvent`]s; the adapter itself
//! never blocks on processing.

use crate::connection::adapter::{AdapterError, ClientEvent, ConnectionStatus, ProtocolAdapter};
use crate::messaging::ingest::InboundMessage;
use crate::store::types::{BrokerConfig, ProtocolVersion};
use async_trait::async_trait;
use rumqttc::v5;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, Incoming, MqttOptions, QoS,
    TlsConfiguration, Transport,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

const EVENT_BUFFER: usize = 256;
const REQUEST_QUEUE: usize = 64;
const MIN_CONNECT_TIMEOUT_SECS: u64 = 10;

enum EngineClient {
    V311(AsyncClient),
    V5(v5::AsyncClient),
}

struct ActiveSession {
    client: EngineClient,
    pump: JoinHandle<()>,
    closing: Arc<AtomicBool>,
}

/// MQTT adapter on the rumqttc engine.
pub struct RumqttAdapter {
    events_tx: broadcast::Sender<ClientEvent>,
    session: Mutex<Option<ActiveSession>>,
}

impl RumqttAdapter {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            events_tx,
            session: Mutex::new(None),
        }
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events_tx.send(event);
    }

    async fn teardown(&self, session: &mut Option<ActiveSession>) {
        if let Some(active) = session.take() {
            active.closing.store(true, Ordering::SeqCst);
            match &active.client {
                EngineClient::V311(client) => {
                    let _ = client.disconnect().await;
                }
                EngineClient::V5(client) => {
                    let _ = client.disconnect().await;
                }
            }
            active.pump.abort();
            self.emit(ClientEvent::ConnectionChanged(
                ConnectionStatus::Disconnected,
            ));
        }
    }

    async fn connect_v311(
        &self,
        config: &BrokerConfig,
        secret: Option<String>,
    ) -> Result<ActiveSession, AdapterError> {
        let mut options = MqttOptions::new(client_id(config), config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(u64::from(config.keepalive_secs)));
        options.set_clean_session(config.clean_start);
        if let Some(username) = &config.username {
            options.set_credentials(username.clone(), secret.unwrap_or_default());
        }
        if config.tls {
            options.set_transport(Transport::tls_with_config(native_tls_config(config)?));
        }

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_QUEUE);
        let wait = tokio::time::timeout(connect_timeout(config), async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                        if ack.code == ConnectReturnCode::Success {
                            return Ok(());
                        }
                        return Err(format!("connection rejected: {:?}", ack.code));
                    }
                    Ok(_) => {}
                    Err(err) => return Err(err.to_string()),
                }
            }
        })
        .await;
        check_connack(config, wait)?;

        let closing = Arc::new(AtomicBool::new(false));
        let pump = tokio::spawn(pump_v311(
            eventloop,
            self.events_tx.clone(),
            closing.clone(),
        ));
        Ok(ActiveSession {
            client: EngineClient::V311(client),
            pump,
            closing,
        })
    }

    async fn connect_v5(
        &self,
        config: &BrokerConfig,
        secret: Option<String>,
    ) -> Result<ActiveSession, AdapterError> {
        let mut options = v5::MqttOptions::new(client_id(config), config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(u64::from(config.keepalive_secs)));
        options.set_clean_start(config.clean_start);
        if let Some(username) = &config.username {
            options.set_credentials(username.clone(), secret.unwrap_or_default());
        }
        if config.tls {
            options.set_transport(Transport::tls_with_config(native_tls_config(config)?));
        }

        let (client, mut eventloop) = v5::AsyncClient::new(options, REQUEST_QUEUE);
        let wait = tokio::time::timeout(connect_timeout(config), async {
            loop {
                match eventloop.poll().await {
                    Ok(v5::Event::Incoming(v5::Incoming::ConnAck(ack))) => {
                        if ack.code == v5::mqttbytes::v5::ConnectReturnCode::Success {
                            return Ok(());
                        }
                        return Err(format!("connection rejected: {:?}", ack.code));
                    }
                    Ok(_) => {}
                    Err(err) => return Err(err.to_string()),
                }
            }
        })
        .await;
        check_connack(config, wait)?;

        let closing = Arc::new(AtomicBool::new(false));
        let pump = tokio::spawn(pump_v5(eventloop, self.events_tx.clone(), closing.clone()));
        Ok(ActiveSession {
            client: EngineClient::V5(client),
            pump,
            closing,
        })
    }
}

impl Default for RumqttAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolAdapter for RumqttAdapter {
    async fn connect(
        &self,
        config: &BrokerConfig,
        secret: Option<String>,
    ) -> Result<(), AdapterError> {
        let mut session = self.session.lock().await;
        self.teardown(&mut session).await;
        self.emit(ClientEvent::ConnectionChanged(ConnectionStatus::Connecting));

        let active = match config.protocol_version {
            ProtocolVersion::V311 => self.connect_v311(config, secret).await?,
            ProtocolVersion::V5 => self.connect_v5(config, secret).await?,
            ProtocolVersion::Auto => match self.connect_v5(config, secret.clone()).await {
                Ok(active) => active,
                Err(err) => {
                    tracing::debug!(
                        broker = %config.label,
                        error = %err,
                        "v5 connect failed, falling back to 3.1.1"
                    );
                    self.connect_v311(config, secret).await?
                }
            },
        };

        *session = Some(active);
        self.emit(ClientEvent::ConnectionChanged(ConnectionStatus::Connected));
        Ok(())
    }

    async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        self.teardown(&mut session).await;
    }

    async fn subscribe(&self, filter: &str, qos: u8) -> Result<(), AdapterError> {
        let session = self.session.lock().await;
        let result = match session.as_ref().map(|s| &s.client) {
            Some(EngineClient::V311(client)) => client
                .subscribe(filter.to_string(), qos_level(qos))
                .await
                .map_err(|err| err.to_string()),
            Some(EngineClient::V5(client)) => client
                .subscribe(filter.to_string(), qos_level_v5(qos))
                .await
                .map_err(|err| err.to_string()),
            None => return Err(AdapterError::NotConnected),
        };
        drop(session);

        result.map_err(|reason| AdapterError::RequestFailed {
            op: "subscribe",
            filter: filter.to_string(),
            reason,
        })?;
        self.emit(ClientEvent::SubscriptionAck {
            filter: filter.to_string(),
        });
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), AdapterError> {
        let session = self.session.lock().await;
        let result = match session.as_ref().map(|s| &s.client) {
            Some(EngineClient::V311(client)) => client
                .unsubscribe(filter.to_string())
                .await
                .map_err(|err| err.to_string()),
            Some(EngineClient::V5(client)) => client
                .unsubscribe(filter.to_string())
                .await
                .map_err(|err| err.to_string()),
            None => return Err(AdapterError::NotConnected),
        };
        drop(session);

        result.map_err(|reason| AdapterError::RequestFailed {
            op: "unsubscribe",
            filter: filter.to_string(),
            reason,
        })
    }

    fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events_tx.subscribe()
    }
}

fn client_id(config: &BrokerConfig) -> String {
    match &config.client_id {
        Some(id) if !id.is_empty() => id.clone(),
        _ => format!("mqttwatch-{}", uuid::Uuid::new_v4().simple()),
    }
}

fn connect_timeout(config: &BrokerConfig) -> Duration {
    Duration::from_secs(u64::from(config.keepalive_secs).max(MIN_CONNECT_TIMEOUT_SECS))
}

fn check_connack(
    config: &BrokerConfig,
    wait: Result<Result<(), String>, tokio::time::error::Elapsed>,
) -> Result<(), AdapterError> {
    let reason = match wait {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(reason)) => reason,
        Err(_) => "connect timed out".to_string(),
    };
    Err(AdapterError::ConnectFailed {
        host: config.host.clone(),
        port: config.port,
        reason,
    })
}

/// Drive the 3.1.1 eventloop until the session ends, forwarding traffic as
/// events. No automatic reconnect: retry is owned by the coordinator's next
/// reconciliation pass.
async fn pump_v311(
    mut eventloop: EventLoop,
    events_tx: broadcast::Sender<ClientEvent>,
    closing: Arc<AtomicBool>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                let _ = events_tx.send(ClientEvent::Message(InboundMessage {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                    qos: publish.qos as u8,
                    retained: publish.retain,
                    duplicate: publish.dup,
                    packet_id: (publish.pkid != 0).then_some(publish.pkid),
                }));
            }
            Ok(Event::Incoming(Incoming::Disconnect)) => {
                let _ = events_tx.send(ClientEvent::ConnectionChanged(
                    ConnectionStatus::Disconnected,
                ));
                break;
            }
            Ok(_) => {}
            Err(err) => {
                if !closing.load(Ordering::SeqCst) {
                    let _ = events_tx.send(ClientEvent::Error {
                        message: format!("session lost: {err}"),
                    });
                    let _ = events_tx.send(ClientEvent::ConnectionChanged(
                        ConnectionStatus::Disconnected,
                    ));
                }
                break;
            }
        }
    }
}

/// v5 counterpart of [`pump_v311`]; topic names arrive as raw bytes here.
async fn pump_v5(
    mut eventloop: v5::EventLoop,
    events_tx: broadcast::Sender<ClientEvent>,
    closing: Arc<AtomicBool>,
) {
    loop {
        match eventloop.poll().await {
            Ok(v5::Event::Incoming(v5::Incoming::Publish(publish))) => {
                let _ = events_tx.send(ClientEvent::Message(InboundMessage {
                    topic: String::from_utf8_lossy(&publish.topic).into_owned(),
                    payload: publish.payload.to_vec(),
                    qos: publish.qos as u8,
                    retained: publish.retain,
                    duplicate: publish.dup,
                    packet_id: (publish.pkid != 0).then_some(publish.pkid),
                }));
            }
            Ok(v5::Event::Incoming(v5::Incoming::Disconnect(_))) => {
                let _ = events_tx.send(ClientEvent::ConnectionChanged(
                    ConnectionStatus::Disconnected,
                ));
                break;
            }
            Ok(_) => {}
            Err(err) => {
                if !closing.load(Ordering::SeqCst) {
                    let _ = events_tx.send(ClientEvent::Error {
                        message: format!("session lost: {err}"),
                    });
                    let _ = events_tx.send(ClientEvent::ConnectionChanged(
                        ConnectionStatus::Disconnected,
                    ));
                }
                break;
            }
        }
    }
}

fn qos_level(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

fn qos_level_v5(qos: u8) -> v5::mqttbytes::QoS {
    match qos {
        0 => v5::mqttbytes::QoS::AtMostOnce,
        2 => v5::mqttbytes::QoS::ExactlyOnce,
        _ => v5::mqttbytes::QoS::AtLeastOnce,
    }
}

fn native_tls_config(config: &BrokerConfig) -> Result<TlsConfiguration, AdapterError> {
    let mut roots = rustls::RootCertStore::empty();
    let certs = rustls_native_certs::load_native_certs().map_err(|err| {
        AdapterError::ConnectFailed {
            host: config.host.clone(),
            port: config.port,
            reason: format!("load system trust roots: {err}"),
        }
    })?;
    for cert in certs {
        // Skip roots the trust store cannot parse; one bad cert should not
        // block the connection.
        let _ = roots.add(&rustls::Certificate(cert.0));
    }
    let tls = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConfiguration::Rustls(Arc::new(tls)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_mapping() {
        assert_eq!(qos_level(0), QoS::AtMostOnce);
        assert_eq!(qos_level(1), QoS::AtLeastOnce);
        assert_eq!(qos_level(2), QoS::ExactlyOnce);
        assert_eq!(qos_level(9), QoS::AtLeastOnce);

        assert_eq!(qos_level_v5(0), v5::mqttbytes::QoS::AtMostOnce);
        assert_eq!(qos_level_v5(2), v5::mqttbytes::QoS::ExactlyOnce);
        assert_eq!(qos_level_v5(9), v5::mqttbytes::QoS::AtLeastOnce);
    }

    #[test]
    fn test_client_id_generated_when_unset() {
        let config = BrokerConfig {
            id: 1,
            label: "b".to_string(),
            host: "broker.local".to_string(),
            port: 1883,
            tls: false,
            protocol_version: ProtocolVersion::Auto,
            username: None,
            credentials_ref: None,
            client_id: None,
            keepalive_secs: 30,
            clean_start: true,
            session_expiry_secs: 0,
            last_test_passed_at: None,
        };
        assert!(client_id(&config).starts_with("mqttwatch-"));
        let explicit = BrokerConfig {
            client_id: Some("node-7".to_string()),
            ..config
        };
        assert_eq!(client_id(&explicit), "node-7");
    }

    #[tokio::test]
    async fn test_subscribe_before_connect_is_contract_violation() {
        let adapter = RumqttAdapter::new();
        let err = adapter.subscribe("a/b", 1).await.unwrap_err();
        assert!(matches!(err, AdapterError::NotConnected));
    }
}
