//! Ingestion engine: classify, persist, count, and trim inbound messages.

use crate::core::time::Clock;
use crate::messaging::retention::RetentionEngine;
use crate::messaging::topics::best_match;
use crate::store::repo::{Store, StoreError};
use crate::store::types::{BrokerId, MessageRecord};
use tokio::sync::Mutex;

/// Maximum characters kept in the decoded payload preview.
const PREVIEW_MAX_CHARS: usize = 500;
/// Placeholder preview for payloads that are not valid UTF-8.
const BINARY_PREVIEW: &str = "<binary payload>";

/// An inbound message as delivered by the protocol adapter.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retained: bool,
    pub duplicate: bool,
    pub packet_id: Option<u16>,
}

/// Ingestion engine.
///
/// Safe to call concurrently; an internal gate serializes passes so counters
/// for the same (broker, topic) never race.
pub struct IngestEngine<C: Clock> {
    store: Store,
    retention: RetentionEngine<C>,
    clock: C,
    gate: Mutex<()>,
}

impl<C: Clock> IngestEngine<C> {
    pub fn new(store: Store, clock: C) -> Self {
        Self {
            retention: RetentionEngine::new(store.clone(), clock.clone()),
            store,
            clock,
            gate: Mutex::new(()),
        }
    }

    /// Classify and persist one message, update counters, then run the
    /// retention trim. Returns the persisted record with its assigned id.
    pub async fn ingest(
        &self,
        broker_id: BrokerId,
        message: &InboundMessage,
    ) -> Result<MessageRecord, StoreError> {
        let _serial = self.gate.lock().await;

        let configs = self.store.topics_for_broker(broker_id).await?;
        let matched = best_match(configs.iter(), &message.topic);
        let retained_as_new = matched.map_or(false, |c| c.retained_as_new);
        let new_activity = !message.retained || retained_as_new;

        let mut record = MessageRecord {
            id: 0,
            broker_id,
            topic: message.topic.clone(),
            received_at: self.clock.now_millis(),
            payload: message.payload.clone(),
            preview: payload_preview(&message.payload),
            qos: message.qos,
            retained: message.retained,
            duplicate: message.duplicate,
            packet_id: message.packet_id,
            new_activity,
        };
        record.id = self.store.insert_message(record.clone()).await?;

        self.store
            .apply_counter(broker_id, &message.topic, new_activity)
            .await?;
        self.retention.apply(broker_id, &message.topic).await?;

        Ok(record)
    }
}

/// Decode the payload as UTF-8 text, truncated; binary payloads get a fixed
/// placeholder instead.
fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.chars().take(PREVIEW_MAX_CHARS).collect(),
        Err(_) => BINARY_PREVIEW.to_string(),
    }
}
