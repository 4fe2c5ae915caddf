//! Retention engine: resolves the applicable trimming policy for a
//! (broker, topic) pair and applies it after an insert.

use crate::core::time::Clock;
use crate::store::repo::{Store, StoreError};
use crate::store::types::BrokerId;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Result of one trim pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrimOutcome {
    /// Records removed because they aged out.
    pub expired: usize,
    /// Records removed because the topic exceeded its message cap.
    pub overflow: usize,
}

#[derive(Clone)]
pub struct RetentionEngine<C: Clock> {
    store: Store,
    clock: C,
}

impl<C: Clock> RetentionEngine<C> {
    pub fn new(store: Store, clock: C) -> Self {
        Self { store, clock }
    }

    /// Apply the resolved policy for `(broker_id, topic)`: age-based deletes
    /// first, then cap the remaining count to the newest `max_messages`.
    /// No-op when the policy has trim-on-insert disabled.
    pub async fn apply(&self, broker_id: BrokerId, topic: &str) -> Result<TrimOutcome, StoreError> {
        let policy = self.store.policy_for_topic(broker_id, topic).await?;
        if !policy.trim_on_insert {
            return Ok(TrimOutcome::default());
        }

        let cutoff = self.clock.now_millis() - policy.max_age_days * DAY_MS;
        let expired = self
            .store
            .delete_messages_older_than(broker_id, topic, cutoff)
            .await?;

        let count = self.store.count_for_topic(broker_id, topic).await?;
        let overflow = if count > policy.max_messages {
            self.store
                .delete_overflow(broker_id, topic, policy.max_messages)
                .await?
        } else {
            0
        };

        Ok(TrimOutcome { expired, overflow })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::ManualClock;
    use crate::store::types::{MessageRecord, RetentionPolicy};

    fn message(topic: &str, received_at: i64) -> MessageRecord {
        MessageRecord {
            id: 0,
            broker_id: 1,
            topic: topic.to_string(),
            received_at,
            payload: Vec::new(),
            preview: String::new(),
            qos: 0,
            retained: false,
            duplicate: false,
            packet_id: None,
            new_activity: true,
        }
    }

    #[tokio::test]
    async fn test_age_then_overflow() {
        let store = Store::in_memory();
        let clock = ManualClock::at(10 * DAY_MS);
        store
            .upsert_policy(RetentionPolicy {
                id: 0,
                broker_id: None,
                filter: None,
                max_messages: 2,
                max_age_days: 3,
                trim_on_insert: true,
            })
            .await
            .unwrap();

        // One expired record, four inside the age window.
        store.insert_message(message("t", DAY_MS)).await.unwrap();
        for i in 0..4 {
            store
                .insert_message(message("t", 8 * DAY_MS + i))
                .await
                .unwrap();
        }

        let engine = RetentionEngine::new(store.clone(), clock);
        let outcome = engine.apply(1, "t").await.unwrap();
        assert_eq!(outcome.expired, 1);
        assert_eq!(outcome.overflow, 2);
        assert_eq!(store.count_for_topic(1, "t").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_trim_disabled_is_noop() {
        let store = Store::in_memory();
        store
            .upsert_policy(RetentionPolicy {
                id: 0,
                broker_id: None,
                filter: None,
                max_messages: 1,
                max_age_days: 1,
                trim_on_insert: false,
            })
            .await
            .unwrap();
        for i in 0..3 {
            store.insert_message(message("t", i)).await.unwrap();
        }

        let engine = RetentionEngine::new(store.clone(), ManualClock::at(10 * DAY_MS));
        assert_eq!(engine.apply(1, "t").await.unwrap(), TrimOutcome::default());
        assert_eq!(store.count_for_topic(1, "t").await.unwrap(), 3);
    }
}
