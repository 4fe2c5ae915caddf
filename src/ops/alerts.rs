//! Alert delivery seam.
//!
//! The coordinator decides *whether* a message alerts; this trait decides
//! *how* the alert surfaces. The default sink writes structured log lines.

use crate::store::types::MessageRecord;
use parking_lot::Mutex;
use std::sync::Arc;

pub trait AlertSink: Send + Sync {
    fn notify(&self, broker_label: &str, record: &MessageRecord);
}

/// Sink that surfaces alerts as log events.
#[derive(Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn notify(&self, broker_label: &str, record: &MessageRecord) {
        tracing::info!(
            broker = broker_label,
            topic = %record.topic,
            preview = %record.preview,
            "alert"
        );
    }
}

/// Records alerts for inspection in tests.
#[derive(Clone, Default)]
pub struct MemoryAlertSink {
    delivered: Arc<Mutex<Vec<(String, MessageRecord)>>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<(String, MessageRecord)> {
        self.delivered.lock().clone()
    }
}

impl AlertSink for MemoryAlertSink {
    fn notify(&self, broker_label: &str, record: &MessageRecord) {
        self.delivered
            .lock()
            .push((broker_label.to_string(), record.clone()));
    }
}
