//! Message-path logic: topic matching, ingestion, and retention.

pub mod ingest;
pub mod retention;
pub mod topics;

pub use ingest::{InboundMessage, IngestEngine};
pub use retention::{RetentionEngine, TrimOutcome};
pub use topics::{best_match, best_notify_match, topic_matches};
