//! Operational concerns: alert delivery, diagnostics, telemetry.

pub mod alerts;
pub mod diag;
pub mod telemetry;

pub use alerts::{AlertSink, LogAlertSink, MemoryAlertSink};
pub use diag::DiagnosticsLog;
