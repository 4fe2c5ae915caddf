//! In-memory diagnostics ring.
//!
//! Lifecycle events get a timestamped line in a bounded ring so a state dump
//! can show recent history without touching the persisted store.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

const MAX_ENTRIES: usize = 300;

#[derive(Clone, Default)]
pub struct DiagnosticsLog {
    entries: Arc<Mutex<VecDeque<String>>>,
}

impl DiagnosticsLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one line, evicting the oldest once the ring is full.
    pub fn log(&self, line: impl AsRef<str>) {
        let stamped = format!(
            "{} {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            line.as_ref()
        );
        let mut entries = self.entries.lock();
        if entries.len() == MAX_ENTRIES {
            entries.pop_front();
        }
        entries.push_back(stamped);
    }

    /// Snapshot of the ring, oldest first.
    pub fn recent(&self) -> Vec<String> {
        self.entries.lock().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_evicts_oldest() {
        let diag = DiagnosticsLog::new();
        for i in 0..MAX_ENTRIES + 5 {
            diag.log(format!("line {i}"));
        }
        let entries = diag.recent();
        assert_eq!(entries.len(), MAX_ENTRIES);
        assert!(entries[0].ends_with("line 5"));
    }
}
