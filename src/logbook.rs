use crate::models::{LogEntry, LogKind};
use chrono::Utc;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::{info, warn};

pub const DEFAULT_CAPACITY: usize = 200;

/// Ring buffer of recent operation events shown to the extension popup.
///
/// Cloning is cheap and every clone shares the same buffer.
#[derive(Clone)]
pub struct BoundedLog {
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
    capacity: usize,
}

impl BoundedLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, kind: LogKind, message: impl Into<String>) {
        let message = message.into();
        match kind {
            LogKind::Info => info!(target = "tl.log", kind = "info", "{message}"),
            LogKind::Success => info!(target = "tl.log", kind = "success", "{message}"),
            LogKind::Error => warn!(target = "tl.log", kind = "error", "{message}"),
        }
        let mut guard = self.lock();
        guard.push_back(LogEntry {
            timestamp: Utc::now(),
            message,
            kind,
        });
        while guard.len() > self.capacity {
            guard.pop_front();
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(LogKind::Info, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.push(LogKind::Success, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(LogKind::Error, message);
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
        self.info("Logs cleared");
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<LogEntry>> {
        // A panicking writer cannot leave the deque half-updated.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for BoundedLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
