use dashmap::DashMap;
use relayapi::{ScriptLogEntry, ScriptLogKind};
use std::sync::Arc;

/// Per-override execution logs, keyed by override uid.
///
/// Each override's log is truncated when that override starts executing and
/// appended to for the rest of the run; other overrides' logs are untouched.
#[derive(Default, Clone)]
pub struct OverrideLogStore {
    inner: Arc<DashMap<String, Vec<ScriptLogEntry>>>,
}

impl OverrideLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self, uid: &str) {
        self.inner.insert(uid.to_string(), Vec::new());
    }

    pub fn get(&self, uid: &str) -> Vec<ScriptLogEntry> {
        self.inner
            .get(uid)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    pub fn sink(&self, uid: &str) -> LogSink {
        LogSink {
            uid: uid.to_string(),
            store: self.inner.clone(),
        }
    }
}

/// Append handle for one override's log, cheap to clone into the sandbox.
#[derive(Clone)]
pub struct LogSink {
    uid: String,
    store: Arc<DashMap<String, Vec<ScriptLogEntry>>>,
}

impl LogSink {
    pub fn push(&self, kind: ScriptLogKind, message: String) {
        let time = chrono::Local::now().format("%H:%M:%S%.3f").to_string();
        self.store
            .entry(self.uid.clone())
            .or_default()
            .push(ScriptLogEntry {
                time,
                kind,
                message,
            });
    }
}
