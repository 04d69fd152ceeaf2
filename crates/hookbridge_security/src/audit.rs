//! Audit log: records every authn/authz decision and every breaker/
//! shutdown transition (§4.5). Held in a bounded in-memory ring and
//! optionally mirrored to an append-only NDJSON file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

const RING_CAPACITY: usize = 10_000;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("failed to open audit log at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write audit entry: {0}")]
    Write(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub principal: String,
    pub severity: Severity,
    #[serde(default)]
    pub detail: serde_json::Value,
}

/// Append-mostly audit trail. The ring is protected by its own mutex so a
/// slow mirrored write never holds up a caller appending under a
/// dispatcher hot path's other locks (§5's shared-resource policy).
pub struct AuditLog {
    ring: Mutex<VecDeque<AuditRecord>>,
    mirror: Option<Mutex<BufWriter<File>>>,
}

impl AuditLog {
    /// An in-memory-only audit log (no file mirror).
    pub fn in_memory() -> Self {
        Self {
            ring: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
            mirror: None,
        }
    }

    /// An audit log that also mirrors every record as NDJSON to `path`.
    pub fn with_mirror(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| AuditError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| AuditError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            ring: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
            mirror: Some(Mutex::new(BufWriter::new(file))),
        })
    }

    pub fn record(&self, event: impl Into<String>, principal: impl Into<String>, severity: Severity, detail: serde_json::Value) {
        let record = AuditRecord {
            timestamp: Utc::now(),
            event: event.into(),
            principal: principal.into(),
            severity,
            detail,
        };

        {
            let mut ring = self.ring.lock().expect("audit ring lock poisoned");
            if ring.len() >= RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(record.clone());
        }

        if let Some(mirror) = &self.mirror {
            if let Ok(line) = serde_json::to_string(&record) {
                let mut writer = mirror.lock().expect("audit mirror lock poisoned");
                let _ = writeln!(writer, "{line}");
                let _ = writer.flush();
            }
        }
    }

    /// Snapshot the most recent `limit` records, newest last.
    pub fn recent(&self, limit: usize) -> Vec<AuditRecord> {
        let ring = self.ring.lock().expect("audit ring lock poisoned");
        let skip = ring.len().saturating_sub(limit);
        ring.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().expect("audit ring lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_retrievable() {
        let log = AuditLog::in_memory();
        log.record("auth.success", "alice", Severity::Info, serde_json::json!({}));
        log.record("auth.failure", "mallory", Severity::Warning, serde_json::json!({"reason": "bad token"}));
        let recent = log.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].event, "auth.success");
        assert_eq!(recent[1].principal, "mallory");
    }

    #[test]
    fn ring_evicts_oldest_beyond_capacity() {
        let log = AuditLog::in_memory();
        for i in 0..(RING_CAPACITY + 5) {
            log.record(format!("event-{i}"), "p", Severity::Info, serde_json::json!({}));
        }
        assert_eq!(log.len(), RING_CAPACITY);
        let recent = log.recent(1);
        assert_eq!(recent[0].event, format!("event-{}", RING_CAPACITY + 4));
    }

    #[test]
    fn mirror_writes_ndjson() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.ndjson");
        let log = AuditLog::with_mirror(&path).unwrap();
        log.record("worker.registered", "system", Severity::Info, serde_json::json!({"worker": "w1"}));
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("worker.registered"));
    }
}
