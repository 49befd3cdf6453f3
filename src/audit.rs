//! Append-only access log.
//!
//! Records every save, unlock attempt and removal the vault performs, keyed
//! by sanitised key id. Records never contain share material. Supports
//! pluggable sinks for forwarding records to files or other stores.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A sink that receives access records. Implement this to forward records
/// to a file, database or remote collector.
///
/// Sinks run while the vault's access log is locked. They may read gate
/// state, but must not call vault operations that record an event
/// (`save_share`, `load_share`, `remove_share`, `audit_records`).
pub trait AuditSink: Send {
    /// Append a record. Called once per vault event.
    fn append(&mut self, record: AccessRecord);
}

/// What happened to a share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AccessEvent {
    /// The share was encrypted and persisted.
    Saved,
    /// Authentication succeeded and the share was decrypted.
    Unlocked,
    /// The user or system dismissed the authenticator.
    Denied,
    /// The unlock ended in an error other than a dismissal.
    Failed { code: String },
    /// A load was refused because another unlock was in flight.
    Rejected,
    /// The blob and key were removed.
    Removed,
}

/// A permanent record of one vault event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRecord {
    /// The sanitised key id.
    pub key_id: String,
    pub event: AccessEvent,
    pub timestamp: DateTime<Utc>,
}

impl AccessRecord {
    pub fn now(key_id: &str, event: AccessEvent) -> Self {
        Self {
            key_id: key_id.to_string(),
            event,
            timestamp: Utc::now(),
        }
    }
}

/// An append-only log of access records.
/// Can forward records to additional sinks via `add_forward_sink`.
#[derive(Default)]
pub struct AuditLog {
    records: Vec<AccessRecord>,
    forward_sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("records", &self.records)
            .field("forward_sinks", &self.forward_sinks.len())
            .finish()
    }
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink to receive a copy of every record.
    pub fn add_forward_sink(&mut self, sink: Box<dyn AuditSink>) {
        self.forward_sinks.push(sink);
    }

    /// Append a new record to the log and forward to any attached sinks.
    pub fn append(&mut self, record: AccessRecord) {
        for sink in self.forward_sinks.iter_mut() {
            sink.append(record.clone());
        }
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AccessRecord> {
        self.records.iter()
    }
}

// ---------------------------------------------------------------------------
// Built-in sink: file
// ---------------------------------------------------------------------------

/// Writes access records as JSON lines (one per record) to a file.
/// Creates the file if it doesn't exist; appends if it does.
pub struct FileAuditSink {
    file: std::fs::File,
}

impl FileAuditSink {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }
}

impl AuditSink for FileAuditSink {
    fn append(&mut self, record: AccessRecord) {
        match serde_json::to_string(&record) {
            Ok(line) => {
                if let Err(e) = writeln!(self.file, "{line}").and_then(|_| self.file.flush()) {
                    tracing::warn!(error = %e, "failed to write audit record");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize audit record"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_sink_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.jsonl");

        let mut log = AuditLog::new();
        log.add_forward_sink(Box::new(FileAuditSink::new(&path).unwrap()));
        log.append(AccessRecord::now("wallet_1", AccessEvent::Saved));
        log.append(AccessRecord::now(
            "wallet_1",
            AccessEvent::Failed {
                code: "ERR_DECRYPT".into(),
            },
        ));
        assert_eq!(log.len(), 2);

        let contents = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<AccessRecord> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].event, AccessEvent::Saved);
        assert_eq!(
            parsed[1].event,
            AccessEvent::Failed {
                code: "ERR_DECRYPT".into()
            }
        );
    }
}
