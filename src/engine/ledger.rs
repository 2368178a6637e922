//! engine::ledger
//!
//! Append-only transaction ledger for synchronization.
//!
//! # Architecture
//!
//! Every successful publish of a subtree appends one
//! [`TransactionRecord`]. The record's idempotency key is the pair
//! `(root, fingerprint)` of the draft subtree that was published.
//!
//! Before planning, the sync engine asks [`TransactionLedger::has_applied`]
//! whether the *latest* record for the root carries the current
//! fingerprint. Comparing against the latest record rather than any record
//! means an edit that is later reverted to an earlier state still gets
//! published.
//!
//! The ledger can be purely in memory or backed by a JSON Lines file. In
//! the file-backed case every append is written and fsynced before it is
//! visible in memory, so a crash never leaves a record that readers saw but
//! the file lost.
//!
//! Reopening replays the file. A partial final line left by an interrupted
//! append is truncated away; an unparsable line anywhere else is
//! [`LedgerError::Corrupted`].
//!
//! # Invariants
//!
//! - Records are never modified or removed
//! - Per root, timestamps are strictly increasing
//! - Appends are serialized by an internal mutex
//!
//! # Example
//!
//! ```
//! use casework::core::types::{Fingerprint, NodeId};
//! use casework::engine::ledger::{SyncOperation, TransactionLedger, TransactionRecord};
//! use chrono::Utc;
//!
//! let ledger = TransactionLedger::in_memory();
//! let fp = Fingerprint::builder().field("a").finish();
//! let record = TransactionRecord::new(NodeId::new(1), SyncOperation::Create, fp.clone(), Utc::now());
//! let key = record.key();
//!
//! assert!(!ledger.has_applied(&key));
//! ledger.record(record).unwrap();
//! assert!(ledger.has_applied(&key));
//! ```

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::core::types::{Fingerprint, NodeId};

/// Errors from ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Append could not be made durable.
    #[error("failed to write ledger record: {0}")]
    Write(String),

    /// Failed to open or read the ledger file.
    #[error("failed to read ledger '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A line in the ledger file is not a record.
    #[error("ledger corrupted at line {line}: {message}")]
    Corrupted { line: usize, message: String },
}

/// What a publish did to the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    /// Root did not exist in the published store.
    Create,
    /// Root existed and some part of its subtree changed.
    Update,
    /// Root was deleted in draft and tombstoned in published.
    Delete,
}

impl std::fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncOperation::Create => write!(f, "create"),
            SyncOperation::Update => write!(f, "update"),
            SyncOperation::Delete => write!(f, "delete"),
        }
    }
}

/// `(root, subtree fingerprint)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub root: NodeId,
    pub fingerprint: Fingerprint,
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.root, self.fingerprint.short())
    }
}

/// One ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub operation: SyncOperation,
    pub root: NodeId,
    pub fingerprint: Fingerprint,
    #[serde(default)]
    pub created: usize,
    #[serde(default)]
    pub updated: usize,
    #[serde(default)]
    pub deleted: usize,
}

impl TransactionRecord {
    /// A record with zero counts and a fresh id.
    pub fn new(
        root: NodeId,
        operation: SyncOperation,
        fingerprint: Fingerprint,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            operation,
            root,
            fingerprint,
            created: 0,
            updated: 0,
            deleted: 0,
        }
    }

    /// Builder-style counts.
    pub fn with_counts(mut self, created: usize, updated: usize, deleted: usize) -> Self {
        self.created = created;
        self.updated = updated;
        self.deleted = deleted;
        self
    }

    pub fn key(&self) -> IdempotencyKey {
        IdempotencyKey {
            root: self.root,
            fingerprint: self.fingerprint.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    records: Vec<TransactionRecord>,
    /// Index into `records` of the latest record per root.
    latest: HashMap<NodeId, usize>,
    file: Option<File>,
}

impl LedgerState {
    fn push(&mut self, record: TransactionRecord) {
        self.latest.insert(record.root, self.records.len());
        self.records.push(record);
    }

    fn latest_for(&self, root: NodeId) -> Option<&TransactionRecord> {
        self.latest.get(&root).and_then(|&i| self.records.get(i))
    }
}

/// How a ledger file ends.
#[derive(Debug, PartialEq, Eq)]
enum Tail {
    Clean,
    /// The last record parsed but its newline never reached disk.
    MissingNewline,
    /// The last line is a partial write starting at byte `offset`.
    Torn { line: usize, offset: u64 },
}

#[derive(Debug)]
struct Replay {
    records: Vec<TransactionRecord>,
    tail: Tail,
}

/// Parse a ledger file.
///
/// A line that does not parse is corruption, unless it is the final line
/// and has no newline: an append interrupted mid-write leaves exactly that.
fn replay(bytes: &[u8]) -> Result<Replay, LedgerError> {
    let mut records = Vec::new();
    let mut offset = 0;
    let mut line = 0;

    while offset < bytes.len() {
        line += 1;
        let rest = &bytes[offset..];
        let (raw, complete) = match rest.iter().position(|&b| b == b'\n') {
            Some(end) => (&rest[..end], true),
            None => (rest, false),
        };
        let parsed = std::str::from_utf8(raw)
            .map_err(|e| e.to_string())
            .and_then(|text| {
                if text.trim().is_empty() {
                    Ok(None)
                } else {
                    serde_json::from_str::<TransactionRecord>(text)
                        .map(Some)
                        .map_err(|e| e.to_string())
                }
            });

        match (parsed, complete) {
            (Ok(record), true) => records.extend(record),
            (Ok(record), false) => {
                let tail = if record.is_some() {
                    Tail::MissingNewline
                } else {
                    Tail::Clean
                };
                records.extend(record);
                return Ok(Replay { records, tail });
            }
            (Err(message), true) => return Err(LedgerError::Corrupted { line, message }),
            (Err(_), false) => {
                return Ok(Replay {
                    records,
                    tail: Tail::Torn {
                        line,
                        offset: offset as u64,
                    },
                })
            }
        }
        offset += raw.len() + 1;
    }

    Ok(Replay {
        records,
        tail: Tail::Clean,
    })
}

/// The transaction ledger.
#[derive(Debug, Default)]
pub struct TransactionLedger {
    state: Mutex<LedgerState>,
    path: Option<PathBuf>,
}

impl TransactionLedger {
    /// A ledger that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open (or create) a JSON Lines ledger file and replay it.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        let read_err = |source| LedgerError::Read {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(read_err)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)
            .map_err(read_err)?;

        let bytes = std::fs::read(path).map_err(read_err)?;
        let replayed = replay(&bytes)?;
        match replayed.tail {
            Tail::Clean => {}
            Tail::MissingNewline => {
                file.write_all(b"\n")
                    .and_then(|()| file.sync_data())
                    .map_err(read_err)?;
            }
            Tail::Torn { line, offset } => {
                warn!(
                    path = %path.display(),
                    line,
                    dropped = bytes.len() as u64 - offset,
                    "truncating partial ledger record"
                );
                file.set_len(offset)
                    .and_then(|()| file.sync_data())
                    .map_err(read_err)?;
            }
        }

        let mut state = LedgerState::default();
        for record in replayed.records {
            state.push(record);
        }
        state.file = Some(file);

        Ok(Self {
            state: Mutex::new(state),
            path: Some(path.to_path_buf()),
        })
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append a record.
    ///
    /// If the record is not later than the previous record for the same
    /// root, its timestamp is moved to one microsecond after it. Returns
    /// the record as stored.
    pub fn record(&self, mut record: TransactionRecord) -> Result<TransactionRecord, LedgerError> {
        #[cfg(any(test, feature = "fault_injection"))]
        if super::engine_hooks::take_fail_ledger_write() {
            return Err(LedgerError::Write("simulated ledger failure".into()));
        }

        let mut state = self.state.lock();

        if let Some(previous) = state.latest_for(record.root) {
            if record.timestamp <= previous.timestamp {
                record.timestamp = previous.timestamp + Duration::microseconds(1);
            }
        }

        if let Some(file) = state.file.as_mut() {
            let mut line =
                serde_json::to_string(&record).map_err(|e| LedgerError::Write(e.to_string()))?;
            line.push('\n');
            file.write_all(line.as_bytes())
                .map_err(|e| LedgerError::Write(e.to_string()))?;
            file.sync_data()
                .map_err(|e| LedgerError::Write(e.to_string()))?;
        }

        state.push(record.clone());
        Ok(record)
    }

    /// Whether the latest record for `key.root` has `key.fingerprint`.
    pub fn has_applied(&self, key: &IdempotencyKey) -> bool {
        self.state
            .lock()
            .latest_for(key.root)
            .is_some_and(|r| r.fingerprint == key.fingerprint)
    }

    /// Latest record for a root.
    pub fn latest(&self, root: NodeId) -> Option<TransactionRecord> {
        self.state.lock().latest_for(root).cloned()
    }

    /// Every record for a root, oldest first.
    pub fn query(&self, root: NodeId) -> Vec<TransactionRecord> {
        let mut records: Vec<TransactionRecord> = self
            .state
            .lock()
            .records
            .iter()
            .filter(|r| r.root == root)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.timestamp);
        records
    }

    /// Every record, in append order.
    pub fn all(&self) -> Vec<TransactionRecord> {
        self.state.lock().records.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
