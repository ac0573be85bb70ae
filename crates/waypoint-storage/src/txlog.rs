//! Durable transaction log.
//!
//! One JSON document per transaction, keyed by `tx_id`. Appends are
//! idempotent on the key: the first write fixes `tx_id` and
//! `started_at`, later writes are last-write-wins on everything else,
//! and the state field may only move forward along the transaction
//! state machine. A write that would move a terminal record is rejected.
//!
//! [`FileTransactionLog`] persists each append with a temp-file write,
//! fsync, and atomic rename before returning, so the coordinator can
//! only advance the protocol past a transition that is already on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};

use waypoint_core::transaction::{TransactionRecord, TxState};

/// Errors from transaction log operations.
#[derive(Debug, thiserror::Error)]
pub enum TxLogError {
    /// Underlying file I/O failed.
    #[error("log I/O error: {0}")]
    Io(String),

    /// A record could not be encoded or decoded.
    #[error("log serialization error: {0}")]
    Serialization(String),

    /// The append would move a record backwards or out of a terminal
    /// state.
    #[error("illegal state transition for {tx_id}: {from} -> {to}")]
    IllegalTransition {
        /// Transaction id.
        tx_id: String,
        /// State on record.
        from: TxState,
        /// Requested state.
        to: TxState,
    },
}

impl From<std::io::Error> for TxLogError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for TxLogError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Append-only store of transaction records.
#[async_trait]
pub trait TransactionLog: Send + Sync {
    /// Writes a record durably. Idempotent on `tx_id`; monotone on
    /// state. Must not return before the write is persisted.
    async fn append(&self, record: &TransactionRecord) -> Result<(), TxLogError>;

    /// Fetches one record.
    async fn get(&self, tx_id: &str) -> Result<Option<TransactionRecord>, TxLogError>;

    /// All records not in a terminal state, oldest first. The recovery
    /// scan.
    async fn scan_active(&self) -> Result<Vec<TransactionRecord>, TxLogError>;

    /// Most recent records first, up to `limit`.
    async fn recent(&self, limit: usize) -> Result<Vec<TransactionRecord>, TxLogError>;
}

/// Validates and merges an append against the existing record.
///
/// Returns the record to persist: `started_at` (and `tx_id`) come from
/// the first write, everything else from the incoming record.
fn merge_append(
    existing: Option<&TransactionRecord>,
    incoming: &TransactionRecord,
) -> Result<TransactionRecord, TxLogError> {
    match existing {
        None => Ok(incoming.clone()),
        Some(prior) => {
            if !prior.state.can_transition_to(incoming.state) {
                return Err(TxLogError::IllegalTransition {
                    tx_id: incoming.tx_id.clone(),
                    from: prior.state,
                    to: incoming.state,
                });
            }
            let mut merged = incoming.clone();
            merged.started_at = prior.started_at;
            Ok(merged)
        }
    }
}

/// Sorts records oldest-first by `started_at`, tie-broken by `tx_id`.
fn sort_records(records: &mut [TransactionRecord]) {
    records.sort_by(|a, b| {
        a.started_at
            .cmp(&b.started_at)
            .then_with(|| a.tx_id.cmp(&b.tx_id))
    });
}

// ── File-backed log ──

/// Durable [`TransactionLog`] holding one `<tx_id>.json` per record.
///
/// An in-memory index mirrors the directory; it is rebuilt on open, so
/// the log survives a coordinator crash and restart.
pub struct FileTransactionLog {
    dir: PathBuf,
    index: Arc<RwLock<HashMap<String, TransactionRecord>>>,
}

impl FileTransactionLog {
    /// Opens (or creates) a log directory and loads every record.
    ///
    /// Unparseable files are skipped with a warning rather than
    /// poisoning recovery — the same record will fail loudly if its
    /// transaction is ever touched again.
    ///
    /// # Errors
    ///
    /// Returns [`TxLogError::Io`] when the directory cannot be created
    /// or listed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, TxLogError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut index = HashMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_record(&path) {
                Ok(record) => {
                    index.insert(record.tx_id.clone(), record);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable log record");
                }
            }
        }
        debug!(dir = %dir.display(), records = index.len(), "transaction log opened");

        Ok(Self {
            dir,
            index: Arc::new(RwLock::new(index)),
        })
    }

    fn read_record(path: &Path) -> Result<TransactionRecord, TxLogError> {
        let raw = std::fs::read(path)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    fn record_path(&self, tx_id: &str) -> PathBuf {
        self.dir.join(format!("{tx_id}.json"))
    }

    /// Temp-file write + fsync + atomic rename.
    fn persist(path: &Path, record: &TransactionRecord) -> Result<(), TxLogError> {
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(record)?;
        {
            use std::io::Write;
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[async_trait]
impl TransactionLog for FileTransactionLog {
    async fn append(&self, record: &TransactionRecord) -> Result<(), TxLogError> {
        let merged = {
            let index = self.index.read();
            merge_append(index.get(&record.tx_id), record)?
        };

        let path = self.record_path(&merged.tx_id);
        let to_write = merged.clone();
        tokio::task::spawn_blocking(move || Self::persist(&path, &to_write))
            .await
            .map_err(|e| TxLogError::Io(format!("persist task failed: {e}")))??;

        // Re-check under the write lock: a concurrent append for the
        // same transaction may have advanced the record while we were
        // writing. The per-transaction single-writer discipline in the
        // coordinator makes this a recovery-only concern.
        let mut index = self.index.write();
        let merged = merge_append(index.get(&merged.tx_id), &merged)?;
        index.insert(merged.tx_id.clone(), merged);
        Ok(())
    }

    async fn get(&self, tx_id: &str) -> Result<Option<TransactionRecord>, TxLogError> {
        Ok(self.index.read().get(tx_id).cloned())
    }

    async fn scan_active(&self) -> Result<Vec<TransactionRecord>, TxLogError> {
        let mut records: Vec<TransactionRecord> = self
            .index
            .read()
            .values()
            .filter(|r| !r.state.is_terminal())
            .cloned()
            .collect();
        sort_records(&mut records);
        Ok(records)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<TransactionRecord>, TxLogError> {
        let mut records: Vec<TransactionRecord> = self.index.read().values().cloned().collect();
        sort_records(&mut records);
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }
}

// ── In-memory log ──

/// Ephemeral [`TransactionLog`] for tests and simulations.
#[derive(Default)]
pub struct MemoryTransactionLog {
    index: RwLock<HashMap<String, TransactionRecord>>,
}

impl MemoryTransactionLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionLog for MemoryTransactionLog {
    async fn append(&self, record: &TransactionRecord) -> Result<(), TxLogError> {
        let mut index = self.index.write();
        let merged = merge_append(index.get(&record.tx_id), record)?;
        index.insert(merged.tx_id.clone(), merged);
        Ok(())
    }

    async fn get(&self, tx_id: &str) -> Result<Option<TransactionRecord>, TxLogError> {
        Ok(self.index.read().get(tx_id).cloned())
    }

    async fn scan_active(&self) -> Result<Vec<TransactionRecord>, TxLogError> {
        let mut records: Vec<TransactionRecord> = self
            .index
            .read()
            .values()
            .filter(|r| !r.state.is_terminal())
            .cloned()
            .collect();
        sort_records(&mut records);
        Ok(records)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<TransactionRecord>, TxLogError> {
        let mut records: Vec<TransactionRecord> = self.index.read().values().cloned().collect();
        sort_records(&mut records);
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }
}
