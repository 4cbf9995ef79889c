//! Version ledger — content-addressed tracking of which resource version
//! was distributed under which root.
//!
//! The [`Ledger`] trait is the boundary the controllers write through to.
//! Two implementations ship here:
//! - [`DisabledLedger`] — accepts everything, tracks nothing.
//! - [`MemoryLedger`] — keeps the current key → version map, an order
//!   independent SHA-256 root over it, and a bounded append-only log so
//!   earlier roots can still be queried.
//!
//! A ledger snapshot persists as a `LedgerFile` JSON document at
//! `<home>/.meshsync/ledger.json`, written with the `.tmp` + rename pattern.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use meshsync_core::{ConfigRecord, RecordKey};

use crate::error::{io_err, EngineError};

/// Errors reported by a ledger implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("unknown or expired ledger root {0}")]
    UnknownRoot(String),

    #[error("key {key} not present at root {root}")]
    KeyNotFound { root: String, key: String },
}

/// Append-only version index consumed by the controllers.
pub trait Ledger: Send + Sync {
    /// Record `version` for `key`; returns the new root.
    fn put(&self, key: &str, version: &str) -> Result<String, LedgerError>;

    fn delete(&self, key: &str) -> Result<(), LedgerError>;

    /// Version of `key` as of an earlier `root`.
    fn get_previous_value(&self, root: &str, key: &str) -> Result<String, LedgerError>;

    fn root_hash(&self) -> String;
}

// ---------------------------------------------------------------------------
// DisabledLedger
// ---------------------------------------------------------------------------

/// No-op ledger used when distribution tracking is turned off.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledLedger;

impl Ledger for DisabledLedger {
    fn put(&self, _key: &str, _version: &str) -> Result<String, LedgerError> {
        Ok(String::new())
    }

    fn delete(&self, _key: &str) -> Result<(), LedgerError> {
        Ok(())
    }

    fn get_previous_value(&self, _root: &str, _key: &str) -> Result<String, LedgerError> {
        Ok(String::new())
    }

    fn root_hash(&self) -> String {
        String::new()
    }
}

// ---------------------------------------------------------------------------
// MemoryLedger
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct LogEntry {
    seq: u64,
    key: String,
    /// `None` records a deletion.
    value: Option<String>,
}

#[derive(Debug)]
struct LedgerState {
    entries: HashMap<String, String>,
    /// XOR of `sha256(key \0 version)` over all entries.
    acc: [u8; 32],
    /// State as of `base_seq`; older log entries have been folded into it.
    base: HashMap<String, String>,
    base_seq: u64,
    log: VecDeque<LogEntry>,
    next_seq: u64,
    /// Root → most recent sequence number that produced it.
    roots: HashMap<String, u64>,
    history_limit: usize,
}

impl LedgerState {
    fn new(history_limit: usize) -> Self {
        let mut state = Self {
            entries: HashMap::new(),
            acc: [0u8; 32],
            base: HashMap::new(),
            base_seq: 0,
            log: VecDeque::new(),
            next_seq: 1,
            roots: HashMap::new(),
            history_limit: history_limit.max(1),
        };
        state.roots.insert(state.root(), 0);
        state
    }

    fn root(&self) -> String {
        hex::encode(self.acc)
    }

    fn toggle(&mut self, key: &str, version: &str) {
        let digest = entry_digest(key, version);
        for (a, d) in self.acc.iter_mut().zip(digest.iter()) {
            *a ^= d;
        }
    }

    fn record(&mut self, key: &str, value: Option<String>) -> String {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.log.push_back(LogEntry {
            seq,
            key: key.to_string(),
            value,
        });
        let root = self.root();
        self.roots.insert(root.clone(), seq);
        self.trim();
        root
    }

    fn trim(&mut self) {
        while self.log.len() > self.history_limit {
            let Some(oldest) = self.log.pop_front() else {
                break;
            };
            match oldest.value {
                Some(version) => {
                    self.base.insert(oldest.key, version);
                }
                None => {
                    self.base.remove(&oldest.key);
                }
            }
            self.base_seq = oldest.seq;
        }
        let floor = self.base_seq;
        self.roots.retain(|_, seq| *seq >= floor);
    }

    fn lookup(&self, root: &str, key: &str) -> Result<String, LedgerError> {
        let target = *self
            .roots
            .get(root)
            .ok_or_else(|| LedgerError::UnknownRoot(root.to_string()))?;
        let not_found = || LedgerError::KeyNotFound {
            root: root.to_string(),
            key: key.to_string(),
        };
        let hit = self
            .log
            .iter()
            .rev()
            .filter(|entry| entry.seq <= target)
            .find(|entry| entry.key == key);
        match hit {
            Some(entry) => entry.value.clone().ok_or_else(not_found),
            None => self.base.get(key).cloned().ok_or_else(not_found),
        }
    }
}

fn entry_digest(key: &str, version: &str) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(key.as_bytes());
    h.update([0u8]);
    h.update(version.as_bytes());
    h.finalize().into()
}

/// In-memory content-addressed ledger.
///
/// The root depends only on the current key → version set, so two ledgers
/// holding the same versions report the same root.
#[derive(Debug)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    /// `history_limit` bounds the number of mutations kept queryable through
    /// [`Ledger::get_previous_value`].
    pub fn new(history_limit: usize) -> Self {
        Self {
            state: Mutex::new(LedgerState::new(history_limit)),
        }
    }

    /// Rebuild a ledger from a persisted snapshot. History starts empty.
    pub fn restore(file: &LedgerFile, history_limit: usize) -> Self {
        let mut state = LedgerState::new(history_limit);
        for (key, version) in &file.entries {
            state.toggle(key, version);
            state.entries.insert(key.clone(), version.clone());
        }
        state.base = state.entries.clone();
        state.roots.clear();
        let root = state.root();
        state.roots.insert(root, 0);
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current state in persistable form.
    pub fn snapshot(&self) -> LedgerFile {
        let state = self.state.lock();
        LedgerFile {
            updated_at: Utc::now(),
            root: state.root(),
            entries: state
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new(meshsync_core::config::DEFAULT_LEDGER_HISTORY)
    }
}

impl Ledger for MemoryLedger {
    fn put(&self, key: &str, version: &str) -> Result<String, LedgerError> {
        let mut state = self.state.lock();
        if let Some(previous) = state.entries.get(key).cloned() {
            if previous == version {
                return Ok(state.root());
            }
            state.toggle(key, &previous);
        }
        state.toggle(key, version);
        state.entries.insert(key.to_string(), version.to_string());
        Ok(state.record(key, Some(version.to_string())))
    }

    fn delete(&self, key: &str) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        let Some(previous) = state.entries.remove(key) else {
            return Ok(());
        };
        state.toggle(key, &previous);
        state.record(key, None);
        Ok(())
    }

    fn get_previous_value(&self, root: &str, key: &str) -> Result<String, LedgerError> {
        self.state.lock().lookup(root, key)
    }

    fn root_hash(&self) -> String {
        self.state.lock().root()
    }
}

/// Best-effort write-through after a store mutation: deletions first, then
/// the surviving upserts. Failures are logged and never abort the batch.
pub(crate) fn write_through(
    ledger: &dyn Ledger,
    removed: &[RecordKey],
    upserted: &[Arc<ConfigRecord>],
) {
    for key in removed {
        let key = key.to_string();
        if let Err(e) = ledger.delete(&key) {
            tracing::warn!(key = %key, error = %e, "ledger delete failed");
        }
    }
    for record in upserted {
        let key = record.key().to_string();
        if let Err(e) = ledger.put(&key, &record.resource_version) {
            tracing::warn!(key = %key, error = %e, "ledger put failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// On-disk ledger snapshot payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerFile {
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub root: String,
    pub entries: BTreeMap<String, String>,
}

/// `<home>/.meshsync/ledger.json`
pub fn store_path_at(home: &Path) -> PathBuf {
    home.join(".meshsync").join("ledger.json")
}

/// Load the persisted snapshot. Returns an empty snapshot if the file does
/// not yet exist.
pub fn load_at(home: &Path) -> Result<LedgerFile, EngineError> {
    let path = store_path_at(home);
    if !path.exists() {
        return Ok(LedgerFile {
            updated_at: Utc::now(),
            root: String::new(),
            entries: BTreeMap::new(),
        });
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(serde_json::from_str(&contents)?)
}

/// Save the snapshot atomically: `<path>.tmp` then rename to `<path>`.
pub fn save_at(home: &Path, file: &LedgerFile) -> Result<(), EngineError> {
    let path = store_path_at(home);
    let Some(dir) = path.parent() else {
        return Err(io_err(path, std::io::Error::other("invalid ledger path")));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let json = serde_json::to_string_pretty(file)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}
