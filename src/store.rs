use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::StorageError;

/// On-disk shape of the seen-trade ledger: trade id → unix seconds when marked.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    trades: BTreeMap<String, i64>,
}

struct Ledger {
    seen: HashMap<String, i64>,
    /// Set when the in-memory ledger holds entries the last write failed to persist.
    dirty: bool,
}

/// Aggregate view of the ledger for status output.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreStats {
    pub total: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Durable deduplication ledger of trades already notified.
///
/// Every `mark_seen` is written through to disk. A failed write keeps the id
/// in memory and leaves the store dirty until `flush` succeeds.
pub struct TradeStore {
    path: PathBuf,
    inner: Mutex<Ledger>,
}

impl TradeStore {
    /// Load the ledger from `path`.
    ///
    /// A missing or unreadable file yields an empty ledger. Entries older than
    /// `retention_secs` (if given) are pruned.
    pub fn load(path: impl Into<PathBuf>, retention_secs: Option<i64>) -> Self {
        let path = path.into();
        let mut seen: HashMap<String, i64> = match read_ledger(&path) {
            Ok(Some(file)) => file.trades.into_iter().collect(),
            Ok(None) => {
                info!("No trade ledger at {}, starting empty", path.display());
                HashMap::new()
            }
            Err(e) => {
                warn!(
                    "Trade ledger {} is unreadable ({e}), starting empty",
                    path.display()
                );
                HashMap::new()
            }
        };

        let mut pruned = 0;
        if let Some(retention) = retention_secs {
            let cutoff = Utc::now().timestamp() - retention;
            let before = seen.len();
            seen.retain(|_, seen_at| *seen_at >= cutoff);
            pruned = before - seen.len();
        }
        info!(
            "Loaded {} seen trade(s) from {} ({pruned} pruned)",
            seen.len(),
            path.display()
        );

        Self {
            path,
            inner: Mutex::new(Ledger {
                seen,
                dirty: pruned > 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn has(&self, trade_id: &str) -> bool {
        self.lock().seen.contains_key(trade_id)
    }

    /// Record `trade_id` as notified and persist the ledger.
    ///
    /// Returns `Ok(false)` if it was already present. On a write failure the id
    /// remains marked in memory and the error is returned.
    pub fn mark_seen(&self, trade_id: &str) -> Result<bool, StorageError> {
        let mut ledger = self.lock();
        if ledger.seen.contains_key(trade_id) {
            return Ok(false);
        }
        ledger
            .seen
            .insert(trade_id.to_string(), Utc::now().timestamp());
        match write_ledger(&self.path, &ledger.seen) {
            Ok(()) => {
                ledger.dirty = false;
                Ok(true)
            }
            Err(e) => {
                ledger.dirty = true;
                Err(e)
            }
        }
    }

    /// Persist the ledger if a previous write failed (or pruning changed it).
    pub fn flush(&self) -> Result<(), StorageError> {
        let mut ledger = self.lock();
        if !ledger.dirty {
            return Ok(());
        }
        write_ledger(&self.path, &ledger.seen)?;
        ledger.dirty = false;
        Ok(())
    }

    /// Unconditionally write the ledger to disk; used on shutdown.
    pub fn persist(&self) -> Result<(), StorageError> {
        let mut ledger = self.lock();
        write_ledger(&self.path, &ledger.seen)?;
        ledger.dirty = false;
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    pub fn len(&self) -> usize {
        self.lock().seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every seen trade. Returns how many were removed.
    pub fn clear(&self) -> Result<usize, StorageError> {
        let mut ledger = self.lock();
        let removed = ledger.seen.len();
        ledger.seen.clear();
        match write_ledger(&self.path, &ledger.seen) {
            Ok(()) => {
                ledger.dirty = false;
                Ok(removed)
            }
            Err(e) => {
                ledger.dirty = true;
                Err(e)
            }
        }
    }

    pub fn stats(&self) -> StoreStats {
        let ledger = self.lock();
        let oldest = ledger.seen.values().min().copied();
        let newest = ledger.seen.values().max().copied();
        StoreStats {
            total: ledger.seen.len(),
            oldest: oldest.and_then(|ts| DateTime::from_timestamp(ts, 0)),
            newest: newest.and_then(|ts| DateTime::from_timestamp(ts, 0)),
        }
    }
}

fn read_ledger(path: &Path) -> anyhow::Result<Option<LedgerFile>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&contents)?))
}

fn write_ledger(path: &Path, seen: &HashMap<String, i64>) -> Result<(), StorageError> {
    let file = LedgerFile {
        trades: seen.iter().map(|(k, v)| (k.clone(), *v)).collect(),
    };
    write_json_atomic(path, &file)
}

/// Serialize `value` as pretty JSON to `<path>.tmp`, fsync it, rename over
/// `path`, then fsync the parent directory so the rename itself is durable.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let contents = serde_json::to_string_pretty(value)?;
    let io_err = |source: std::io::Error| StorageError::Write {
        path: path.display().to_string(),
        source,
    };

    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(parent) = parent {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = File::create(&tmp).map_err(io_err)?;
    file.write_all(contents.as_bytes()).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);
    fs::rename(&tmp, path).map_err(io_err)?;
    sync_dir(parent.unwrap_or(Path::new("."))).map_err(io_err)?;
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

// Directories cannot be opened for syncing here; the rename is as durable as
// the platform makes it.
#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
