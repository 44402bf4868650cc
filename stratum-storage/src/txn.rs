//! Transaction scope and statistics.
//!
//! A [`TxnScope`] is only ever handed to a closure by
//! `TransactionalStore::transaction`, which owns the surrounding lease. The
//! scope cannot escape the closure, is not `Clone`, and is committed or
//! aborted exactly once when the closure returns.

use std::time::{Duration, Instant};

use heed::types::{Bytes, Str};
use heed::{Database, RoTxn, RwTxn};
use parking_lot::Mutex;
use stratum_core::StorageError;

/// LMDB rejects keys longer than this.
pub const MAX_KEY_LEN: usize = 511;

pub(crate) type RawDatabase = Database<Str, Bytes>;

pub(crate) fn txn_error(e: heed::Error) -> StorageError {
    StorageError::TransactionFailed {
        reason: e.to_string(),
    }
}

pub(crate) fn check_key(key: &str) -> Result<(), StorageError> {
    if key.len() > MAX_KEY_LEN {
        return Err(StorageError::InvalidKey {
            key: key.chars().take(64).collect(),
            reason: format!("key is {} bytes, limit is {MAX_KEY_LEN}", key.len()),
        });
    }
    Ok(())
}

enum ScopeTxn<'e> {
    Read(RoTxn<'e>),
    Write(RwTxn<'e>),
}

/// An open transaction against one named sub-database.
pub struct TxnScope<'e> {
    txn: ScopeTxn<'e>,
    /// `None` when a read transaction targets a sub-database that was never created.
    db: Option<RawDatabase>,
    db_name: String,
}

impl<'e> TxnScope<'e> {
    pub(crate) fn read(txn: RoTxn<'e>, db: Option<RawDatabase>, db_name: &str) -> Self {
        Self {
            txn: ScopeTxn::Read(txn),
            db,
            db_name: db_name.to_string(),
        }
    }

    pub(crate) fn write(txn: RwTxn<'e>, db: RawDatabase, db_name: &str) -> Self {
        Self {
            txn: ScopeTxn::Write(txn),
            db: Some(db),
            db_name: db_name.to_string(),
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self.txn, ScopeTxn::Write(_))
    }

    /// Name of the sub-database this scope operates on.
    pub fn database(&self) -> &str {
        &self.db_name
    }

    fn ro(&self) -> &RoTxn<'e> {
        match &self.txn {
            ScopeTxn::Read(txn) => txn,
            ScopeTxn::Write(txn) => &**txn,
        }
    }

    fn rw(&mut self, operation: &str) -> Result<(&mut RwTxn<'e>, RawDatabase), StorageError> {
        match (&mut self.txn, self.db) {
            (ScopeTxn::Write(txn), Some(db)) => Ok((txn, db)),
            _ => Err(StorageError::ReadOnly {
                operation: format!("{operation} inside a read transaction"),
            }),
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        check_key(key)?;
        let Some(db) = self.db else {
            return Ok(None);
        };
        let value = db.get(self.ro(), key).map_err(txn_error)?;
        Ok(value.map(<[u8]>::to_vec))
    }

    pub fn contains(&self, key: &str) -> Result<bool, StorageError> {
        check_key(key)?;
        let Some(db) = self.db else {
            return Ok(false);
        };
        Ok(db.get(self.ro(), key).map_err(txn_error)?.is_some())
    }

    pub fn put(&mut self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        check_key(key)?;
        let (txn, db) = self.rw("put")?;
        db.put(txn, key, value).map_err(txn_error)
    }

    /// Returns whether the key existed.
    pub fn delete(&mut self, key: &str) -> Result<bool, StorageError> {
        check_key(key)?;
        let (txn, db) = self.rw("delete")?;
        db.delete(txn, key).map_err(txn_error)
    }

    /// Key/value pairs whose key starts with `prefix`, in key order.
    pub fn scan_prefix(
        &self,
        prefix: &str,
        limit: Option<usize>,
    ) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let Some(db) = self.db else {
            return Ok(Vec::new());
        };
        let iter = db.prefix_iter(self.ro(), prefix).map_err(txn_error)?;
        let mut out = Vec::new();
        for item in iter.take(limit.unwrap_or(usize::MAX)) {
            let (key, value) = item.map_err(txn_error)?;
            out.push((key.to_string(), value.to_vec()));
        }
        Ok(out)
    }

    /// Keys starting with `prefix`, in key order.
    pub fn keys_with_prefix(
        &self,
        prefix: &str,
        limit: Option<usize>,
    ) -> Result<Vec<String>, StorageError> {
        let Some(db) = self.db else {
            return Ok(Vec::new());
        };
        let iter = db.prefix_iter(self.ro(), prefix).map_err(txn_error)?;
        let mut out = Vec::new();
        for item in iter.take(limit.unwrap_or(usize::MAX)) {
            let (key, _) = item.map_err(txn_error)?;
            out.push(key.to_string());
        }
        Ok(out)
    }

    pub fn count_prefix(&self, prefix: &str) -> Result<u64, StorageError> {
        let Some(db) = self.db else {
            return Ok(0);
        };
        let mut count = 0u64;
        for item in db.prefix_iter(self.ro(), prefix).map_err(txn_error)? {
            item.map_err(txn_error)?;
            count += 1;
        }
        Ok(count)
    }

    /// Delete every key starting with `prefix`. Returns the number removed.
    pub fn delete_prefix(&mut self, prefix: &str) -> Result<u64, StorageError> {
        let keys = self.keys_with_prefix(prefix, None)?;
        let (txn, db) = self.rw("delete_prefix")?;
        let mut deleted = 0u64;
        for key in &keys {
            if db.delete(txn, key).map_err(txn_error)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    pub(crate) fn commit(self) -> Result<(), StorageError> {
        match self.txn {
            ScopeTxn::Read(txn) => txn.commit().map_err(txn_error),
            ScopeTxn::Write(txn) => txn.commit().map_err(txn_error),
        }
    }

    pub(crate) fn abort(self) {
        match self.txn {
            ScopeTxn::Read(txn) => drop(txn),
            ScopeTxn::Write(txn) => txn.abort(),
        }
    }
}

/// Running transaction statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionStats {
    pub total: u64,
    pub active: u64,
    pub committed: u64,
    pub aborted: u64,
    /// Mean duration of completed transactions.
    pub avg_duration: Duration,
}

impl TransactionStats {
    fn record(&mut self, elapsed: Duration, committed: bool) {
        self.active = self.active.saturating_sub(1);
        if committed {
            self.committed += 1;
        } else {
            self.aborted += 1;
        }
        let completed = (self.committed + self.aborted) as u32;
        // Cumulative moving average; integer Duration math keeps nanosecond precision.
        if completed <= 1 {
            self.avg_duration = elapsed;
        } else if elapsed >= self.avg_duration {
            self.avg_duration += (elapsed - self.avg_duration) / completed;
        } else {
            self.avg_duration -= (self.avg_duration - elapsed) / completed;
        }
    }
}

/// Records one transaction in the stats. Counts as aborted unless
/// [`TxnTimer::finish`] is reached, so a panicking closure is still accounted.
pub(crate) struct TxnTimer<'s> {
    stats: &'s Mutex<TransactionStats>,
    started: Instant,
    finished: bool,
}

impl<'s> TxnTimer<'s> {
    pub(crate) fn start(stats: &'s Mutex<TransactionStats>) -> Self {
        {
            let mut stats = stats.lock();
            stats.total += 1;
            stats.active += 1;
        }
        Self {
            stats,
            started: Instant::now(),
            finished: false,
        }
    }

    pub(crate) fn finish(mut self, committed: bool) {
        self.finished = true;
        self.stats.lock().record(self.started.elapsed(), committed);
    }
}

impl Drop for TxnTimer<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.stats.lock().record(self.started.elapsed(), false);
        }
    }
}
