//! Key-value stores backing the chain
//!
//! The engine only needs point reads, prefix scans and an atomic batch write.
//! `SledStore` is the durable backend; `MemoryStore` keeps everything in a
//! shared map and can be reopened from a clone, which is how tests simulate
//! process restarts.

use crate::error::StoreError;
use parking_lot::RwLock;
use std::{collections::BTreeMap, path::Path, sync::Arc};

/// A single staged mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Mutations applied to a store in one atomic step
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put(key.into(), value.into()));
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete(key.into()));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Durable key-value store the emulator persists into
///
/// `write_batch` must be all-or-nothing: after a failure no operation of the
/// batch may be visible, neither now nor after a restart.
pub trait KeyValueStore: Send + Sync {
    /// Point lookup
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// All entries whose key starts with `prefix`, in ascending key order
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;

    /// Greatest entry with `prefix <= key <= upper` that starts with `prefix`
    fn floor(&self, prefix: &[u8], upper: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>, StoreError> {
        Ok(self
            .scan_prefix(prefix)?
            .into_iter()
            .take_while(|(key, _)| key.as_slice() <= upper)
            .last())
    }

    /// Apply every operation of `batch` atomically
    fn write_batch(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Flush buffered writes to durable media
    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// In-memory store
///
/// Clones share the same map, so dropping an emulator and opening a new one
/// on a clone behaves like a restart against the same database.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let entries = self.entries.read();
        Ok(entries
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn floor(&self, prefix: &[u8], upper: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>, StoreError> {
        if upper < prefix {
            return Ok(None);
        }
        let entries = self.entries.read();
        Ok(entries
            .range(prefix.to_vec()..=upper.to_vec())
            .next_back()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone())))
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<(), StoreError> {
        // One write lock for the whole batch: readers see all of it or none.
        let mut entries = self.entries.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put(key, value) => {
                    entries.insert(key, value);
                }
                BatchOp::Delete(key) => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}

/// Durable store on top of the sled embedded database
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(&path)?;

        tracing::info!("Opened sled store at {:?}", path.as_ref());

        Ok(Self { db })
    }

    /// Temporary store that is deleted on drop
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }
}

impl KeyValueStore for SledStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.db.get(key)?.map(|value| value.to_vec()))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut entries = Vec::new();
        for result in self.db.scan_prefix(prefix) {
            let (key, value) = result?;
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }

    fn floor(&self, prefix: &[u8], upper: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>, StoreError> {
        if upper < prefix {
            return Ok(None);
        }
        match self.db.range(prefix.to_vec()..=upper.to_vec()).next_back() {
            Some(result) => {
                let (key, value) = result?;
                if key.starts_with(prefix) {
                    Ok(Some((key.to_vec(), value.to_vec())))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut sled_batch = sled::Batch::default();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put(key, value) => sled_batch.insert(key, value),
                BatchOp::Delete(key) => sled_batch.remove(key),
            }
        }
        self.db.apply_batch(sled_batch)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}
