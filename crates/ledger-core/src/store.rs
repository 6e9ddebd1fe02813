//! The key-value contract the chain is persisted through, plus an in-memory backend.
//! Backends live in `ledger-storage`; the trait lives here to avoid a circular dependency.

use crate::Result;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Precondition for a batch: `key` must currently hold `expected` (`None` = absent).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Guard {
    pub key: Vec<u8>,
    pub expected: Option<Vec<u8>>,
}

/// Writes applied all-or-nothing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteBatch {
    pub guard: Option<Guard>,
    pub sets: Vec<(Vec<u8>, Vec<u8>)>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guarded(key: &[u8], expected: Option<&[u8]>) -> Self {
        Self {
            guard: Some(Guard {
                key: key.to_vec(),
                expected: expected.map(<[u8]>::to_vec),
            }),
            sets: Vec::new(),
        }
    }

    pub fn set(mut self, key: &[u8], value: &[u8]) -> Self {
        self.sets.push((key.to_vec(), value.to_vec()));
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Commit {
    Applied,
    /// The guard did not hold; nothing was written.
    GuardFailed { found: Option<Vec<u8>> },
}

/// Point lookup, point write and an atomic guarded multi-write. Implementations
/// must never expose half of a batch to readers.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;
    fn update(&self, batch: &WriteBatch) -> Result<Commit>;
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Volatile store, handy for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.entries.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn update(&self, batch: &WriteBatch) -> Result<Commit> {
        let mut entries = self.entries.write();
        if let Some(guard) = &batch.guard {
            let current = entries.get(&guard.key);
            if current != guard.expected.as_ref() {
                return Ok(Commit::GuardFailed {
                    found: current.cloned(),
                });
            }
        }
        for (key, value) in &batch.sets {
            entries.insert(key.clone(), value.clone());
        }
        Ok(Commit::Applied)
    }
}
