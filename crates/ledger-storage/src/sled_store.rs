use ledger_core::{
    store::{Commit, KvStore, WriteBatch},
    LedgerError, Result,
};
use sled::{
    transaction::{abort, TransactionError, TransactionResult},
    Db, Tree,
};
use std::path::Path;
use tracing::{debug, info};

const TREE_CHAIN: &str = "chain";

/// `KvStore` over a sled tree. Block hashes and the tip key share one keyspace,
/// so a guarded batch is a single-tree sled transaction.
#[derive(Clone)]
pub struct SledStore {
    db: Db,
    chain: Tree,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path).map_err(LedgerError::storage)?;
        let store = Self::from_db(db)?;
        info!(path = %path.display(), "sled store opened");
        Ok(store)
    }

    /// In-memory sled instance removed on drop.
    pub fn open_temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(LedgerError::storage)?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self> {
        let chain = db.open_tree(TREE_CHAIN).map_err(LedgerError::storage)?;
        Ok(Self { db, chain })
    }

    pub fn tree_name() -> &'static str {
        TREE_CHAIN
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    pub fn clear(&self) -> Result<()> {
        self.chain.clear().map_err(LedgerError::storage)?;
        self.flush()
    }
}

impl KvStore for SledStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .chain
            .get(key)
            .map_err(LedgerError::storage)?
            .map(|v| v.to_vec()))
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.chain.insert(key, value).map_err(LedgerError::storage)?;
        Ok(())
    }

    fn update(&self, batch: &WriteBatch) -> Result<Commit> {
        let outcome: TransactionResult<(), Option<Vec<u8>>> = self.chain.transaction(|tx| {
            if let Some(guard) = &batch.guard {
                let current = tx.get(&guard.key)?;
                if current.as_deref() != guard.expected.as_deref() {
                    return abort(current.map(|v| v.to_vec()));
                }
            }
            for (key, value) in &batch.sets {
                tx.insert(key.as_slice(), value.as_slice())?;
            }
            Ok(())
        });

        match outcome {
            Ok(()) => Ok(Commit::Applied),
            Err(TransactionError::Abort(found)) => {
                debug!("guarded batch rejected");
                Ok(Commit::GuardFailed { found })
            }
            Err(TransactionError::Storage(e)) => Err(LedgerError::storage(e)),
        }
    }

    fn flush(&self) -> Result<()> {
        self.db.flush().map_err(LedgerError::storage)?;
        Ok(())
    }
}
