//! The persistent chain: blocks stored under their own hash plus a single tip
//! pointer under [`TIP_KEY`]. Appends are read-tip → mine → guarded write.
//! The difficulty is fixed at genesis and recorded under [`DIFFICULTY_KEY`].

use crate::{
    config::ChainConfig,
    constants::{DIFFICULTY_KEY, TIP_KEY},
    error::DecodeError,
    pow::{MineOptions, ProofOfWork},
    store::{Commit, KvStore, WriteBatch},
    Block, Hash, LedgerError, Result, Transaction,
};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A mined block together with the tip it was mined against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingBlock {
    pub block: Block,
    pub parent: Hash,
}

/// Chain façade over a [`KvStore`]. One writer at a time per instance; instances
/// sharing a store are kept honest by the guarded tip write.
pub struct Chain<S: KvStore> {
    store: Arc<S>,
    pow: ProofOfWork,
    parallel: bool,
    tip: RwLock<Hash>,
    writer: Mutex<()>,
}

impl<S: KvStore> Chain<S> {
    /// Open the chain, writing a genesis block if the store has no tip yet.
    /// An existing chain must be opened with the difficulty it was created at.
    pub fn init(store: Arc<S>, config: &ChainConfig) -> Result<Self> {
        let pow = config.proof_of_work()?;
        let tip = match read_tip(store.as_ref())? {
            Some(tip) => {
                debug!(tip = %hex::encode(tip), "loaded existing chain");
                tip
            }
            None => create_genesis(store.as_ref(), &pow, config)?,
        };
        if let Some(recorded) = stored_difficulty(store.as_ref())? {
            if recorded != pow.difficulty() {
                return Err(LedgerError::Config(format!(
                    "chain was mined at difficulty {recorded}, configured {}",
                    pow.difficulty()
                )));
            }
        }
        Ok(Self {
            store,
            pow,
            parallel: config.parallel_mining,
            tip: RwLock::new(tip),
            writer: Mutex::new(()),
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn proof_of_work(&self) -> &ProofOfWork {
        &self.pow
    }

    /// Tip as last seen by this instance.
    pub fn tip(&self) -> Hash {
        *self.tip.read()
    }

    /// Tip as currently recorded in the store.
    pub fn stored_tip(&self) -> Result<Hash> {
        read_tip(self.store.as_ref())?.ok_or_else(|| LedgerError::NotFound("chain tip".into()))
    }

    /// Reload the tip from the store, picking up appends made by other instances.
    pub fn refresh_tip(&self) -> Result<Hash> {
        let tip = self.stored_tip()?;
        *self.tip.write() = tip;
        Ok(tip)
    }

    pub fn mine_options(&self) -> MineOptions {
        MineOptions {
            parallel: self.parallel,
            ..MineOptions::default()
        }
    }

    pub fn add_block(&self, txs: Vec<Transaction>) -> Result<Block> {
        self.add_block_with(txs, &self.mine_options())
    }

    /// Read tip, mine and commit under the writer lock.
    pub fn add_block_with(&self, txs: Vec<Transaction>, opts: &MineOptions) -> Result<Block> {
        let _writer = self.writer.lock();
        let pending = self.prepare_block(txs, opts)?;
        self.commit_locked(pending)
    }

    /// Like [`Chain::add_block`], re-running the whole sequence when another writer
    /// moved the tip underneath us.
    pub fn add_block_with_retry(&self, txs: Vec<Transaction>, attempts: usize) -> Result<Block> {
        let mut attempt = 1;
        loop {
            match self.add_block(txs.clone()) {
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(attempt, error = %e, "retrying append");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// First half of an append: mine on top of the stored tip without writing.
    pub fn prepare_block(&self, txs: Vec<Transaction>, opts: &MineOptions) -> Result<PendingBlock> {
        let parent = self.stored_tip()?;
        debug!(parent = %hex::encode(parent), txs = txs.len(), "mining on tip");
        let block = Block::mine(txs, Some(parent), &self.pow, opts)?;
        Ok(PendingBlock { block, parent })
    }

    /// Second half of an append: store the block and advance the tip in one
    /// atomic write, provided the tip is still the one the block was mined on.
    pub fn commit(&self, pending: PendingBlock) -> Result<Block> {
        let _writer = self.writer.lock();
        self.commit_locked(pending)
    }

    fn commit_locked(&self, pending: PendingBlock) -> Result<Block> {
        let PendingBlock { block, parent } = pending;
        let bytes = block.serialize()?;
        let batch = WriteBatch::guarded(TIP_KEY, Some(parent.as_slice()))
            .set(&block.hash, &bytes)
            .set(TIP_KEY, &block.hash);

        match self.store.update(&batch)? {
            Commit::Applied => {
                // The batch has landed; from here on the append counts as done.
                *self.tip.write() = block.hash;
                info!(
                    hash = %hex::encode(block.hash),
                    parent = %hex::encode(parent),
                    nonce = block.nonce,
                    "block appended"
                );
                flush_after_commit(self.store.as_ref());
                Ok(block)
            }
            Commit::GuardFailed { found } => {
                let found = found.map(hex::encode).unwrap_or_else(|| "<none>".into());
                warn!(expected = %hex::encode(parent), %found, "tip moved during append");
                Err(LedgerError::ConcurrentTipConflict {
                    expected: hex::encode(parent),
                    found,
                })
            }
        }
    }

    pub fn get_block(&self, hash: &Hash) -> Result<Block> {
        let bytes = self
            .store
            .get(hash)?
            .ok_or_else(|| LedgerError::NotFound(format!("block {}", hex::encode(hash))))?;
        Ok(Block::deserialize(&bytes)?)
    }

    /// Walk from the stored tip back to genesis. The tip is read on the first step.
    pub fn iter(&self) -> ChainIter<'_, S> {
        ChainIter {
            store: self.store.as_ref(),
            cursor: Cursor::StoredTip,
            child: None,
        }
    }

    pub fn iter_from(&self, start: Hash) -> ChainIter<'_, S> {
        ChainIter {
            store: self.store.as_ref(),
            cursor: Cursor::At(start),
            child: None,
        }
    }

    /// Number of blocks from tip to genesis.
    pub fn len(&self) -> Result<usize> {
        self.iter().try_fold(0, |n, block| block.map(|_| n + 1))
    }

    /// Full walk from the stored tip checking keys, links and proof of work.
    /// Returns the block count.
    pub fn verify(&self) -> Result<usize> {
        let mut expected = self.refresh_tip()?;
        let mut count = 0;
        for block in self.iter_from(expected) {
            let block = block?;
            if block.hash != expected {
                warn!(key = %hex::encode(expected), "block stored under a foreign key");
                return Err(LedgerError::InvalidChainLink {
                    block: hex::encode(block.hash),
                    parent: hex::encode(expected),
                });
            }
            if !self.pow.validate(&block) {
                warn!(hash = %hex::encode(block.hash), "proof of work check failed");
                return Err(LedgerError::InvalidProofOfWork(hex::encode(block.hash)));
            }
            count += 1;
            match block.prev_hash {
                Some(parent) => expected = parent,
                None => break,
            }
        }
        Ok(count)
    }
}

enum Cursor {
    StoredTip,
    At(Hash),
    Done,
}

/// Lazy tip-to-genesis traversal. Stops after the first error.
pub struct ChainIter<'a, S: KvStore> {
    store: &'a S,
    cursor: Cursor,
    child: Option<Hash>,
}

impl<S: KvStore> Iterator for ChainIter<'_, S> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = match std::mem::replace(&mut self.cursor, Cursor::Done) {
            Cursor::Done => return None,
            Cursor::At(hash) => hash,
            Cursor::StoredTip => match read_tip(self.store) {
                Ok(Some(tip)) => tip,
                Ok(None) => return Some(Err(LedgerError::NotFound("chain tip".into()))),
                Err(e) => return Some(Err(e)),
            },
        };
        let bytes = match self.store.get(&hash) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                let err = match self.child.take() {
                    Some(child) => LedgerError::InvalidChainLink {
                        block: hex::encode(child),
                        parent: hex::encode(hash),
                    },
                    None => LedgerError::NotFound(format!("block {}", hex::encode(hash))),
                };
                return Some(Err(err));
            }
            Err(e) => return Some(Err(e)),
        };
        let block = match Block::deserialize(&bytes) {
            Ok(block) => block,
            Err(e) => return Some(Err(e.into())),
        };
        if let Some(parent) = block.prev_hash {
            self.cursor = Cursor::At(parent);
        }
        self.child = Some(block.hash);
        Some(Ok(block))
    }
}

fn read_tip<S: KvStore + ?Sized>(store: &S) -> Result<Option<Hash>> {
    match store.get(TIP_KEY)? {
        None => Ok(None),
        Some(bytes) => {
            let tip: Hash = bytes
                .as_slice()
                .try_into()
                .map_err(|_| DecodeError::TipPointer(bytes.len()))?;
            Ok(Some(tip))
        }
    }
}

/// Difficulty recorded at genesis, `None` for stores written before it was recorded.
pub fn stored_difficulty<S: KvStore + ?Sized>(store: &S) -> Result<Option<u32>> {
    match store.get(DIFFICULTY_KEY)? {
        None => Ok(None),
        Some(bytes) => {
            let raw: [u8; 4] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| DecodeError::DifficultyRecord(bytes.len()))?;
            Ok(Some(u32::from_be_bytes(raw)))
        }
    }
}

/// A failed flush after an applied batch is not an append failure: the data is
/// in the store and the tip has moved, so report it and carry on.
fn flush_after_commit<S: KvStore + ?Sized>(store: &S) {
    if let Err(e) = store.flush() {
        warn!(error = %e, "flush after commit failed");
    }
}

fn create_genesis<S: KvStore + ?Sized>(
    store: &S,
    pow: &ProofOfWork,
    config: &ChainConfig,
) -> Result<Hash> {
    let coinbase = Transaction::new_coinbase(&config.genesis_address, &config.genesis_memo)?;
    let opts = MineOptions {
        parallel: config.parallel_mining,
        ..MineOptions::default()
    };
    let genesis = Block::mine(vec![coinbase], None, pow, &opts)?;
    let bytes = genesis.serialize()?;
    let batch = WriteBatch::guarded(TIP_KEY, None)
        .set(&genesis.hash, &bytes)
        .set(DIFFICULTY_KEY, &pow.difficulty().to_be_bytes())
        .set(TIP_KEY, &genesis.hash);

    match store.update(&batch)? {
        Commit::Applied => {
            info!(
                hash = %hex::encode(genesis.hash),
                difficulty = pow.difficulty(),
                "genesis block created"
            );
            flush_after_commit(store);
            Ok(genesis.hash)
        }
        // lost the race to another initializer; adopt its genesis
        Commit::GuardFailed { found: Some(found) } => {
            let tip: Hash = found
                .as_slice()
                .try_into()
                .map_err(|_| DecodeError::TipPointer(found.len()))?;
            debug!(tip = %hex::encode(tip), "genesis already written elsewhere");
            Ok(tip)
        }
        Commit::GuardFailed { found: None } => Err(LedgerError::NotFound("chain tip".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::thread;

    fn config() -> ChainConfig {
        ChainConfig {
            difficulty: 8,
            genesis_address: "alice".into(),
            ..ChainConfig::default()
        }
    }

    fn data(memo: &str) -> Vec<Transaction> {
        vec![Transaction::new_coinbase("miner", memo).unwrap()]
    }

    fn memo(block: &Block) -> &str {
        &block.transactions[0].inputs[0].unlock_signature
    }

    #[test]
    fn init_empty_store_writes_genesis() {
        let store = Arc::new(MemoryStore::new());
        let chain = Chain::init(store.clone(), &config()).unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(stored_difficulty(store.as_ref()).unwrap(), Some(8));
        assert_eq!(chain.stored_tip().unwrap(), chain.tip());
        let blocks: Vec<Block> = chain.iter().collect::<Result<_>>().unwrap();
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].is_genesis());
        assert_eq!(blocks[0].hash, chain.tip());
        assert_eq!(memo(&blocks[0]), "Coins to alice");
    }

    #[test]
    fn init_existing_store_rewrites_nothing() {
        let store = Arc::new(MemoryStore::new());
        let first = Chain::init(store.clone(), &config()).unwrap();
        first.add_block(data("a")).unwrap();
        let entries = store.len();

        let reopened = Chain::init(store.clone(), &config()).unwrap();
        assert_eq!(reopened.tip(), first.tip());
        assert_eq!(store.len(), entries);
        assert_eq!(reopened.len().unwrap(), 2);
    }

    #[test]
    fn reopening_at_another_difficulty_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let chain = Chain::init(store.clone(), &config()).unwrap();
        chain.add_block(data("a")).unwrap();
        let entries = store.len();

        let other = ChainConfig {
            difficulty: 4,
            ..config()
        };
        let err = Chain::init(store.clone(), &other).err().unwrap();
        assert!(matches!(err, LedgerError::Config(_)));
        assert_eq!(store.len(), entries);

        let reopened = Chain::init(store, &config()).unwrap();
        assert_eq!(reopened.verify().unwrap(), 2);
    }

    #[test]
    fn malformed_difficulty_record() {
        let store = Arc::new(MemoryStore::new());
        Chain::init(store.clone(), &config()).unwrap();
        store.set(DIFFICULTY_KEY, b"\x08").unwrap();
        let err = Chain::init(store, &config()).err().unwrap();
        assert!(matches!(
            err,
            LedgerError::Decode(DecodeError::DifficultyRecord(1))
        ));
    }

    #[test]
    fn appends_link_back_to_genesis() {
        let chain = Chain::init(Arc::new(MemoryStore::new()), &config()).unwrap();
        for m in ["a", "b", "c"] {
            chain.add_block(data(m)).unwrap();
        }

        let blocks: Vec<Block> = chain.iter().collect::<Result<_>>().unwrap();
        let memos: Vec<&str> = blocks.iter().map(memo).collect();
        assert_eq!(memos, vec!["c", "b", "a", "Coins to alice"]);
        for pair in blocks.windows(2) {
            assert_eq!(pair[0].prev_hash, Some(pair[1].hash));
        }
        assert!(blocks.last().unwrap().is_genesis());
        assert!(blocks.iter().all(|b| chain.proof_of_work().validate(b)));
        assert_eq!(chain.verify().unwrap(), 4);
    }

    #[test]
    fn iteration_restarts_from_tip() {
        let chain = Chain::init(Arc::new(MemoryStore::new()), &config()).unwrap();
        chain.add_block(data("a")).unwrap();
        assert_eq!(chain.iter().count(), 2);
        assert_eq!(chain.iter().count(), 2);
    }

    #[test]
    fn get_block_by_hash() {
        let chain = Chain::init(Arc::new(MemoryStore::new()), &config()).unwrap();
        let block = chain.add_block(data("a")).unwrap();
        assert_eq!(chain.get_block(&block.hash).unwrap(), block);
        assert!(matches!(
            chain.get_block(&[0u8; 32]),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn corrupt_block_surfaces_decode_error() {
        let store = Arc::new(MemoryStore::new());
        let chain = Chain::init(store.clone(), &config()).unwrap();
        let a = chain.add_block(data("a")).unwrap();
        chain.add_block(data("b")).unwrap();
        store.set(&a.hash, b"garbage").unwrap();

        let mut iter = chain.iter();
        assert_eq!(memo(&iter.next().unwrap().unwrap()), "b");
        assert!(matches!(iter.next(), Some(Err(LedgerError::Decode(_)))));
        assert!(iter.next().is_none());
    }

    #[test]
    fn dangling_parent_is_an_invalid_link() {
        let store = Arc::new(MemoryStore::new());
        let chain = Chain::init(store.clone(), &config()).unwrap();
        let orphan = Block::new(data("orphan"), Some([9u8; 32]), chain.proof_of_work()).unwrap();
        store.set(&orphan.hash, &orphan.serialize().unwrap()).unwrap();
        store.set(TIP_KEY, &orphan.hash).unwrap();

        let reopened = Chain::init(store, &config()).unwrap();
        let mut iter = reopened.iter();
        assert!(iter.next().unwrap().is_ok());
        assert!(matches!(
            iter.next(),
            Some(Err(LedgerError::InvalidChainLink { .. }))
        ));
        assert!(matches!(
            reopened.verify(),
            Err(LedgerError::InvalidChainLink { .. })
        ));
    }

    #[test]
    fn verify_catches_tampered_nonce() {
        let store = Arc::new(MemoryStore::new());
        let chain = Chain::init(store.clone(), &config()).unwrap();
        let a = chain.add_block(data("a")).unwrap();
        chain.add_block(data("b")).unwrap();

        let mut forged = a.clone();
        forged.nonce += 1;
        store.set(&a.hash, &forged.serialize().unwrap()).unwrap();
        assert!(matches!(
            chain.verify(),
            Err(LedgerError::InvalidProofOfWork(_))
        ));
    }

    #[test]
    fn malformed_tip_pointer() {
        let store = Arc::new(MemoryStore::new());
        store.set(TIP_KEY, b"short").unwrap();
        let err = Chain::init(store, &config()).err().unwrap();
        assert!(matches!(
            err,
            LedgerError::Decode(DecodeError::TipPointer(5))
        ));
    }

    #[test]
    fn stale_pending_block_conflicts_then_retry_succeeds() {
        let chain = Chain::init(Arc::new(MemoryStore::new()), &config()).unwrap();
        let opts = chain.mine_options();
        let first = chain.prepare_block(data("x"), &opts).unwrap();
        let second = chain.prepare_block(data("y"), &opts).unwrap();
        assert_eq!(first.parent, second.parent);

        let winner = chain.commit(first).unwrap();
        let err = chain.commit(second).unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, LedgerError::ConcurrentTipConflict { .. }));
        assert_eq!(chain.tip(), winner.hash);

        let retried = chain.add_block(data("y")).unwrap();
        assert_eq!(retried.prev_hash, Some(winner.hash));
        assert_eq!(chain.verify().unwrap(), 3);
    }

    #[test]
    fn instances_sharing_a_store_follow_the_stored_tip() {
        let store = Arc::new(MemoryStore::new());
        let a = Chain::init(store.clone(), &config()).unwrap();
        let b = Chain::init(store.clone(), &config()).unwrap();
        let from_a = a.add_block(data("a")).unwrap();
        let from_b = b.add_block_with_retry(data("b"), 3).unwrap();
        assert_eq!(from_b.prev_hash, Some(from_a.hash));
        assert_eq!(b.len().unwrap(), 3);

        // a's cached tip is stale, but traversal and verify read the store
        assert_eq!(a.tip(), from_a.hash);
        assert_eq!(a.len().unwrap(), 3);
        assert_eq!(a.iter().next().unwrap().unwrap().hash, from_b.hash);
        assert_eq!(a.verify().unwrap(), 3);
        assert_eq!(a.tip(), from_b.hash);
    }

    /// Applies batches normally but never manages to flush.
    struct FailingFlush(MemoryStore);

    impl KvStore for FailingFlush {
        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
            self.0.get(key)
        }

        fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
            self.0.set(key, value)
        }

        fn update(&self, batch: &WriteBatch) -> Result<Commit> {
            self.0.update(batch)
        }

        fn flush(&self) -> Result<()> {
            Err(LedgerError::storage(std::io::Error::new(
                std::io::ErrorKind::Other,
                "fsync",
            )))
        }
    }

    #[test]
    fn failed_flush_after_commit_still_advances_tip() {
        let chain = Chain::init(Arc::new(FailingFlush(MemoryStore::new())), &config()).unwrap();
        let genesis = chain.tip();

        let block = chain.add_block(data("a")).unwrap();
        assert_eq!(block.prev_hash, Some(genesis));
        assert_eq!(chain.tip(), block.hash);
        assert_eq!(chain.stored_tip().unwrap(), block.hash);

        let next = chain.add_block(data("b")).unwrap();
        assert_eq!(next.prev_hash, Some(block.hash));
        assert_eq!(chain.verify().unwrap(), 3);
    }

    #[test]
    fn concurrent_appends_are_serialized() {
        let chain = Arc::new(Chain::init(Arc::new(MemoryStore::new()), &config()).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let chain = Arc::clone(&chain);
                thread::spawn(move || chain.add_block(data(&format!("t{i}"))).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(chain.verify().unwrap(), 5);
    }

    #[test]
    fn parallel_mining_config_is_honoured() {
        let config = ChainConfig {
            parallel_mining: true,
            ..config()
        };
        let chain = Chain::init(Arc::new(MemoryStore::new()), &config).unwrap();
        assert!(chain.mine_options().parallel);
        chain.add_block(data("p")).unwrap();
        assert_eq!(chain.verify().unwrap(), 2);
    }

    #[test]
    fn cancelled_append_leaves_chain_untouched() {
        let store = Arc::new(MemoryStore::new());
        let chain = Chain::init(store.clone(), &config()).unwrap();
        let before = store.len();
        let opts = chain.mine_options();
        opts.cancel.cancel();
        let err = chain.add_block_with(data("never"), &opts).unwrap_err();
        assert!(matches!(err, LedgerError::MiningCancelled { .. }));
        assert_eq!(store.len(), before);
        assert_eq!(chain.len().unwrap(), 1);
    }

    #[test]
    fn exhausted_search_is_reported() {
        let config = ChainConfig {
            difficulty: 256,
            max_nonce: 16,
            ..config()
        };
        let err = Chain::init(Arc::new(MemoryStore::new()), &config).err().unwrap();
        assert!(matches!(err, LedgerError::ProofOfWorkExhausted { .. }));
    }
}
