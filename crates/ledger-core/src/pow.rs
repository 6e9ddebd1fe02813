//! Proof of work: find a nonce whose digest over
//! `prev_hash ‖ transactions_digest ‖ be64(nonce) ‖ be64(difficulty)`
//! is numerically below `1 << (256 - difficulty)`.

use crate::{
    constants::{HASH_BITS, HASH_SIZE, MAX_NONCE, PROGRESS_INTERVAL},
    encode_int64_be, mine, sha256, transactions_digest, Block, Hash, LedgerError, Result,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{debug, info};

/// The 256-bit threshold a digest must stay under, stored big-endian so that
/// byte-wise ordering matches numeric ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Target(Hash);

impl Target {
    pub fn from_difficulty(difficulty: u32) -> Result<Self> {
        if difficulty == 0 || difficulty > HASH_BITS {
            return Err(LedgerError::InvalidDifficulty(difficulty));
        }
        let bit = (HASH_BITS - difficulty) as usize;
        let mut bytes = [0u8; HASH_SIZE];
        bytes[HASH_SIZE - 1 - bit / 8] = 1 << (bit % 8);
        Ok(Self(bytes))
    }

    pub fn is_met_by(&self, digest: &Hash) -> bool {
        digest < &self.0
    }

    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }
}

/// Shared flag to abandon a running search. Cancelling has no side effects.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Progress side channel for the search. Both hooks default to doing nothing.
pub trait MiningObserver: Send + Sync {
    fn on_progress(&self, _nonce: i64, _digest: &Hash) {}
    fn on_found(&self, _nonce: i64, _digest: &Hash) {}
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl MiningObserver for NoopObserver {}

/// Knobs for a single mining attempt.
#[derive(Clone, Default)]
pub struct MineOptions {
    pub cancel: CancelFlag,
    pub observer: Option<Arc<dyn MiningObserver>>,
    pub parallel: bool,
}

impl MineOptions {
    pub(crate) fn observer(&self) -> &dyn MiningObserver {
        match &self.observer {
            Some(observer) => observer.as_ref(),
            None => &NoopObserver,
        }
    }
}

/// Reusable hashing buffer; only the nonce slot changes between trials.
#[derive(Clone, Debug)]
pub(crate) struct Preimage {
    buf: Vec<u8>,
    nonce_at: usize,
}

impl Preimage {
    fn new(prev_hash: &[u8], txs_digest: &Hash, difficulty: u32) -> Self {
        let mut buf = Vec::with_capacity(prev_hash.len() + HASH_SIZE + 16);
        buf.extend_from_slice(prev_hash);
        buf.extend_from_slice(txs_digest);
        let nonce_at = buf.len();
        buf.extend_from_slice(&encode_int64_be(0));
        buf.extend_from_slice(&encode_int64_be(i64::from(difficulty)));
        Self { buf, nonce_at }
    }

    pub(crate) fn digest(&mut self, nonce: i64) -> Hash {
        self.buf[self.nonce_at..self.nonce_at + 8].copy_from_slice(&encode_int64_be(nonce));
        sha256(&self.buf)
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.buf
    }
}

#[derive(Clone, Debug)]
pub struct ProofOfWork {
    difficulty: u32,
    target: Target,
    max_nonce: i64,
}

impl ProofOfWork {
    pub fn new(difficulty: u32) -> Result<Self> {
        Ok(Self {
            difficulty,
            target: Target::from_difficulty(difficulty)?,
            max_nonce: MAX_NONCE,
        })
    }

    /// Bound the search to `0..=max_nonce`. Negative bounds are treated as zero.
    pub fn with_max_nonce(mut self, max_nonce: i64) -> Self {
        self.max_nonce = max_nonce.max(0);
        self
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn max_nonce(&self) -> i64 {
        self.max_nonce
    }

    pub(crate) fn preimage(&self, prev_hash: &[u8], txs_digest: &Hash) -> Preimage {
        Preimage::new(prev_hash, txs_digest, self.difficulty)
    }

    /// The exact bytes hashed for `nonce`.
    pub fn prepare_data(&self, prev_hash: &[u8], txs_digest: &Hash, nonce: i64) -> Vec<u8> {
        let mut preimage = self.preimage(prev_hash, txs_digest);
        preimage.digest(nonce);
        preimage.bytes().to_vec()
    }

    pub fn candidate_digest(&self, prev_hash: &[u8], txs_digest: &Hash, nonce: i64) -> Hash {
        self.preimage(prev_hash, txs_digest).digest(nonce)
    }

    /// Search nonces from zero upward until one meets the target.
    pub fn run(&self, prev_hash: &[u8], txs_digest: &Hash) -> Result<(i64, Hash)> {
        self.search(prev_hash, txs_digest, &MineOptions::default())
    }

    pub fn search(
        &self,
        prev_hash: &[u8],
        txs_digest: &Hash,
        opts: &MineOptions,
    ) -> Result<(i64, Hash)> {
        let found = if opts.parallel {
            mine::mine_parallel(self, prev_hash, txs_digest, opts)
        } else {
            self.search_sequential(prev_hash, txs_digest, opts)
        }?;
        info!(
            nonce = found.0,
            hash = %hex::encode(found.1),
            difficulty = self.difficulty,
            "proof of work found"
        );
        opts.observer().on_found(found.0, &found.1);
        Ok(found)
    }

    fn search_sequential(
        &self,
        prev_hash: &[u8],
        txs_digest: &Hash,
        opts: &MineOptions,
    ) -> Result<(i64, Hash)> {
        let observer = opts.observer();
        let mut preimage = self.preimage(prev_hash, txs_digest);
        for nonce in 0..=self.max_nonce {
            if opts.cancel.is_cancelled() {
                debug!(nonce, "mining cancelled");
                return Err(LedgerError::MiningCancelled {
                    attempts: nonce as u64,
                });
            }
            let digest = preimage.digest(nonce);
            if self.target.is_met_by(&digest) {
                return Ok((nonce, digest));
            }
            if nonce % PROGRESS_INTERVAL == 0 {
                observer.on_progress(nonce, &digest);
            }
        }
        Err(self.exhausted())
    }

    pub(crate) fn exhausted(&self) -> LedgerError {
        LedgerError::ProofOfWorkExhausted {
            max_nonce: self.max_nonce,
            difficulty: self.difficulty,
        }
    }

    /// Recompute the digest for the block's claimed nonce: it must equal the stored
    /// hash and sit below the target. Never mutates the block.
    pub fn validate(&self, block: &Block) -> bool {
        if block.nonce < 0 {
            return false;
        }
        let digest = self.candidate_digest(
            block.prev_hash_bytes(),
            &transactions_digest(&block.transactions),
            block.nonce,
        );
        digest == block.hash && self.target.is_met_by(&digest)
    }
}
