//! Core types for the minimal proof-of-work ledger: transactions, blocks,
//! the mining engine and the chain that persists them through a [`store::KvStore`].

pub mod block;
pub mod chain;
pub mod config;
pub mod constants;
pub mod error;
pub mod mine;
pub mod pow;
pub mod store;
pub mod transaction;

pub use block::Block;
pub use chain::{stored_difficulty, Chain, ChainIter, PendingBlock};
pub use config::ChainConfig;
pub use error::{DecodeError, LedgerError, Result};
pub use pow::{CancelFlag, MiningObserver, NoopObserver, ProofOfWork};
pub use transaction::{StringEquality, Transaction, TxInput, TxOutput, UnlockVerifier};

use sha2::{Digest, Sha256};

pub type Hash = [u8; constants::HASH_SIZE];

pub fn sha256(bytes: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Fixed-width big-endian encoding, so the nonce never shifts the fields after it.
pub fn encode_int64_be(n: i64) -> [u8; 8] {
    n.to_be_bytes()
}

/// SHA-256 over the concatenated transaction ids, in block order.
pub fn transactions_digest(txs: &[Transaction]) -> Hash {
    let mut hasher = Sha256::new();
    for tx in txs {
        hasher.update(tx.id);
    }
    hasher.finalize().into()
}

pub fn short_hex(bytes: &[u8]) -> String {
    let full = hex::encode(bytes);
    if full.len() > 16 {
        format!("{}…", &full[..16])
    } else {
        full
    }
}

pub(crate) fn codec() -> impl bincode::Options {
    use bincode::Options;
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(constants::MAX_ENCODED_BLOCK)
        .reject_trailing_bytes()
}
