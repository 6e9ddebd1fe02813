//! Blocks bind an ordered list of transactions to their parent's hash and carry
//! the nonce/hash pair that proves the work. A block only exists once mined.

use crate::{
    codec,
    constants::{BLOCK_CODEC_VERSION, BLOCK_MAGIC},
    error::DecodeError,
    pow::{MineOptions, ProofOfWork},
    transactions_digest, Hash, LedgerError, Result, Transaction,
};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub hash: Hash,
    pub transactions: Vec<Transaction>,
    /// `None` only for the genesis block.
    pub prev_hash: Option<Hash>,
    pub nonce: i64,
}

impl Block {
    /// Build and mine a block on top of `prev_hash`.
    pub fn new(txs: Vec<Transaction>, prev_hash: Option<Hash>, pow: &ProofOfWork) -> Result<Self> {
        Self::mine(txs, prev_hash, pow, &MineOptions::default())
    }

    pub fn genesis(coinbase: Transaction, pow: &ProofOfWork) -> Result<Self> {
        Self::new(vec![coinbase], None, pow)
    }

    pub fn mine(
        txs: Vec<Transaction>,
        prev_hash: Option<Hash>,
        pow: &ProofOfWork,
        opts: &MineOptions,
    ) -> Result<Self> {
        if txs.is_empty() {
            return Err(LedgerError::EmptyBlock);
        }
        let parent: &[u8] = match &prev_hash {
            Some(h) => h,
            None => &[],
        };
        let (nonce, hash) = pow.search(parent, &transactions_digest(&txs), opts)?;
        Ok(Self {
            hash,
            transactions: txs,
            prev_hash,
            nonce,
        })
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_none()
    }

    /// Parent hash as hashed by proof of work: empty for genesis.
    pub fn prev_hash_bytes(&self) -> &[u8] {
        match &self.prev_hash {
            Some(h) => h,
            None => &[],
        }
    }

    pub fn transactions_digest(&self) -> Hash {
        transactions_digest(&self.transactions)
    }

    /// `magic ‖ version ‖ bincode(block)`.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let body = codec()
            .serialize(self)
            .map_err(|e| LedgerError::Encode(e.to_string()))?;
        let mut out = Vec::with_capacity(BLOCK_MAGIC.len() + 1 + body.len());
        out.extend_from_slice(BLOCK_MAGIC);
        out.push(BLOCK_CODEC_VERSION);
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn deserialize(bytes: &[u8]) -> std::result::Result<Self, DecodeError> {
        let header = BLOCK_MAGIC.len() + 1;
        if bytes.len() < header {
            return Err(DecodeError::Truncated(bytes.len()));
        }
        if &bytes[..BLOCK_MAGIC.len()] != BLOCK_MAGIC {
            return Err(DecodeError::BadMagic);
        }
        let version = bytes[BLOCK_MAGIC.len()];
        if version != BLOCK_CODEC_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        codec()
            .deserialize(&bytes[header..])
            .map_err(|e| DecodeError::Body(e.to_string()))
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "block {} (parent {}, nonce {}, {} txs)",
            hex::encode(self.hash),
            hex::encode(self.prev_hash_bytes()),
            self.nonce,
            self.transactions.len()
        )
    }
}
