//! Storage backends for the ledger chain.

pub mod sled_store;

pub use ledger_core::store::{Commit, KvStore, MemoryStore, WriteBatch};
pub use sled_store::SledStore;
