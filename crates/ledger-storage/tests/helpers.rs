#![allow(dead_code)]

use std::fs;

use ledger_core::{ChainConfig, Transaction};
use ledger_storage::SledStore;
use tempfile::{tempdir, TempDir};

pub fn test_config() -> ChainConfig {
    ChainConfig {
        difficulty: 8,
        genesis_address: "satoshi".into(),
        ..ChainConfig::default()
    }
}

/// One coinbase carrying `memo`, the way the CLI turns free-form data into a block.
pub fn data(memo: &str) -> Vec<Transaction> {
    vec![Transaction::new_coinbase("miner", memo).expect("coinbase")]
}

pub fn create_temp_dir() -> (TempDir, std::path::PathBuf) {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let db_path = temp_dir.path().to_path_buf();
    (temp_dir, db_path)
}

pub fn create_temp_store() -> (TempDir, SledStore) {
    let (temp_dir, db_path) = create_temp_dir();
    (
        temp_dir,
        SledStore::open(&db_path).expect("Failed to open SledStore"),
    )
}

pub fn teardown_store(temp_dir: TempDir, store: SledStore) {
    let db_path = temp_dir.path().to_path_buf();
    store.clear().expect("Failed to clear the store");
    drop(store);
    temp_dir.close().expect("Failed to delete temp dir");
    let _ = fs::remove_dir_all(&db_path);
    assert!(!db_path.exists(), "Database directory should be removed");
}
