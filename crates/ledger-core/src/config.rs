use crate::{
    constants::{DIFFICULTY, MAX_NONCE},
    pow::ProofOfWork,
    LedgerError, Result,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub difficulty: u32,
    pub max_nonce: i64,
    pub parallel_mining: bool,
    /// Recipient of the genesis coinbase.
    pub genesis_address: String,
    /// Empty means "Coins to {genesis_address}".
    pub genesis_memo: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            difficulty: DIFFICULTY,
            max_nonce: MAX_NONCE,
            parallel_mining: false,
            genesis_address: "genesis".to_string(),
            genesis_memo: String::new(),
        }
    }
}

impl ChainConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| LedgerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| LedgerError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        self.proof_of_work()
            .map(|_| ())
            .map_err(|e| LedgerError::Config(e.to_string()))
    }

    pub fn proof_of_work(&self) -> Result<ProofOfWork> {
        Ok(ProofOfWork::new(self.difficulty)?.with_max_nonce(self.max_nonce))
    }
}
