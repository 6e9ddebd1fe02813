use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Everything the ledger can fail with. Only `ConcurrentTipConflict` is worth retrying.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("proof of work exhausted: no nonce in 0..={max_nonce} meets difficulty {difficulty}")]
    ProofOfWorkExhausted { max_nonce: i64, difficulty: u32 },

    #[error("mining cancelled after {attempts} attempts")]
    MiningCancelled { attempts: u64 },

    #[error("block {block} points at missing parent {parent}")]
    InvalidChainLink { block: String, parent: String },

    #[error("block {0} fails its proof of work")]
    InvalidProofOfWork(String),

    #[error("tip moved while appending: expected {expected}, found {found}")]
    ConcurrentTipConflict { expected: String, found: String },

    #[error("difficulty {0} outside 1..=256")]
    InvalidDifficulty(u32),

    #[error("a block needs at least one transaction")]
    EmptyBlock,

    #[error("config error: {0}")]
    Config(String),
}

impl LedgerError {
    pub fn storage<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        LedgerError::StorageUnavailable(Box::new(err))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::ConcurrentTipConflict { .. })
    }
}

/// Why a stored block could not be read back.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("bad magic bytes")]
    BadMagic,

    #[error("unsupported codec version {0}")]
    UnsupportedVersion(u8),

    #[error("truncated input ({0} bytes)")]
    Truncated(usize),

    #[error("malformed block body: {0}")]
    Body(String),

    #[error("malformed tip pointer ({0} bytes)")]
    TipPointer(usize),

    #[error("malformed difficulty record ({0} bytes)")]
    DifficultyRecord(usize),
}
