pub const BYTE: usize = 8;
pub const HASH_SIZE: usize = 32;
pub const HASH_BITS: u32 = (HASH_SIZE * BYTE) as u32;

/// Leading zero bits a block digest needs. Low on purpose; this is a demo chain.
pub const DIFFICULTY: u32 = 12;
pub const MAX_NONCE: i64 = i64::MAX;
/// Attempts between two progress callbacks while mining.
pub const PROGRESS_INTERVAL: i64 = 1 << 12;

pub const COINBASE_REWARD: u64 = 100;
pub const COINBASE_OUTPUT_INDEX: i64 = -1;

/// Store key holding the hash of the current tip block.
pub const TIP_KEY: &[u8] = b"lh";
/// Store key holding the difficulty the chain was mined at (4 bytes, big-endian).
pub const DIFFICULTY_KEY: &[u8] = b"difficulty";

pub const BLOCK_MAGIC: &[u8; 3] = b"LGB";
pub const BLOCK_CODEC_VERSION: u8 = 1;
pub const MAX_ENCODED_BLOCK: u64 = 32 * 1024 * 1024;
