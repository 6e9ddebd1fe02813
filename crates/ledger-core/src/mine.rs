use crate::{
    constants::PROGRESS_INTERVAL,
    pow::{MineOptions, ProofOfWork},
    Hash, LedgerError, Result,
};
use rayon::prelude::*;
use tracing::debug;

enum Probe {
    Found(i64, Hash),
    Cancelled(i64),
}

/// Searches nonces in parallel across the rayon pool.
/// Returns the lowest satisfying nonce, so the outcome matches the sequential search.
pub fn mine_parallel(
    pow: &ProofOfWork,
    prev_hash: &[u8],
    txs_digest: &Hash,
    opts: &MineOptions,
) -> Result<(i64, Hash)> {
    let observer = opts.observer();
    // Each worker hashes into its own copy; only the nonce bytes change per attempt.
    let template = pow.preimage(prev_hash, txs_digest);

    let probe = (0..=pow.max_nonce())
        .into_par_iter()
        .map_init(
            || template.clone(),
            |preimage, nonce| {
                if opts.cancel.is_cancelled() {
                    return Some(Probe::Cancelled(nonce));
                }
                let digest = preimage.digest(nonce);
                if pow.target().is_met_by(&digest) {
                    return Some(Probe::Found(nonce, digest));
                }
                if nonce % PROGRESS_INTERVAL == 0 {
                    observer.on_progress(nonce, &digest);
                }
                None
            },
        )
        .find_map_first(|probe| probe);

    match probe {
        Some(Probe::Found(nonce, digest)) => Ok((nonce, digest)),
        Some(Probe::Cancelled(nonce)) => {
            debug!(nonce, "parallel mining cancelled");
            Err(LedgerError::MiningCancelled {
                attempts: nonce as u64,
            })
        }
        None => Err(pow.exhausted()),
    }
}
