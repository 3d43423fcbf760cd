//! Log-to-store merge.
//!
//! Folds a fully drained stage log into the record store: the in-memory map
//! (store overridden by every log entry) is rewritten atomically over the
//! store, then the log is deleted. If the rewrite fails the log is left in
//! place; its presence is itself the signal that a merge is still pending.

use std::collections::HashMap;
use std::path::Path;

use tracing::{info, warn};

use crate::error::StorageError;
use crate::store::{jsonl, Record, StageLog};

/// Rewrites the record store from the complete map, then removes the log.
///
/// Records are written sorted by `sample_id`; ordering carries no meaning,
/// sorting just keeps reruns byte-comparable. Safe to call when the log is
/// already gone (the rewrite is idempotent, the removal is skipped).
///
/// # Errors
///
/// Propagates the rewrite failure; the stage log is NOT deleted in that
/// case, so no completed result is lost.
pub fn merge_stage_log(
    records: &HashMap<String, Record>,
    store_path: &Path,
    log: &StageLog,
) -> Result<(), StorageError> {
    if records.is_empty() {
        warn!(stage = %log.stage(), "no records in memory to merge");
        return Ok(());
    }

    info!(
        stage = %log.stage(),
        path = %store_path.display(),
        records = records.len(),
        "merging stage results into record store"
    );
    let mut ordered: Vec<&Record> = records.values().collect();
    ordered.sort_by(|a, b| a.sample_id.cmp(&b.sample_id));
    jsonl::safe_rewrite(store_path, ordered)?;

    if log.exists() {
        match log.remove() {
            Ok(()) => info!(path = %log.path().display(), "stage log removed after merge"),
            Err(error) => warn!(
                path = %log.path().display(),
                %error,
                "could not remove stage log after merge"
            ),
        }
    }
    Ok(())
}
