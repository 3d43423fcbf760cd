//! Stage state reconstruction.
//!
//! Rebuilds the in-memory record map by replaying the record store and then
//! the stage log; log entries are strictly newer and fully overwrite store
//! entries for the same `sample_id`. While replaying, done-status is tracked
//! per record so that a later log entry with an invalid result retracts an
//! earlier success (an errored retry logged after a partial run).

use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracing::{info, warn};

use crate::error::StorageError;
use crate::store::{jsonl, Record, Stage, StageLog};

/// Reconstructed state for one stage.
pub struct StageState {
    /// Complete map of records, store overridden by log.
    pub records: HashMap<String, Record>,
    /// Sample ids that are validly done for this stage.
    pub done: HashSet<String>,
    /// Records still requiring processing, sorted by sample id.
    pub pending: Vec<Record>,
}

/// Loads and classifies the state for a stage.
///
/// # Errors
///
/// - `StorageError::MissingStore` if the evaluate stage finds no record
///   store (evaluation always requires prior inference output).
/// - `StorageError::NoInput` if neither store nor log yields any records
///   for the infer stage.
/// - `StorageError::Io` on any unreadable file; the caller must abort the
///   stage without deleting anything.
pub fn load_stage_state(
    store_path: &Path,
    log: &StageLog,
    stage: Stage,
    retry_errors: bool,
) -> Result<StageState, StorageError> {
    let mut records: HashMap<String, Record> = HashMap::new();
    let mut done: HashSet<String> = HashSet::new();

    let store_exists = store_path.exists();
    if stage == Stage::Evaluate && !store_exists {
        return Err(StorageError::MissingStore(store_path.to_path_buf()));
    }

    if store_exists {
        info!(path = %store_path.display(), "reading record store");
        for record in jsonl::load_records(store_path)? {
            replay(&mut records, &mut done, stage, record);
        }
    } else {
        info!(path = %store_path.display(), "record store not found; reading stage log only");
    }

    if log.exists() {
        info!(path = %log.path().display(), stage = %stage, "replaying stage log");
        for record in log.load()? {
            replay(&mut records, &mut done, stage, record);
        }
    }

    if records.is_empty() && !store_exists {
        return Err(StorageError::NoInput(store_path.to_path_buf()));
    }

    let mut pending: Vec<Record> = records
        .values()
        .filter(|record| needs_processing(record, stage, retry_errors, &done))
        .cloned()
        .collect();
    pending.sort_by(|a, b| a.sample_id.cmp(&b.sample_id));

    for record in &pending {
        if stage.is_error(record) {
            info!(sample_id = %record.sample_id, stage = %stage, "scheduling retry for errored record");
        }
    }

    info!(
        stage = %stage,
        loaded = records.len(),
        done = done.len(),
        pending = pending.len(),
        "stage state loaded"
    );

    Ok(StageState {
        records,
        done,
        pending,
    })
}

/// Applies one replayed record: the newest entry for a sample id wins, and
/// its validity alone determines done-status.
fn replay(
    records: &mut HashMap<String, Record>,
    done: &mut HashSet<String>,
    stage: Stage,
    record: Record,
) {
    if record.sample_id.is_empty() {
        warn!("skipping replayed record with empty sample_id");
        return;
    }
    if stage.is_done(&record) {
        done.insert(record.sample_id.clone());
    } else {
        done.remove(&record.sample_id);
    }
    records.insert(record.sample_id.clone(), record);
}

fn needs_processing(
    record: &Record,
    stage: Stage,
    retry_errors: bool,
    done: &HashSet<String>,
) -> bool {
    if done.contains(&record.sample_id) {
        return false;
    }
    match stage {
        Stage::Infer => {
            if record.prompt_failed() {
                return false;
            }
        }
        Stage::Evaluate => {
            if !record.has_valid_answer() {
                return false;
            }
        }
    }
    if stage.is_error(record) {
        return retry_errors;
    }
    true
}
