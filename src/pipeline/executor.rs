//! Worker-pool stage executor.
//!
//! Pulls pending records through a bounded pool of workers, appending each
//! finished record to the stage log the moment it completes. The append is
//! the crash-recovery checkpoint: once a result is on disk, a later run will
//! not redo it.
//!
//! Concurrency model:
//! - Workers pull records from a shared queue; each record is handed out
//!   exactly once.
//! - Workers never touch the record map. Completed records flow over an
//!   mpsc channel to a single drain loop, which appends to the log and
//!   updates the map.
//! - Cancellation is cooperative: once the cancel flag is set, workers stop
//!   dequeuing; in-flight items finish and are still checkpointed.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::TaskError;
use crate::store::{Record, Stage, StageLog};

/// Per-item processing for one stage.
///
/// Implementations return the updated record on success. Any error is
/// captured by the executor as this stage's structured error value; it never
/// aborts the run.
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    async fn process(&self, record: &Record) -> Result<Record, TaskError>;
}

/// Result of draining one stage.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorOutcome {
    /// Number of items completed and checkpointed this run.
    pub completed: usize,
    /// True if the run was cancelled or a worker died; merge must be
    /// skipped so the stage log survives for the next invocation.
    pub interrupted: bool,
}

/// Bounded worker pool for one stage.
pub struct StageExecutor {
    stage: Stage,
    workers: usize,
    cancel: Arc<AtomicBool>,
}

impl StageExecutor {
    /// Creates an executor for a stage.
    pub fn new(stage: Stage, workers: usize, cancel: Arc<AtomicBool>) -> Self {
        Self {
            stage,
            workers: workers.max(1),
            cancel,
        }
    }

    /// Processes all pending records, checkpointing each completion.
    ///
    /// `records` is updated in place with every completed item; only this
    /// method's drain loop writes to it.
    pub async fn run(
        &self,
        pending: Vec<Record>,
        records: &mut HashMap<String, Record>,
        log: &StageLog,
        processor: Arc<dyn ItemProcessor>,
    ) -> ExecutorOutcome {
        let total = pending.len();
        info!(
            stage = %self.stage,
            total,
            workers = self.workers,
            "starting stage execution"
        );

        let queue = Arc::new(Mutex::new(VecDeque::from(pending)));
        let (tx, mut rx) = mpsc::channel::<Record>(self.workers * 2);

        let mut handles = Vec::with_capacity(self.workers);
        for worker_id in 0..self.workers {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let processor = Arc::clone(&processor);
            let cancel = Arc::clone(&self.cancel);
            let stage = self.stage;
            handles.push(tokio::spawn(async move {
                loop {
                    if cancel.load(Ordering::SeqCst) {
                        break;
                    }
                    let item = queue.lock().expect("work queue lock poisoned").pop_front();
                    let Some(record) = item else { break };
                    let processed = process_item(stage, processor.as_ref(), record).await;
                    if tx.send(processed).await.is_err() {
                        break;
                    }
                }
                debug!(worker_id, "worker finished");
            }));
        }
        // The drain loop ends once all workers have dropped their senders.
        drop(tx);

        let mut completed = 0usize;
        while let Some(record) = rx.recv().await {
            if let Err(error) = log.append(&record) {
                error!(
                    sample_id = %record.sample_id,
                    log = %log.path().display(),
                    %error,
                    "failed to append result to stage log; result lost for this attempt"
                );
            }
            records.insert(record.sample_id.clone(), record);
            completed += 1;
            if completed % 25 == 0 || completed == total {
                info!(stage = %self.stage, completed, total, "stage progress");
            }
        }

        let mut interrupted = self.cancel.load(Ordering::SeqCst);
        for join_result in join_all(handles).await {
            if let Err(error) = join_result {
                error!(%error, "worker task failed");
                interrupted = true;
            }
        }

        if interrupted {
            warn!(
                stage = %self.stage,
                completed,
                total,
                "stage execution interrupted; completed results remain checkpointed"
            );
        } else {
            info!(stage = %self.stage, completed, "stage execution finished");
        }

        ExecutorOutcome {
            completed,
            interrupted,
        }
    }
}

/// Runs one item: timing always recorded, errors captured as field values.
async fn process_item(stage: Stage, processor: &dyn ItemProcessor, record: Record) -> Record {
    let start = Instant::now();
    let mut finished = match processor.process(&record).await {
        Ok(updated) => updated,
        Err(error) => {
            warn!(
                sample_id = %record.sample_id,
                stage = %stage,
                %error,
                "item processing failed"
            );
            let mut failed = record;
            stage.record_failure(&mut failed, &error.to_string());
            failed
        }
    };
    stage.record_duration(&mut finished, start.elapsed().as_secs_f64());
    finished
}
