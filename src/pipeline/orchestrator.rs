//! The pipeline orchestrator: generate, infer, evaluate, analyze.
//!
//! Stages run strictly sequentially within one invocation. Each log-backed
//! stage follows the same shape: reconstruct state (store overridden by
//! log), drain pending records through a worker pool that checkpoints every
//! completion, then fold the log into the store with an atomic rewrite.
//! An interrupted stage skips the merge and leaves the log as the resume
//! point for the next invocation.

use std::collections::HashMap;
use std::fs;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{error, info, warn};

use crate::error::{StorageError, TaskError};
use crate::metrics::{self, MetricReport};
use crate::model::ModelClient;
use crate::pipeline::config::{ConfigError, PipelineConfig};
use crate::pipeline::executor::{ItemProcessor, StageExecutor};
use crate::pipeline::loader::load_stage_state;
use crate::pipeline::merge::merge_stage_log;
use crate::store::{jsonl, Record, Stage, StageLog, PROMPT_FAILED};
use crate::task::{TaskRegistry, TaskRunner, TaskSpec};

/// Result of one log-backed stage invocation.
#[derive(Debug, Clone, Copy)]
pub struct StageOutcome {
    pub stage: Stage,
    /// Items completed and checkpointed this run.
    pub completed: usize,
    /// True if the stage was cancelled or a worker died; the stage log
    /// survives and the next invocation resumes from it.
    pub interrupted: bool,
    /// True if the stage log was folded into the record store.
    pub merged: bool,
}

/// Drives a set of task specs through all four stages against one model.
pub struct Pipeline {
    config: PipelineConfig,
    specs: Vec<TaskSpec>,
    registry: Arc<TaskRegistry>,
    runners: Arc<HashMap<String, Arc<TaskRunner>>>,
    infer_log: StageLog,
    eval_log: StageLog,
    cancel: Arc<AtomicBool>,
}

impl Pipeline {
    /// Builds a pipeline, instantiating one runner per selected task path.
    ///
    /// A task path whose runner fails to construct is logged and skipped;
    /// its records (if any exist from earlier runs) will fail per-item at
    /// processing time instead of blocking the whole run.
    pub fn new(
        specs: Vec<TaskSpec>,
        registry: Arc<TaskRegistry>,
        model: Arc<dyn ModelClient>,
        config: PipelineConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        info!(tasks = specs.len(), "initializing task runners");
        let mut runners = HashMap::new();
        for spec in &specs {
            match TaskRunner::from_registry(&registry, spec, Arc::clone(&model)) {
                Ok(runner) => {
                    runners.insert(spec.task_path.clone(), Arc::new(runner));
                }
                Err(error) => {
                    error!(task_path = %spec.task_path, %error, "failed to initialize task runner");
                }
            }
        }
        info!(runners = runners.len(), "task runners initialized");

        let infer_log = StageLog::new(Stage::Infer, &config.output_file);
        let eval_log = StageLog::new(Stage::Evaluate, &config.output_file);

        Ok(Self {
            config,
            specs,
            registry,
            runners: Arc::new(runners),
            infer_log,
            eval_log,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The cooperative cancellation flag; set it (e.g. from a Ctrl-C
    /// handler) to stop dispatching new work.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// The active configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Generates prompts and writes the initial record store.
    ///
    /// A no-op if the store already exists (infer/evaluate resume from it)
    /// or if stage logs from an unresolved previous run are present.
    pub fn generate(&self) -> Result<usize, StorageError> {
        let store = &self.config.output_file;
        if store.exists() {
            info!(
                path = %store.display(),
                "record store already exists; skipping prompt generation"
            );
            return Ok(0);
        }
        if self.infer_log.exists() || self.eval_log.exists() {
            warn!(
                "stage logs from a previous run exist; skipping prompt generation \
                 until they are merged or cleared"
            );
            return Ok(0);
        }

        if let Some(dir) = store.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        info!(path = %store.display(), "generating prompts");
        let mut records = Vec::new();
        for spec in &self.specs {
            let Some(runner) = self.runners.get(&spec.task_path) else {
                warn!(task_path = %spec.task_path, "no runner available; skipping sample generation");
                continue;
            };
            let task_config = serde_json::to_value(spec)?;
            let eval_args = serde_json::to_value(&self.config.sampling)?;

            for index in 0..spec.sample_num {
                let mut record = Record::new(
                    spec.sample_id(index),
                    format!("{}/{}", self.config.namespace, spec.task_path),
                );
                record.task_config = task_config.clone();
                record.eval_args = eval_args.clone();

                match runner.generate_prompt(&record) {
                    Ok((prompt, metadata)) => {
                        record.prompt = Some(prompt);
                        record.metadata = Some(metadata);
                    }
                    Err(error) => {
                        error!(sample_id = %record.sample_id, %error, "prompt generation failed");
                        record.prompt = Some(PROMPT_FAILED.to_string());
                        record.metadata = Some(json!({ "error": error.to_string() }));
                    }
                }
                records.push(record);
            }
        }

        jsonl::safe_rewrite(store, &records)?;
        info!(count = records.len(), "initial record store written");
        Ok(records.len())
    }

    /// Runs the infer stage to completion (or interruption).
    pub async fn infer(&self) -> Result<StageOutcome, StorageError> {
        self.run_stage(Stage::Infer).await
    }

    /// Runs the evaluate stage.
    ///
    /// If an inference log from an interrupted run is still present it is
    /// merged first, so evaluation always sees the latest answers.
    pub async fn evaluate(&self) -> Result<StageOutcome, StorageError> {
        if self.infer_log.exists() {
            warn!("inference log still present; merging it before evaluation");
            let state = load_stage_state(
                &self.config.output_file,
                &self.infer_log,
                Stage::Infer,
                self.config.retry_infer_errors,
            )?;
            self.merge_or_keep(Stage::Infer, &state.records, &self.infer_log)?;
        }
        self.run_stage(Stage::Evaluate).await
    }

    /// Aggregates hierarchical metrics and writes the report.
    ///
    /// Requires a fully merged state: refuses to run while any stage log
    /// exists.
    pub fn analyze(&self) -> Result<MetricReport, StorageError> {
        for log in [&self.infer_log, &self.eval_log] {
            if log.exists() {
                return Err(StorageError::PendingStageLog(log.path().to_path_buf()));
            }
        }
        let store = &self.config.output_file;
        if !store.exists() {
            return Err(StorageError::MissingStore(store.clone()));
        }

        let report = metrics::aggregate_store(store, &self.registry)?;
        if report.is_empty() {
            warn!("no records contributed to the metric report; nothing written");
            return Ok(report);
        }

        let path = self.config.report_path();
        jsonl::write_json_report(&path, &report)?;
        info!(
            path = %path.display(),
            hierarchies = report.len(),
            "metric report written"
        );
        Ok(report)
    }

    /// Runs the whole pipeline: generate, infer, evaluate, analyze.
    ///
    /// Stops (without error) after an interrupted stage; the stage log
    /// carries the progress into the next invocation.
    pub async fn run_all(&self) -> Result<(), StorageError> {
        self.generate()?;

        let outcome = self.infer().await?;
        if outcome.interrupted {
            warn!("pipeline stopped after interrupted inference; re-run to resume");
            return Ok(());
        }

        let outcome = self.evaluate().await?;
        if outcome.interrupted {
            warn!("pipeline stopped after interrupted evaluation; re-run to resume");
            return Ok(());
        }

        self.analyze()?;
        info!("pipeline run finished");
        Ok(())
    }

    async fn run_stage(&self, stage: Stage) -> Result<StageOutcome, StorageError> {
        let (log, workers, retry_errors) = match stage {
            Stage::Infer => (
                &self.infer_log,
                self.config.infer_workers,
                self.config.retry_infer_errors,
            ),
            Stage::Evaluate => (
                &self.eval_log,
                self.config.eval_workers,
                self.config.retry_eval_errors,
            ),
        };
        let processor: Arc<dyn ItemProcessor> = match stage {
            Stage::Infer => Arc::new(InferProcessor {
                runners: Arc::clone(&self.runners),
            }),
            Stage::Evaluate => Arc::new(EvalProcessor {
                runners: Arc::clone(&self.runners),
            }),
        };

        let mut state = load_stage_state(&self.config.output_file, log, stage, retry_errors)?;

        if state.pending.is_empty() {
            info!(stage = %stage, "no records require processing");
            if log.exists() {
                self.merge_or_keep(stage, &state.records, log)?;
            }
            return Ok(StageOutcome {
                stage,
                completed: 0,
                interrupted: false,
                merged: true,
            });
        }

        let executor = StageExecutor::new(stage, workers, Arc::clone(&self.cancel));
        let pending = std::mem::take(&mut state.pending);
        let outcome = executor
            .run(pending, &mut state.records, log, processor)
            .await;

        if outcome.interrupted {
            warn!(
                stage = %stage,
                completed = outcome.completed,
                log = %log.path().display(),
                "stage interrupted; completed results are in the stage log; re-run to resume"
            );
            return Ok(StageOutcome {
                stage,
                completed: outcome.completed,
                interrupted: true,
                merged: false,
            });
        }

        self.merge_or_keep(stage, &state.records, log)?;
        Ok(StageOutcome {
            stage,
            completed: outcome.completed,
            interrupted: false,
            merged: true,
        })
    }

    fn merge_or_keep(
        &self,
        stage: Stage,
        records: &HashMap<String, Record>,
        log: &StageLog,
    ) -> Result<(), StorageError> {
        merge_stage_log(records, &self.config.output_file, log).map_err(|merge_error| {
            error!(
                stage = %stage,
                log = %log.path().display(),
                error = %merge_error,
                "merge failed; stage log retained for the next run"
            );
            merge_error
        })
    }
}

fn runner_for<'a>(
    runners: &'a HashMap<String, Arc<TaskRunner>>,
    record: &Record,
) -> Result<&'a Arc<TaskRunner>, TaskError> {
    let task_path = record.task_path().ok_or_else(|| TaskError::MissingField {
        sample_id: record.sample_id.clone(),
        field: "task_config.task_path",
    })?;
    runners
        .get(task_path)
        .ok_or_else(|| TaskError::RunnerNotFound(task_path.to_string()))
}

/// Infer-stage processor: one external model call per record.
struct InferProcessor {
    runners: Arc<HashMap<String, Arc<TaskRunner>>>,
}

#[async_trait]
impl ItemProcessor for InferProcessor {
    async fn process(&self, record: &Record) -> Result<Record, TaskError> {
        let runner = runner_for(&self.runners, record)?;
        let answer = runner.process_answer(record).await?;
        let mut updated = record.clone();
        updated.answer = Some(answer);
        Ok(updated)
    }
}

/// Evaluate-stage processor: scores an already-answered record.
struct EvalProcessor {
    runners: Arc<HashMap<String, Arc<TaskRunner>>>,
}

#[async_trait]
impl ItemProcessor for EvalProcessor {
    async fn process(&self, record: &Record) -> Result<Record, TaskError> {
        let runner = runner_for(&self.runners, record)?;
        let answer = record
            .answer
            .clone()
            .ok_or_else(|| TaskError::MissingAnswer(record.sample_id.clone()))?;
        let results = runner.evaluate(&answer, record).await?;
        let mut updated = record.clone();
        updated.evaluation_results = Some(results);
        Ok(updated)
    }
}
