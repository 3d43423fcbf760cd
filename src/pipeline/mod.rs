//! The pipeline engine: resumable staged execution with crash recovery.
//!
//! Control flow for each log-backed stage:
//! loader -> executor (parallel workers, each checkpointing to the stage
//! log) -> merge engine -> next stage's loader. The metrics aggregator runs
//! only after every stage has merged cleanly.

pub mod config;
pub mod executor;
pub mod loader;
pub mod merge;
pub mod orchestrator;

pub use config::{ConfigError, PipelineConfig};
pub use executor::{ExecutorOutcome, ItemProcessor, StageExecutor};
pub use loader::{load_stage_state, StageState};
pub use merge::merge_stage_log;
pub use orchestrator::{Pipeline, StageOutcome};
