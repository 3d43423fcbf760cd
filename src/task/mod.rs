//! Task abstraction: the per-item work the pipeline drives.
//!
//! A [`Task`] knows how to build a prompt for a sample and how to score a
//! model answer. Task types are registered by name in an explicit
//! [`TaskRegistry`] built once at startup; a [`TaskRunner`] binds a task
//! instance to a model backend for the infer stage.

pub mod builtin;
pub mod registry;
pub mod runner;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TaskError;
use crate::store::Record;

pub use registry::{builtin_registry, TaskRegistry};
pub use runner::TaskRunner;

/// A task type: prompt construction and answer scoring for one benchmark.
///
/// Implementations must be deterministic in `generate_prompt` for a given
/// `sample_id` so that re-running the generate stage reproduces the same
/// prompts. `evaluate` may call out to a judge model and is therefore async.
#[async_trait]
pub trait Task: Send + Sync {
    /// The task type name as registered.
    fn name(&self) -> &str;

    /// Builds the prompt and generation metadata for a sample.
    fn generate_prompt(&self, record: &Record) -> Result<(String, Value), TaskError>;

    /// Scores a model answer, returning a JSON object of metric values.
    async fn evaluate(&self, answer: &str, record: &Record) -> Result<Value, TaskError>;
}

/// Resolved configuration for one selected task path.
///
/// Carried verbatim in every record's `task_config` field so that a resumed
/// run can route records back to the right runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Full task path, e.g. `"kv_dictionary/small"`.
    pub task_path: String,
    /// Task type name (the first path segment), used for registry lookup.
    pub task_name: String,
    /// How many samples to generate for this path.
    #[serde(default = "default_sample_num")]
    pub sample_num: usize,
    /// Arguments handed to the task constructor.
    #[serde(default)]
    pub args: Value,
}

fn default_sample_num() -> usize {
    1
}

impl TaskSpec {
    /// Creates a spec for a task path, deriving the task name from its
    /// first segment.
    pub fn new(task_path: impl Into<String>) -> Self {
        let task_path = task_path.into();
        let task_name = task_path
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            task_path,
            task_name,
            sample_num: 1,
            args: Value::Null,
        }
    }

    /// Sets the number of samples.
    pub fn with_sample_num(mut self, sample_num: usize) -> Self {
        self.sample_num = sample_num;
        self
    }

    /// Sets the constructor arguments.
    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    /// The stable sample id for the given index under this path.
    pub fn sample_id(&self, index: usize) -> String {
        format!("{}_{}", self.task_path, index)
    }
}
