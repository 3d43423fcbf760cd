//! Task runner: binds a task instance to a model backend.
//!
//! One runner exists per selected task path. The pipeline routes each record
//! to its runner via the `task_path` carried in the record's configuration.

use std::sync::Arc;

use serde_json::Value;

use crate::error::TaskError;
use crate::model::{ModelClient, SamplingParams};
use crate::store::Record;
use crate::task::{Task, TaskRegistry, TaskSpec};

/// Executes the three per-item operations for one task path.
pub struct TaskRunner {
    task: Box<dyn Task>,
    model: Arc<dyn ModelClient>,
}

impl TaskRunner {
    /// Creates a runner from an already-constructed task.
    pub fn new(task: Box<dyn Task>, model: Arc<dyn ModelClient>) -> Self {
        Self { task, model }
    }

    /// Creates a runner by instantiating the selected task type from the
    /// registry.
    pub fn from_registry(
        registry: &TaskRegistry,
        spec: &TaskSpec,
        model: Arc<dyn ModelClient>,
    ) -> Result<Self, TaskError> {
        let task = registry.create(&spec.task_name, &spec.args)?;
        Ok(Self::new(task, model))
    }

    /// The underlying task type name.
    pub fn task_name(&self) -> &str {
        self.task.name()
    }

    /// Builds the prompt and metadata for a freshly generated record.
    pub fn generate_prompt(&self, record: &Record) -> Result<(String, Value), TaskError> {
        self.task.generate_prompt(record)
    }

    /// Runs the external model call for the infer stage.
    pub async fn process_answer(&self, record: &Record) -> Result<String, TaskError> {
        let prompt = record
            .prompt
            .as_deref()
            .ok_or_else(|| TaskError::MissingPrompt(record.sample_id.clone()))?;
        let params = sampling_params(&record.eval_args, &record.sample_id)?;
        let answer = self.model.complete(prompt, &params).await?;
        Ok(answer)
    }

    /// Scores an answer for the evaluate stage.
    pub async fn evaluate(&self, answer: &str, record: &Record) -> Result<Value, TaskError> {
        self.task.evaluate(answer, record).await
    }
}

fn sampling_params(eval_args: &Value, sample_id: &str) -> Result<SamplingParams, TaskError> {
    if eval_args.is_null() {
        return Ok(SamplingParams::default());
    }
    serde_json::from_value(eval_args.clone()).map_err(|e| {
        TaskError::InvalidConfig(format!("bad eval_args for record '{sample_id}': {e}"))
    })
}
