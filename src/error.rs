//! Error types for eval-forge subsystems.
//!
//! Defines error types for the major subsystems:
//! - Record store and stage log I/O
//! - Task registry and task execution
//! - Model backend interactions

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading or writing the record store,
/// stage logs, or reports.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to persist rewritten file '{}': {message}", .path.display())]
    Persist { path: PathBuf, message: String },

    #[error("record store '{}' not found", .0.display())]
    MissingStore(PathBuf),

    #[error("no input records found for '{}'", .0.display())]
    NoInput(PathBuf),

    #[error("stage log '{}' still present; merge pending stages before analysis", .0.display())]
    PendingStageLog(PathBuf),
}

/// Errors that can occur during task registry operations and per-item
/// task execution.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task type '{0}' not registered")]
    NotFound(String),

    #[error("task type '{0}' already registered")]
    Duplicate(String),

    #[error("no runner available for task path '{0}'")]
    RunnerNotFound(String),

    #[error("invalid task configuration: {0}")]
    InvalidConfig(String),

    #[error("record '{0}' has no prompt")]
    MissingPrompt(String),

    #[error("record '{0}' has no answer to evaluate")]
    MissingAnswer(String),

    #[error("record '{sample_id}' is missing field '{field}'")]
    MissingField {
        sample_id: String,
        field: &'static str,
    },

    #[error("prompt generation failed: {0}")]
    PromptGeneration(String),

    #[error("evaluation failed: {0}")]
    Evaluation(String),

    #[error("model call failed: {0}")]
    Model(#[from] ModelError),
}

/// Errors that can occur while calling a model backend.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("missing API base URL: set api_base in the model config or {0}")]
    MissingApiBase(&'static str),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("model returned no choices")]
    EmptyResponse,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::MissingStore(PathBuf::from("/tmp/results.jsonl"));
        assert!(err.to_string().contains("/tmp/results.jsonl"));

        let err = StorageError::NoInput(PathBuf::from("out.jsonl"));
        assert!(err.to_string().contains("no input records"));

        let err = StorageError::PendingStageLog(PathBuf::from("out.jsonl.infer.log"));
        assert!(err.to_string().contains("infer.log"));
    }

    #[test]
    fn test_task_error_display() {
        let err = TaskError::NotFound("kv_dictionary".to_string());
        assert!(err.to_string().contains("kv_dictionary"));

        let err = TaskError::MissingField {
            sample_id: "s1".to_string(),
            field: "task_config.task_path",
        };
        assert!(err.to_string().contains("s1"));
        assert!(err.to_string().contains("task_config.task_path"));
    }

    #[test]
    fn test_model_error_conversion() {
        let err: TaskError = ModelError::EmptyResponse.into();
        assert!(err.to_string().contains("model call failed"));
    }
}
