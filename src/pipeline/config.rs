//! Pipeline configuration.
//!
//! Holds the record store location, per-stage worker counts, and the
//! per-stage retry policy. The retry flags are part of the documented
//! contract: inference errors are retried on the next invocation by
//! default, evaluation errors are not.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::model::SamplingParams;

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("missing configuration value: {0}")]
    Missing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Default worker count for the infer stage (I/O-bound on a remote API).
pub const DEFAULT_INFER_WORKERS: usize = 8;
/// Default worker count for the evaluate stage (may call a judge model).
pub const DEFAULT_EVAL_WORKERS: usize = 4;
/// Default namespace prefixed to every generated task path.
pub const DEFAULT_NAMESPACE: &str = "evalforge";

/// Configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Record store path; stage logs and the report derive from it.
    pub output_file: PathBuf,
    /// Model identifier, used in the report filename.
    pub model: String,
    /// Sampling parameters stamped into each record's `eval_args`.
    pub sampling: SamplingParams,
    /// Worker pool size for the infer stage.
    pub infer_workers: usize,
    /// Worker pool size for the evaluate stage.
    pub eval_workers: usize,
    /// Re-queue records whose answer is error-marked.
    pub retry_infer_errors: bool,
    /// Re-queue records whose evaluation is error-marked.
    pub retry_eval_errors: bool,
    /// Leading segment of every generated record's `task` path.
    pub namespace: String,
}

impl PipelineConfig {
    /// Creates a configuration with default worker counts and retry policy.
    pub fn new(output_file: impl Into<PathBuf>, model: impl Into<String>) -> Self {
        Self {
            output_file: output_file.into(),
            model: model.into(),
            sampling: SamplingParams::default(),
            infer_workers: DEFAULT_INFER_WORKERS,
            eval_workers: DEFAULT_EVAL_WORKERS,
            retry_infer_errors: true,
            retry_eval_errors: false,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    /// Sets the sampling parameters.
    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    /// Sets the infer worker count.
    pub fn with_infer_workers(mut self, workers: usize) -> Self {
        self.infer_workers = workers;
        self
    }

    /// Sets the evaluate worker count.
    pub fn with_eval_workers(mut self, workers: usize) -> Self {
        self.eval_workers = workers;
        self
    }

    /// Sets whether error-marked answers are retried.
    pub fn with_retry_infer_errors(mut self, retry: bool) -> Self {
        self.retry_infer_errors = retry;
        self
    }

    /// Sets whether error-marked evaluations are retried.
    pub fn with_retry_eval_errors(mut self, retry: bool) -> Self {
        self.retry_eval_errors = retry;
        self
    }

    /// Sets the task namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output_file.file_name().is_none() {
            return Err(ConfigError::ValidationFailed(
                "output_file must name a file".to_string(),
            ));
        }
        if self.model.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "model cannot be empty".to_string(),
            ));
        }
        if self.infer_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "infer_workers must be greater than 0".to_string(),
            ));
        }
        if self.eval_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "eval_workers must be greater than 0".to_string(),
            ));
        }
        if self.namespace.is_empty() || self.namespace.contains('/') {
            return Err(ConfigError::ValidationFailed(
                "namespace must be a single non-empty path segment".to_string(),
            ));
        }
        Ok(())
    }

    /// The metric report path: `<store_dir>/<model>_metric_report.json`.
    pub fn report_path(&self) -> PathBuf {
        let dir = self
            .output_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        dir.join(format!("{}_metric_report.json", sanitize_model(&self.model)))
    }
}

/// Makes a model identifier safe to use as a filename component.
pub fn sanitize_model(model: &str) -> String {
    model
        .chars()
        .map(|c| if c == '/' || c == ':' { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::new("results/m/m.jsonl", "test-model");
        assert_eq!(config.infer_workers, DEFAULT_INFER_WORKERS);
        assert_eq!(config.eval_workers, DEFAULT_EVAL_WORKERS);
        assert!(config.retry_infer_errors);
        assert!(!config.retry_eval_errors);
        assert_eq!(config.namespace, DEFAULT_NAMESPACE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let config = PipelineConfig::new("out.jsonl", "m")
            .with_infer_workers(2)
            .with_eval_workers(1)
            .with_retry_infer_errors(false)
            .with_retry_eval_errors(true)
            .with_namespace("bench");
        assert_eq!(config.infer_workers, 2);
        assert_eq!(config.eval_workers, 1);
        assert!(!config.retry_infer_errors);
        assert!(config.retry_eval_errors);
        assert_eq!(config.namespace, "bench");
    }

    #[test]
    fn test_validation_failures() {
        let config = PipelineConfig::new("out.jsonl", "");
        assert!(config.validate().is_err());

        let config = PipelineConfig::new("out.jsonl", "m").with_infer_workers(0);
        assert!(config.validate().is_err());

        let config = PipelineConfig::new("out.jsonl", "m").with_eval_workers(0);
        assert!(config.validate().is_err());

        let config = PipelineConfig::new("out.jsonl", "m").with_namespace("a/b");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_report_path() {
        let config = PipelineConfig::new("/results/qwen/qwen.jsonl", "org/qwen:free");
        assert_eq!(
            config.report_path(),
            PathBuf::from("/results/qwen/org_qwen_free_metric_report.json")
        );

        let config = PipelineConfig::new("out.jsonl", "m");
        assert_eq!(config.report_path(), PathBuf::from("./m_metric_report.json"));
    }
}
