//! YAML configuration files for the CLI.
//!
//! Three files mirror the three concerns handed to the pipeline:
//! - the global config selects task paths and sets worker/retry policy,
//! - the model config names the backend, model and sampling parameters,
//! - the task config holds per-task-type default argument tables.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::model::SamplingParams;
use crate::pipeline::config::{ConfigError, DEFAULT_EVAL_WORKERS, DEFAULT_INFER_WORKERS};
use crate::task::TaskSpec;

/// One selected task path with optional argument overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct SelectedTask {
    pub task_path: String,
    #[serde(default)]
    pub args: Value,
}

/// Per-stage worker counts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThreadingConfig {
    pub inference_workers: usize,
    pub evaluation_workers: usize,
}

impl Default for ThreadingConfig {
    fn default() -> Self {
        Self {
            inference_workers: DEFAULT_INFER_WORKERS,
            evaluation_workers: DEFAULT_EVAL_WORKERS,
        }
    }
}

/// Per-stage retry policy for error-marked records.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub retry_infer_errors: bool,
    pub retry_eval_errors: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_infer_errors: true,
            retry_eval_errors: false,
        }
    }
}

/// The global pipeline configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub selected_tasks: Vec<SelectedTask>,
    #[serde(default)]
    pub threading_config: ThreadingConfig,
    #[serde(default)]
    pub retry_config: RetryConfig,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./results")
}

/// The model configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    pub model: String,
    /// API base URL; falls back to the environment when absent.
    #[serde(default)]
    pub api_base: Option<String>,
    /// Name of the environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub params: SamplingParams,
}

fn default_backend() -> String {
    "openai".to_string()
}

/// Per-task-type default argument tables, keyed by task type name.
pub type TaskConfigFile = HashMap<String, Value>;

/// Loads and deserializes one YAML configuration file.
pub fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let contents = fs::read_to_string(path)
        .map_err(|e| ConfigError::Missing(format!("{}: {e}", path.display())))?;
    Ok(serde_yaml::from_str(&contents)?)
}

/// Resolves selected task paths against the per-type argument tables.
///
/// For each selection, the task type's default arguments are overlaid with
/// the selection-specific ones (selection wins), and `sample_num` is read
/// from the merged arguments.
pub fn resolve_task_specs(global: &GlobalConfig, tasks: &TaskConfigFile) -> Vec<TaskSpec> {
    global
        .selected_tasks
        .iter()
        .map(|selected| {
            let spec = TaskSpec::new(&selected.task_path);
            let defaults = tasks.get(&spec.task_name).cloned().unwrap_or(Value::Null);
            let args = merge_objects(defaults, selected.args.clone());
            let sample_num = args
                .get("sample_num")
                .and_then(Value::as_u64)
                .unwrap_or(1) as usize;
            spec.with_sample_num(sample_num).with_args(args)
        })
        .collect()
}

/// Shallow object merge; `overlay` keys win, non-objects pass through.
fn merge_objects(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                base.insert(key, value);
            }
            Value::Object(base)
        }
        (base, Value::Null) => base,
        (Value::Null, overlay) => overlay,
        (_, overlay) => overlay,
    }
}
