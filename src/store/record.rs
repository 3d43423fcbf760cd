//! The record data model and per-stage validity rules.
//!
//! A [`Record`] is the unit of work threaded through the generate, infer,
//! evaluate and analyze stages. Records are keyed by `sample_id`; the store
//! and the stage logs each hold one serialized record per line, and a later
//! line for the same key always supersedes an earlier one.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Prefix marking a failed attempt in `prompt` and `answer` fields.
pub const ERROR_PREFIX: &str = "ERROR:";

/// Prompt value written when prompt generation fails.
pub const PROMPT_FAILED: &str = "ERROR: Prompt generation failed";

/// One unit of work, carried end-to-end through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Stable, globally unique key; immutable once assigned.
    pub sample_id: String,
    /// Written by the generate stage; read-only afterwards.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Generation metadata (targets, seeds); read-only after generate.
    #[serde(default)]
    pub metadata: Option<Value>,
    /// Written by the infer stage. An `"ERROR:"`-prefixed value marks a
    /// failed attempt, not a successful empty answer.
    #[serde(default)]
    pub answer: Option<String>,
    /// Written by the evaluate stage. An object with an `"error"` key marks
    /// a failed attempt, distinct from a missing result.
    #[serde(default)]
    pub evaluation_results: Option<Value>,
    /// Slash-delimited hierarchy path; the first segment is the namespace.
    pub task: String,
    /// Resolved task configuration, carried unchanged from generation.
    #[serde(default)]
    pub task_config: Value,
    /// Sampling parameters, carried unchanged from generation.
    #[serde(default)]
    pub eval_args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inference_duration_sec: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_duration_sec: Option<f64>,
}

impl Record {
    /// Creates a blank record for the given sample and task path.
    pub fn new(sample_id: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            sample_id: sample_id.into(),
            prompt: None,
            metadata: None,
            answer: None,
            evaluation_results: None,
            task: task.into(),
            task_config: Value::Null,
            eval_args: Value::Null,
            inference_duration_sec: None,
            evaluation_duration_sec: None,
        }
    }

    /// True iff the answer is present, non-empty and not error-marked.
    pub fn has_valid_answer(&self) -> bool {
        matches!(&self.answer, Some(a) if !a.is_empty() && !a.starts_with(ERROR_PREFIX))
    }

    /// True iff the answer records a failed inference attempt.
    pub fn answer_is_error(&self) -> bool {
        matches!(&self.answer, Some(a) if a.starts_with(ERROR_PREFIX))
    }

    /// True iff the evaluation results are an object with no `"error"` key.
    pub fn has_valid_evaluation(&self) -> bool {
        matches!(&self.evaluation_results, Some(Value::Object(m)) if !m.contains_key("error"))
    }

    /// True iff the evaluation results record a failed attempt.
    pub fn evaluation_is_error(&self) -> bool {
        matches!(&self.evaluation_results, Some(Value::Object(m)) if m.contains_key("error"))
    }

    /// True iff prompt generation failed for this record.
    pub fn prompt_failed(&self) -> bool {
        matches!(&self.prompt, Some(p) if p.starts_with(ERROR_PREFIX))
    }

    /// The resolved task path from the carried task configuration.
    pub fn task_path(&self) -> Option<&str> {
        self.task_config.get("task_path").and_then(Value::as_str)
    }
}

/// The two log-backed processing stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Infer,
    Evaluate,
}

impl Stage {
    /// Short stage name used in logs and summaries.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Infer => "infer",
            Stage::Evaluate => "evaluate",
        }
    }

    /// Suffix appended to the store path to form the stage log path.
    pub fn log_suffix(self) -> &'static str {
        match self {
            Stage::Infer => ".infer.log",
            Stage::Evaluate => ".eval.log",
        }
    }

    /// Stage log path for the given record store path.
    pub fn log_path(self, store_path: &Path) -> PathBuf {
        let mut path = store_path.as_os_str().to_owned();
        path.push(self.log_suffix());
        PathBuf::from(path)
    }

    /// True iff the record is validly done for this stage.
    pub fn is_done(self, record: &Record) -> bool {
        match self {
            Stage::Infer => record.has_valid_answer(),
            Stage::Evaluate => record.has_valid_evaluation(),
        }
    }

    /// True iff the record carries an error marker for this stage.
    pub fn is_error(self, record: &Record) -> bool {
        match self {
            Stage::Infer => record.answer_is_error(),
            Stage::Evaluate => record.evaluation_is_error(),
        }
    }

    /// Writes this stage's structured error value into the record.
    pub fn record_failure(self, record: &mut Record, message: &str) {
        match self {
            Stage::Infer => {
                record.answer = Some(format!("{ERROR_PREFIX} {message}"));
            }
            Stage::Evaluate => {
                record.evaluation_results = Some(json!({ "error": message }));
            }
        }
    }

    /// Writes this stage's duration field into the record.
    pub fn record_duration(self, record: &mut Record, seconds: f64) {
        match self {
            Stage::Infer => record.inference_duration_sec = Some(seconds),
            Stage::Evaluate => record.evaluation_duration_sec = Some(seconds),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_validity() {
        let mut record = Record::new("s1", "ns/a");
        assert!(!record.has_valid_answer());
        assert!(!record.answer_is_error());

        record.answer = Some(String::new());
        assert!(!record.has_valid_answer());
        assert!(!record.answer_is_error());

        record.answer = Some("ERROR: API call failed".to_string());
        assert!(!record.has_valid_answer());
        assert!(record.answer_is_error());

        record.answer = Some("42".to_string());
        assert!(record.has_valid_answer());
        assert!(!record.answer_is_error());
    }

    #[test]
    fn test_evaluation_validity() {
        let mut record = Record::new("s1", "ns/a");
        assert!(!record.has_valid_evaluation());

        record.evaluation_results = Some(json!({ "error": "boom" }));
        assert!(!record.has_valid_evaluation());
        assert!(record.evaluation_is_error());

        record.evaluation_results = Some(json!({ "score": 0.5 }));
        assert!(record.has_valid_evaluation());
        assert!(!record.evaluation_is_error());

        // A non-object evaluation result is never valid.
        record.evaluation_results = Some(json!("done"));
        assert!(!record.has_valid_evaluation());
    }

    #[test]
    fn test_prompt_failed() {
        let mut record = Record::new("s1", "ns/a");
        assert!(!record.prompt_failed());

        record.prompt = Some(PROMPT_FAILED.to_string());
        assert!(record.prompt_failed());

        record.prompt = Some("What is 2+2?".to_string());
        assert!(!record.prompt_failed());
    }

    #[test]
    fn test_stage_log_path() {
        let store = Path::new("/results/qwen/qwen.jsonl");
        assert_eq!(
            Stage::Infer.log_path(store),
            PathBuf::from("/results/qwen/qwen.jsonl.infer.log")
        );
        assert_eq!(
            Stage::Evaluate.log_path(store),
            PathBuf::from("/results/qwen/qwen.jsonl.eval.log")
        );
    }

    #[test]
    fn test_stage_failure_values() {
        let mut record = Record::new("s1", "ns/a");
        Stage::Infer.record_failure(&mut record, "model call failed: timeout");
        assert!(record.answer.as_deref().unwrap().starts_with(ERROR_PREFIX));
        assert!(record.answer_is_error());

        Stage::Evaluate.record_failure(&mut record, "judge unavailable");
        assert!(record.evaluation_is_error());
        assert_eq!(
            record.evaluation_results.unwrap()["error"],
            json!("judge unavailable")
        );
    }

    #[test]
    fn test_stage_durations() {
        let mut record = Record::new("s1", "ns/a");
        Stage::Infer.record_duration(&mut record, 1.5);
        Stage::Evaluate.record_duration(&mut record, 0.25);
        assert_eq!(record.inference_duration_sec, Some(1.5));
        assert_eq!(record.evaluation_duration_sec, Some(0.25));
    }

    #[test]
    fn test_record_roundtrip() {
        let mut record = Record::new("kv_dictionary/small_0", "evalforge/kv_dictionary/small");
        record.prompt = Some("fill the dictionary".to_string());
        record.task_config = json!({ "task_path": "kv_dictionary/small" });

        let line = serde_json::to_string(&record).unwrap();
        let parsed: Record = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.sample_id, record.sample_id);
        assert_eq!(parsed.task_path(), Some("kv_dictionary/small"));
        // Unset durations are omitted from the serialized form.
        assert!(!line.contains("inference_duration_sec"));
    }
}
