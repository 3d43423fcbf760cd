//! Explicit task-type registry.
//!
//! Maps a task type name to its constructor and the metric names it emits.
//! The registry is populated once at process start and read-only afterwards;
//! it is passed by reference into the pipeline and the metrics aggregator
//! rather than living in global mutable state.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::TaskError;
use crate::task::Task;

/// Constructor for a task type, taking its resolved argument object.
pub type TaskConstructor = fn(&Value) -> Result<Box<dyn Task>, TaskError>;

struct RegistryEntry {
    constructor: TaskConstructor,
    metrics: Vec<String>,
}

/// Registration table mapping task type name to constructor and metrics.
#[derive(Default)]
pub struct TaskRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl TaskRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task type with the metric names it reports.
    ///
    /// # Errors
    ///
    /// Returns `TaskError::Duplicate` if the name is already registered.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        metrics: Vec<String>,
        constructor: TaskConstructor,
    ) -> Result<(), TaskError> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(TaskError::Duplicate(name));
        }
        self.entries.insert(
            name,
            RegistryEntry {
                constructor,
                metrics,
            },
        );
        Ok(())
    }

    /// Instantiates a task of the given type.
    ///
    /// # Errors
    ///
    /// Returns `TaskError::NotFound` for an unregistered name, or whatever
    /// the constructor returns for invalid arguments.
    pub fn create(&self, name: &str, args: &Value) -> Result<Box<dyn Task>, TaskError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| TaskError::NotFound(name.to_string()))?;
        (entry.constructor)(args)
    }

    /// The metric names registered for a task type, if any.
    pub fn registered_metrics(&self, name: &str) -> Option<&[String]> {
        self.entries.get(name).map(|e| e.metrics.as_slice())
    }

    /// Whether a task type is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered task type names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered task types.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builds the registry of task types shipped with this crate.
pub fn builtin_registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    registry
        .register(
            crate::task::builtin::KV_DICTIONARY,
            crate::task::builtin::KvDictionaryTask::metric_names(),
            crate::task::builtin::KvDictionaryTask::construct,
        )
        .expect("builtin registry has no duplicates");
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    use crate::store::Record;

    struct NoopTask;

    #[async_trait]
    impl Task for NoopTask {
        fn name(&self) -> &str {
            "noop"
        }

        fn generate_prompt(&self, _record: &Record) -> Result<(String, Value), TaskError> {
            Ok(("noop".to_string(), Value::Null))
        }

        async fn evaluate(&self, _answer: &str, _record: &Record) -> Result<Value, TaskError> {
            Ok(json!({ "score": 1.0 }))
        }
    }

    fn construct_noop(_args: &Value) -> Result<Box<dyn Task>, TaskError> {
        Ok(Box::new(NoopTask))
    }

    #[test]
    fn test_register_and_create() {
        let mut registry = TaskRegistry::new();
        registry
            .register("noop", vec!["score".to_string()], construct_noop)
            .unwrap();

        let task = registry.create("noop", &Value::Null).unwrap();
        assert_eq!(task.name(), "noop");
        assert_eq!(
            registry.registered_metrics("noop"),
            Some(&["score".to_string()][..])
        );
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = TaskRegistry::new();
        registry.register("noop", vec![], construct_noop).unwrap();
        let result = registry.register("noop", vec![], construct_noop);
        assert!(matches!(result, Err(TaskError::Duplicate(name)) if name == "noop"));
    }

    #[test]
    fn test_unknown_task_fails() {
        let registry = TaskRegistry::new();
        let result = registry.create("missing", &Value::Null);
        assert!(matches!(result, Err(TaskError::NotFound(name)) if name == "missing"));
        assert!(registry.registered_metrics("missing").is_none());
    }

    #[test]
    fn test_builtin_registry() {
        let registry = builtin_registry();
        assert!(registry.contains("kv_dictionary"));
        assert!(!registry.is_empty());
        let metrics = registry.registered_metrics("kv_dictionary").unwrap();
        assert!(metrics.contains(&"position_score".to_string()));
    }
}
