//! Hierarchical metrics aggregation over the merged record store.
//!
//! Walks the final record store and produces averaged metrics at every
//! level of the slash-delimited task hierarchy: for a task path `ns/a/b/c`
//! the namespace segment is dropped and the record contributes to `a`,
//! `a/b` and `a/b/c`. Which metric names are collected for a task type
//! comes from the registry; the aggregator itself is metric-agnostic.
//!
//! Timing fields are infrastructure telemetry and are aggregated for every
//! record, whether or not its evaluation is valid; task metrics only come
//! from validly-evaluated records.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::StorageError;
use crate::store::{jsonl, Record};
use crate::task::TaskRegistry;

/// Metric names under which the per-stage durations are aggregated.
const TIMING_METRICS: [&str; 2] = ["inference_duration_sec", "evaluation_duration_sec"];

/// Averaged value of one metric at one hierarchy level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub average: f64,
    pub samples: u64,
}

/// Final report shape: hierarchy path -> metric name -> summary.
pub type MetricReport = BTreeMap<String, BTreeMap<String, MetricSummary>>;

#[derive(Default)]
struct Accumulator {
    sum: f64,
    count: u64,
}

impl Accumulator {
    fn record(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn summary(&self) -> MetricSummary {
        MetricSummary {
            average: round4(self.sum / self.count as f64),
            samples: self.count,
        }
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Streams the record store and aggregates hierarchical metrics.
pub fn aggregate_store(
    store_path: &Path,
    registry: &TaskRegistry,
) -> Result<MetricReport, StorageError> {
    let records = jsonl::load_records(store_path)?;
    info!(
        path = %store_path.display(),
        records = records.len(),
        "aggregating hierarchical metrics"
    );
    Ok(aggregate_records(&records, registry))
}

/// Aggregates an in-memory record set.
pub fn aggregate_records(records: &[Record], registry: &TaskRegistry) -> MetricReport {
    let mut stats: BTreeMap<String, BTreeMap<String, Accumulator>> = BTreeMap::new();
    let mut analyzed = 0usize;

    for record in records {
        let segments: Vec<&str> = record
            .task
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        // First segment is the namespace; a record needs at least one
        // segment below it to land anywhere in the hierarchy.
        if segments.len() < 2 {
            continue;
        }
        let path = &segments[1..];
        let task_name = path[0];

        let metric_values = valid_metric_values(record, registry, task_name);
        if metric_values.is_some() {
            analyzed += 1;
        }

        for depth in 1..=path.len() {
            let hierarchy = path[..depth].join("/");
            let level = stats.entry(hierarchy).or_default();

            if let Some(values) = &metric_values {
                for (metric, value) in values {
                    level.entry((*metric).clone()).or_default().record(*value);
                }
            }
            for (name, duration) in [
                (TIMING_METRICS[0], record.inference_duration_sec),
                (TIMING_METRICS[1], record.evaluation_duration_sec),
            ] {
                if let Some(seconds) = duration {
                    level.entry(name.to_string()).or_default().record(seconds);
                }
            }
        }
    }

    info!(analyzed, "records with valid evaluations analyzed");

    stats
        .into_iter()
        .map(|(hierarchy, metrics)| {
            let summaries = metrics
                .into_iter()
                .map(|(name, acc)| (name, acc.summary()))
                .collect();
            (hierarchy, summaries)
        })
        .collect()
}

/// Numeric values of the registered metrics, for validly-evaluated records
/// of a registered task type.
fn valid_metric_values(
    record: &Record,
    registry: &TaskRegistry,
    task_name: &str,
) -> Option<Vec<(String, f64)>> {
    if !record.has_valid_evaluation() {
        return None;
    }
    let metrics = registry.registered_metrics(task_name)?;
    let results = record.evaluation_results.as_ref()?.as_object()?;
    Some(
        metrics
            .iter()
            .filter_map(|metric| {
                results
                    .get(metric)
                    .and_then(Value::as_f64)
                    .map(|value| (metric.clone(), value))
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::error::TaskError;
    use crate::task::Task;
    use async_trait::async_trait;

    struct ScoredTask;

    #[async_trait]
    impl Task for ScoredTask {
        fn name(&self) -> &str {
            "a"
        }

        fn generate_prompt(&self, _record: &Record) -> Result<(String, Value), TaskError> {
            Ok((String::new(), Value::Null))
        }

        async fn evaluate(&self, _answer: &str, _record: &Record) -> Result<Value, TaskError> {
            Ok(json!({}))
        }
    }

    fn construct(_args: &Value) -> Result<Box<dyn Task>, TaskError> {
        Ok(Box::new(ScoredTask))
    }

    fn registry_with(name: &str, metrics: &[&str]) -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        registry
            .register(name, metrics.iter().map(|m| m.to_string()).collect(), construct)
            .unwrap();
        registry
    }

    fn evaluated(id: &str, task: &str, score: f64) -> Record {
        let mut record = Record::new(id, task);
        record.evaluation_results = Some(json!({ "score": score }));
        record
    }

    #[test]
    fn test_hierarchy_averaging() {
        let registry = registry_with("a", &["score"]);
        let records = vec![
            evaluated("s0", "ns/a/b", 0.8),
            evaluated("s1", "ns/a/c", 0.4),
        ];

        let report = aggregate_records(&records, &registry);

        assert_eq!(report["a"]["score"], MetricSummary { average: 0.6, samples: 2 });
        assert_eq!(report["a/b"]["score"], MetricSummary { average: 0.8, samples: 1 });
        assert_eq!(report["a/c"]["score"], MetricSummary { average: 0.4, samples: 1 });
    }

    #[test]
    fn test_invalid_evaluations_excluded_from_metrics() {
        let registry = registry_with("a", &["score"]);
        let mut errored = Record::new("s1", "ns/a/b");
        errored.evaluation_results = Some(json!({ "error": "boom" }));
        let records = vec![evaluated("s0", "ns/a/b", 1.0), errored];

        let report = aggregate_records(&records, &registry);
        assert_eq!(report["a/b"]["score"].samples, 1);
    }

    #[test]
    fn test_timing_aggregated_regardless_of_validity() {
        let registry = registry_with("a", &["score"]);
        let mut errored = Record::new("s1", "ns/a/b");
        errored.evaluation_results = Some(json!({ "error": "boom" }));
        errored.inference_duration_sec = Some(3.0);

        let mut scored = evaluated("s0", "ns/a/b", 1.0);
        scored.inference_duration_sec = Some(1.0);

        let report = aggregate_records(&[scored, errored], &registry);
        let timing = &report["a/b"]["inference_duration_sec"];
        assert_eq!(timing.samples, 2);
        assert_eq!(timing.average, 2.0);
    }

    #[test]
    fn test_unregistered_task_contributes_timing_only() {
        let registry = registry_with("a", &["score"]);
        let mut record = evaluated("s0", "ns/other/x", 0.9);
        record.evaluation_duration_sec = Some(0.5);

        let report = aggregate_records(&[record], &registry);
        let level = &report["other/x"];
        assert!(!level.contains_key("score"));
        assert_eq!(level["evaluation_duration_sec"].samples, 1);
    }

    #[test]
    fn test_records_without_hierarchy_skipped() {
        let registry = registry_with("a", &["score"]);
        let records = vec![evaluated("s0", "ns", 1.0), evaluated("s1", "", 1.0)];
        let report = aggregate_records(&records, &registry);
        assert!(report.is_empty());
    }

    #[test]
    fn test_non_numeric_metric_values_skipped() {
        let registry = registry_with("a", &["score", "label"]);
        let mut record = Record::new("s0", "ns/a");
        record.evaluation_results = Some(json!({ "score": 0.5, "label": "good" }));

        let report = aggregate_records(&[record], &registry);
        let level = &report["a"];
        assert_eq!(level["score"].samples, 1);
        assert!(!level.contains_key("label"));
    }

    #[test]
    fn test_average_rounded_to_four_decimals() {
        let registry = registry_with("a", &["score"]);
        let records = vec![
            evaluated("s0", "ns/a", 1.0),
            evaluated("s1", "ns/a", 0.0),
            evaluated("s2", "ns/a", 0.0),
        ];
        let report = aggregate_records(&records, &registry);
        assert_eq!(report["a"]["score"].average, 0.3333);
    }
}
