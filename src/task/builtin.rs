//! Built-in task types.
//!
//! Ships one task so the binary is usable without external task crates:
//! `kv_dictionary`, a long-context placement probe. Each sample asks the
//! model to produce a list of key/value pairs of a given size with one
//! specific pair at one specific position; scoring checks that the pair
//! exists, sits where requested, and that the list has the right size.

use rand::{RngExt, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use async_trait::async_trait;

use crate::error::TaskError;
use crate::store::Record;
use crate::task::Task;

/// Registry name of the key/value dictionary task.
pub const KV_DICTIONARY: &str = "kv_dictionary";

const KEY_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const VALUE_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

#[derive(Debug, Deserialize)]
#[serde(default)]
struct KvDictionarySettings {
    num_entries: usize,
    key_length: usize,
    value_length: usize,
}

impl Default for KvDictionarySettings {
    fn default() -> Self {
        Self {
            num_entries: 20,
            key_length: 32,
            value_length: 32,
        }
    }
}

/// Key/value placement task: generate a pair list with one target entry at
/// a seeded position, score existence, position and list size.
pub struct KvDictionaryTask {
    num_entries: usize,
    key_length: usize,
    value_length: usize,
}

impl KvDictionaryTask {
    /// Constructor registered under [`KV_DICTIONARY`].
    pub fn construct(args: &Value) -> Result<Box<dyn Task>, TaskError> {
        let settings: KvDictionarySettings = if args.is_null() {
            KvDictionarySettings::default()
        } else {
            serde_json::from_value(args.clone())
                .map_err(|e| TaskError::InvalidConfig(e.to_string()))?
        };
        if settings.num_entries <= 1 {
            return Err(TaskError::InvalidConfig(
                "num_entries must be greater than 1".to_string(),
            ));
        }
        if settings.key_length < 1 || settings.value_length < 1 {
            return Err(TaskError::InvalidConfig(
                "key_length and value_length must be positive".to_string(),
            ));
        }
        Ok(Box::new(Self {
            num_entries: settings.num_entries,
            key_length: settings.key_length,
            value_length: settings.value_length,
        }))
    }

    /// Metric names this task emits.
    pub fn metric_names() -> Vec<String> {
        ["key_existence", "position_score", "entry_num_score", "total_score"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn random_string(rng: &mut ChaCha8Rng, alphabet: &[u8], len: usize) -> String {
        (0..len)
            .map(|_| alphabet[rng.random_range(0..alphabet.len())] as char)
            .collect()
    }
}

/// Derives the per-sample RNG seed from the sample id.
///
/// Samples are reproducible across runs and machines because the only
/// entropy source is the stable `sample_id`.
fn seed_from_sample_id(sample_id: &str) -> u64 {
    let digest = Sha256::digest(sample_id.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

#[async_trait]
impl Task for KvDictionaryTask {
    fn name(&self) -> &str {
        KV_DICTIONARY
    }

    fn generate_prompt(&self, record: &Record) -> Result<(String, Value), TaskError> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed_from_sample_id(&record.sample_id));

        let target_key = Self::random_string(&mut rng, KEY_ALPHABET, self.key_length);
        let target_value = Self::random_string(&mut rng, VALUE_ALPHABET, self.value_length);
        // 5% steps, extremes excluded.
        let target_percent = 5 + rng.random_range(0..19usize) * 5;
        let span = self.num_entries - 1;
        let target_index =
            ((target_percent as f64 / 100.0) * span as f64).round().clamp(0.0, span as f64) as usize;

        let prompt = format!(
            "Generate a list of key/value pairs with the following requirements:\n\
             - Total entries: {num}\n\
             - The list MUST include the pair [\"{key}\", \"{value}\"]\n\
             - That pair must be placed at zero-based index {index}\n\
             - All other keys must be distinct strings of uppercase letters, \
               all other values distinct strings of lowercase letters and digits\n\
             Output ONLY a JSON array of [key, value] pairs, no commentary.",
            num = self.num_entries,
            key = target_key,
            value = target_value,
            index = target_index,
        );
        let metadata = json!({
            "target_key": target_key,
            "target_value": target_value,
            "target_index": target_index,
            "num_entries": self.num_entries,
        });
        Ok((prompt, metadata))
    }

    async fn evaluate(&self, answer: &str, record: &Record) -> Result<Value, TaskError> {
        let metadata = record
            .metadata
            .as_ref()
            .ok_or_else(|| TaskError::Evaluation("record has no generation metadata".to_string()))?;
        let target_key = metadata
            .get("target_key")
            .and_then(Value::as_str)
            .ok_or_else(|| TaskError::Evaluation("metadata missing target_key".to_string()))?;
        let target_value = metadata
            .get("target_value")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let target_index = metadata
            .get("target_index")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;

        let Some(entries) = extract_pairs(answer) else {
            // An unparsable answer scores zero; it is a model failure, not
            // an evaluation failure.
            return Ok(json!({
                "key_existence": 0.0,
                "position_score": 0.0,
                "entry_num_score": 0.0,
                "total_score": 0.0,
                "parse_failure": true,
            }));
        };

        let found = entries
            .iter()
            .position(|(k, v)| k == target_key && v == target_value);
        let key_existence = if found.is_some() { 1.0 } else { 0.0 };

        let span = (self.num_entries - 1).max(1) as f64;
        let position_score = match found {
            Some(index) => {
                let distance = (index as f64 - target_index as f64).abs() / span;
                (1.0 - distance).clamp(0.0, 1.0)
            }
            None => 0.0,
        };

        let size_error =
            (entries.len() as f64 - self.num_entries as f64).abs() / self.num_entries as f64;
        let entry_num_score = (1.0 - size_error).clamp(0.0, 1.0);

        let total_score = (key_existence + position_score + entry_num_score) / 3.0;

        Ok(json!({
            "key_existence": key_existence,
            "position_score": position_score,
            "entry_num_score": entry_num_score,
            "total_score": total_score,
            "found_index": found,
            "entry_count": entries.len(),
        }))
    }
}

/// Extracts the first JSON array of string pairs from free-form model text.
fn extract_pairs(answer: &str) -> Option<Vec<(String, String)>> {
    let start = answer.find('[')?;
    let end = answer.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&answer[start..=end]).ok()
}
