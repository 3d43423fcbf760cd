//! Model backend abstraction.
//!
//! The pipeline only ever sees [`ModelClient`]: one async call that turns a
//! prompt into an answer. The shipped implementation speaks the
//! OpenAI-compatible chat-completions protocol; tests substitute scripted
//! clients.

pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

pub use openai::OpenAiClient;

/// Sampling parameters forwarded to the backend with each request.
///
/// Carried in every record's `eval_args` field so resumed runs reuse the
/// exact parameters of the original generation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SamplingParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

/// A model backend that completes prompts.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// The model identifier, used for report naming.
    fn model(&self) -> &str;

    /// Completes a prompt, returning the raw answer text.
    async fn complete(&self, prompt: &str, params: &SamplingParams) -> Result<String, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampling_params_roundtrip() {
        let params = SamplingParams {
            temperature: Some(0.2),
            max_tokens: Some(4096),
            top_p: None,
        };
        let value = serde_json::to_value(&params).unwrap();
        assert!(value.get("top_p").is_none());

        let parsed: SamplingParams = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.temperature, Some(0.2));
        assert_eq!(parsed.max_tokens, Some(4096));
    }

    #[test]
    fn test_sampling_params_ignores_unknown_fields() {
        let parsed: SamplingParams = serde_json::from_value(serde_json::json!({
            "temperature": 0.7,
            "stop": ["\n"]
        }))
        .unwrap();
        assert_eq!(parsed.temperature, Some(0.7));
    }
}
