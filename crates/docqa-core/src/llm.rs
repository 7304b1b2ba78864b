//! Language-model trait and token estimation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Rough characters-per-token ratio used when a provider reports no usage.
pub const CHARS_PER_TOKEN: usize = 4;

/// Per-call knobs passed to [`LanguageModel::generate`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOptions {
    /// Ask the provider for a JSON-only response when it supports a
    /// structured-output mode.
    pub json_output: bool,
    /// Overrides the provider's configured output cap.
    pub max_tokens: Option<u32>,
}

impl GenerationOptions {
    pub fn json() -> Self {
        Self {
            json_output: true,
            max_tokens: None,
        }
    }
}

/// Token counts as reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub usage: Option<ModelUsage>,
}

impl Generation {
    /// Reported usage, or a `chars / 4` estimate for both sides.
    pub fn usage_or_estimate(&self, prompt: &str) -> ModelUsage {
        self.usage.unwrap_or(ModelUsage {
            input_tokens: estimate_tokens(prompt),
            output_tokens: estimate_tokens(&self.text),
        })
    }
}

/// A chat-style model: prompt in, text out.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> anyhow::Result<Generation>;
}

/// Approximate token count of `text`. Not a tokenizer.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() / CHARS_PER_TOKEN) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_counts_chars_not_bytes() {
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens("退貨政策"), 1);
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_reported_usage_wins() {
        let g = Generation {
            text: "answer".into(),
            usage: Some(ModelUsage {
                input_tokens: 10,
                output_tokens: 3,
            }),
        };
        assert_eq!(g.usage_or_estimate("x".repeat(400).as_str()).input_tokens, 10);

        let g = Generation {
            text: "x".repeat(40),
            usage: None,
        };
        let u = g.usage_or_estimate(&"y".repeat(400));
        assert_eq!((u.input_tokens, u.output_tokens), (100, 10));
    }
}
