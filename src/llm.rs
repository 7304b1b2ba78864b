//! Language-model backends.
//!
//! - **[`GeminiModel`]**: Google Generative Language `generateContent`.
//!   Requires `GEMINI_API_KEY`.
//! - **[`OpenAiChatModel`]**: any OpenAI-compatible `chat/completions`
//!   endpoint. Requires `OPENAI_API_KEY`.
//! - **[`DisabledModel`]**: always errors.
//!
//! [`create_model`] wraps the selected backend in a [`DeadlineModel`] so no
//! request waits on the provider longer than `llm.timeout_secs`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use docqa_core::llm::{Generation, GenerationOptions, LanguageModel, ModelUsage};

use crate::config::LlmConfig;
use crate::remote;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Keys are read per call.
fn api_key(var: &str) -> Result<String> {
    std::env::var(var).map_err(|_| anyhow::anyhow!("{} environment variable not set", var))
}

// ============ Disabled ============

pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str, _options: &GenerationOptions) -> Result<Generation> {
        bail!("Language model provider is disabled")
    }
}

// ============ Gemini ============

pub struct GeminiModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
}

impl GeminiModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            // The deadline wrapper owns the overall timeout.
            client: remote::client(config.timeout_secs.saturating_add(5))?,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
        })
    }

    fn request_body(&self, prompt: &str, options: &GenerationOptions) -> serde_json::Value {
        let mut generation_config = serde_json::json!({
            "temperature": self.temperature,
            "maxOutputTokens": options.max_tokens.unwrap_or(self.max_tokens),
        });
        if options.json_output {
            generation_config["responseMimeType"] = serde_json::json!("application/json");
        }
        serde_json::json!({
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
            "generationConfig": generation_config,
        })
    }
}

#[async_trait]
impl LanguageModel for GeminiModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<Generation> {
        let key = api_key("GEMINI_API_KEY")?;
        let endpoint = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = self.request_body(prompt, options);
        let json = remote::send_json("Gemini", self.max_retries, || {
            self.client
                .post(&endpoint)
                .header("x-goog-api-key", &key)
                .json(&body)
        })
        .await?;
        parse_gemini_response(&json)
    }
}

fn parse_gemini_response(json: &serde_json::Value) -> Result<Generation> {
    let candidate = json
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first());

    let Some(candidate) = candidate else {
        let reason = json
            .pointer("/promptFeedback/blockReason")
            .and_then(|r| r.as_str())
            .unwrap_or("no candidates returned");
        bail!("Gemini returned no answer: {}", reason);
    };

    let text: String = candidate
        .pointer("/content/parts")
        .and_then(|p| p.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
                .collect()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        let reason = candidate
            .get("finishReason")
            .and_then(|r| r.as_str())
            .unwrap_or("empty response");
        bail!("Gemini returned no text: {}", reason);
    }

    let usage = json.get("usageMetadata").map(|u| ModelUsage {
        input_tokens: u.get("promptTokenCount").and_then(|v| v.as_u64()).unwrap_or(0),
        output_tokens: u
            .get("candidatesTokenCount")
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
    });

    Ok(Generation { text, usage })
}

// ============ OpenAI-compatible chat ============

pub struct OpenAiChatModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
}

impl OpenAiChatModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            client: remote::client(config.timeout_secs.saturating_add(5))?,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    // `json_output` is not mapped to `response_format`: JSON mode only
    // permits objects and quiz replies are arrays. The prompt asks for JSON.
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<Generation> {
        let key = api_key("OPENAI_API_KEY")?;
        let endpoint = format!("{}/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": self.temperature,
            "max_tokens": options.max_tokens.unwrap_or(self.max_tokens),
        });
        let json = remote::send_json("OpenAI", self.max_retries, || {
            self.client.post(&endpoint).bearer_auth(&key).json(&body)
        })
        .await?;
        parse_chat_response(&json)
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<Generation> {
    let text = json
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing choices[0].message.content"))?
        .to_string();

    let usage = json.get("usage").map(|u| ModelUsage {
        input_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
        output_tokens: u.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
    });

    Ok(Generation { text, usage })
}

// ============ Deadline ============

/// Bounds every call of the wrapped model. An expired call is abandoned and
/// reported as an error.
pub struct DeadlineModel {
    inner: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl DeadlineModel {
    pub fn new(inner: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl LanguageModel for DeadlineModel {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<Generation> {
        match tokio::time::timeout(self.timeout, self.inner.generate(prompt, options)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    model = self.inner.model_name(),
                    timeout_secs = self.timeout.as_secs(),
                    "language model call timed out"
                );
                bail!(
                    "language model did not respond within {} seconds",
                    self.timeout.as_secs()
                )
            }
        }
    }
}

/// Build the [`LanguageModel`] named by `llm.provider`, bounded by
/// `llm.timeout_secs`.
pub fn create_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    let inner: Arc<dyn LanguageModel> = match config.provider.as_str() {
        "disabled" => return Ok(Arc::new(DisabledModel)),
        "gemini" => Arc::new(GeminiModel::new(config)?),
        "openai" => Arc::new(OpenAiChatModel::new(config)?),
        other => bail!("Unknown llm provider: {}", other),
    };
    Ok(Arc::new(DeadlineModel::new(
        inner,
        Duration::from_secs(config.timeout_secs),
    )))
}
