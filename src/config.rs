//! TOML configuration.
//!
//! Every section is optional; a missing file section falls back to the
//! defaults below. API keys are never read from the file, only from the
//! environment (`GEMINI_API_KEY`, `OPENAI_API_KEY`).

use anyhow::{Context, Result};
use docqa_core::chunk::ChunkingParams;
use docqa_core::fusion::{DedupKey, FusionParams};
use docqa_core::synth::SynthesizerConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl StorageConfig {
    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join("vector_store.sqlite")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("document_metadata.json")
    }

    pub fn sessions_path(&self) -> PathBuf {
        self.data_dir.join("session_metadata.json")
    }

    pub fn usage_path(&self) -> PathBuf {
        self.data_dir.join("token_stats.json")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    2000
}
fn default_chunk_overlap() -> usize {
    500
}

impl ChunkingConfig {
    pub fn params(&self) -> ChunkingParams {
        ChunkingParams {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda: f32,
    /// `"prefix"` or `"full"`.
    #[serde(default = "default_dedup")]
    pub dedup: String,
    #[serde(default = "default_dedup_prefix_chars")]
    pub dedup_prefix_chars: usize,
    #[serde(default = "default_max_citations")]
    pub max_citations: usize,
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
    #[serde(default = "default_source_content_chars")]
    pub source_content_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            mmr_lambda: default_mmr_lambda(),
            dedup: default_dedup(),
            dedup_prefix_chars: default_dedup_prefix_chars(),
            max_citations: default_max_citations(),
            preview_chars: default_preview_chars(),
            source_content_chars: default_source_content_chars(),
        }
    }
}

fn default_k() -> usize {
    8
}
fn default_mmr_lambda() -> f32 {
    0.5
}
fn default_dedup() -> String {
    "prefix".to_string()
}
fn default_dedup_prefix_chars() -> usize {
    200
}
fn default_max_citations() -> usize {
    5
}
fn default_preview_chars() -> usize {
    200
}
fn default_source_content_chars() -> usize {
    2000
}

impl RetrievalConfig {
    pub fn dedup_key(&self) -> DedupKey {
        match self.dedup.as_str() {
            "full" => DedupKey::FullContent,
            _ => DedupKey::ContentPrefix(self.dedup_prefix_chars),
        }
    }

    pub fn fusion_params(&self, k: Option<usize>) -> FusionParams {
        FusionParams {
            k: k.filter(|k| *k > 0).unwrap_or(self.k),
            mmr_lambda: self.mmr_lambda,
            dedup: self.dedup_key(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Base URL override, e.g. an OpenAI-compatible gateway.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_answer_language")]
    pub answer_language: String,
    #[serde(default = "default_input_price")]
    pub input_price_per_million: f64,
    #[serde(default = "default_output_price")]
    pub output_price_per_million: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_llm_max_retries(),
            answer_language: default_answer_language(),
            input_price_per_million: default_input_price(),
            output_price_per_million: default_output_price(),
        }
    }
}

fn default_llm_provider() -> String {
    "gemini".to_string()
}
fn default_llm_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_llm_max_retries() -> u32 {
    2
}
fn default_answer_language() -> String {
    "Traditional Chinese".to_string()
}
fn default_input_price() -> f64 {
    1.25
}
fn default_output_price() -> f64 {
    5.0
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Environment variable holding the API key for the configured provider.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self.provider.as_str() {
            "gemini" => Some("GEMINI_API_KEY"),
            "openai" => Some("OPENAI_API_KEY"),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Largest accepted upload body, in MiB.
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

fn default_max_upload_mb() -> usize {
    50
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `EnvFilter` directives; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// When set, logs are also written to a daily rolling file here.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            log_dir: None,
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Config {
    pub fn synthesizer_config(&self) -> SynthesizerConfig {
        SynthesizerConfig {
            answer_language: self.llm.answer_language.clone(),
            preview_chars: self.retrieval.preview_chars,
            max_citations: self.retrieval.max_citations,
            ..SynthesizerConfig::default()
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
    }

    if config.retrieval.k == 0 {
        anyhow::bail!("retrieval.k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.mmr_lambda) {
        anyhow::bail!("retrieval.mmr_lambda must be in [0.0, 1.0]");
    }
    match config.retrieval.dedup.as_str() {
        "prefix" | "full" => {}
        other => anyhow::bail!("Unknown retrieval.dedup: '{}'. Must be prefix or full.", other),
    }
    if config.retrieval.dedup == "prefix" && config.retrieval.dedup_prefix_chars == 0 {
        anyhow::bail!("retrieval.dedup_prefix_chars must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "local" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    match config.llm.provider.as_str() {
        "disabled" | "gemini" | "openai" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled, gemini, or openai.",
            other
        ),
    }
    if config.server.max_upload_mb == 0 {
        anyhow::bail!("server.max_upload_mb must be > 0");
    }
    if config.llm.timeout_secs == 0 {
        anyhow::bail!("llm.timeout_secs must be > 0");
    }
    if config.llm.input_price_per_million < 0.0 || config.llm.output_price_per_million < 0.0 {
        anyhow::bail!("llm prices must not be negative");
    }

    Ok(())
}
