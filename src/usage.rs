//! Token and cost accounting for model-backed operations.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use docqa_core::llm::ModelUsage;
use docqa_core::models::TokenUsage;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::LlmConfig;
use crate::snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Query,
    Summary,
    Quiz,
    Health,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Query => "query",
            Operation::Summary => "summary",
            Operation::Quiz => "quiz",
            Operation::Health => "health",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

impl UsageTotals {
    fn add(&mut self, usage: &TokenUsage) {
        self.calls += 1;
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
        self.cost_usd += usage.cost_usd;
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Persisted as `token_stats.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    #[serde(default)]
    pub total: UsageTotals,
    #[serde(default)]
    pub by_operation: BTreeMap<String, UsageTotals>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl Pricing {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            input_per_million: config.input_price_per_million,
            output_per_million: config.output_price_per_million,
        }
    }

    pub fn cost(&self, usage: ModelUsage) -> f64 {
        usage.input_tokens as f64 * self.input_per_million / 1_000_000.0
            + usage.output_tokens as f64 * self.output_per_million / 1_000_000.0
    }
}

pub struct UsageTracker {
    path: PathBuf,
    pricing: Pricing,
    stats: Mutex<UsageStats>,
}

impl UsageTracker {
    pub async fn open(path: &Path, pricing: Pricing) -> anyhow::Result<Self> {
        let stats: UsageStats = snapshot::load(path).await?;
        Ok(Self {
            path: path.to_path_buf(),
            pricing,
            stats: Mutex::new(stats),
        })
    }

    /// Price a call and add it to the running totals.
    ///
    /// A failed snapshot write is logged; the call is still counted.
    pub async fn record(&self, operation: Operation, usage: ModelUsage) -> TokenUsage {
        let token_usage = TokenUsage {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: usage.input_tokens + usage.output_tokens,
            cost_usd: self.pricing.cost(usage),
        };

        let mut stats = self.stats.lock().await;
        stats.total.add(&token_usage);
        stats
            .by_operation
            .entry(operation.as_str().to_string())
            .or_default()
            .add(&token_usage);

        if let Err(e) = snapshot::save(&self.path, &*stats).await {
            tracing::warn!(error = %format!("{:#}", e), "failed to persist token stats");
        }
        tracing::debug!(
            operation = %operation,
            input_tokens = token_usage.input_tokens,
            output_tokens = token_usage.output_tokens,
            "model usage recorded"
        );
        token_usage
    }

    pub async fn snapshot(&self) -> UsageStats {
        self.stats.lock().await.clone()
    }
}
