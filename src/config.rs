//! Typed engine configuration.
//!
//! Values are resolved in layers: built-in defaults, then an optional JSON
//! file, then `RFPBERT_*` environment variables, then command-line flags.
//! [`Config::validate`] runs once at startup, after every layer is applied,
//! so components never see an inconsistent setting.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_COLLECTION: &str = "hybrid_rfp_rag";
pub const DEFAULT_DENSE_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_COLBERT_MODEL: &str = "lightonai/GTE-ModernColBERT-v1";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Tolerance when checking that a weight group sums to one.
const WEIGHT_EPSILON: f32 = 1e-3;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub dense: DenseConfig,
    pub openai: OpenAiConfig,
    pub search: SearchConfig,
    pub fusion: FusionConfig,
    pub confidence: ConfidenceConfig,
    pub llm: LlmConfig,
    pub timeouts: TimeoutConfig,
    pub retry: RetryConfig,
    pub indexing: IndexingConfig,
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Name of the collection; also the store file stem in the data dir.
    pub collection: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DenseProvider {
    /// OpenAI-compatible `/embeddings` endpoint.
    #[serde(rename = "openai")]
    OpenAi,
    /// Local ColBERT model, token embeddings mean-pooled into one vector.
    Colbert,
}

impl std::str::FromStr for DenseProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "colbert" => Ok(Self::Colbert),
            other => Err(Error::Config(format!(
                "unknown dense provider '{other}' (expected openai or colbert)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DenseConfig {
    pub provider: DenseProvider,
    /// Remote embedding model, used by the `openai` provider.
    pub model: String,
    /// Requested output dimension for the remote model.
    pub dimensions: usize,
    /// HuggingFace model ID or local path, used by the `colbert` provider.
    pub colbert_model: String,
}

impl Default for DenseConfig {
    fn default() -> Self {
        Self {
            provider: DenseProvider::OpenAi,
            model: DEFAULT_DENSE_MODEL.to_string(),
            dimensions: 512,
            colbert_model: DEFAULT_COLBERT_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub top_k: usize,
    /// Each modality retrieves `top_k * oversample_factor` candidates.
    pub oversample_factor: usize,
    /// Score assumed for a modality that did not return a record.
    pub missing_score_floor: f32,
    /// Fused candidates below this score are dropped. Zero disables.
    pub min_fused_score: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            oversample_factor: 3,
            missing_score_floor: 0.0,
            min_fused_score: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionMethod {
    Weighted,
    Rrf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub method: FusionMethod,
    pub dense_weight: f32,
    pub sparse_weight: f32,
    pub rrf_k: u32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            method: FusionMethod::Weighted,
            dense_weight: 0.6,
            sparse_weight: 0.4,
            rrf_k: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    pub relevance_weight: f32,
    pub diversity_weight: f32,
    pub agreement_weight: f32,
    /// Fused score a candidate needs to count as supporting evidence.
    pub relevance_floor: f32,
    pub min_supporting: usize,
    /// Gap between the top two candidates below which the answer is
    /// considered ambiguous.
    pub ambiguity_gap: f32,
    /// Largest multiplicative discount applied to an ambiguous result.
    pub ambiguity_penalty: f32,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            relevance_weight: 0.6,
            diversity_weight: 0.2,
            agreement_weight: 0.2,
            relevance_floor: 0.3,
            min_supporting: 1,
            ambiguity_gap: 0.05,
            ambiguity_penalty: 0.25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub max_context_chars: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_LLM_MODEL.to_string(),
            temperature: 0.3,
            max_tokens: None,
            max_context_chars: 12_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub embedding_secs: u64,
    pub store_secs: u64,
    pub llm_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            embedding_secs: 30,
            store_secs: 10,
            llm_secs: 60,
        }
    }
}

impl TimeoutConfig {
    pub fn embedding(&self) -> Duration {
        Duration::from_secs(self.embedding_secs)
    }

    pub fn store(&self) -> Duration {
        Duration::from_secs(self.store_secs)
    }

    pub fn llm(&self) -> Duration {
        Duration::from_secs(self.llm_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 4_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    pub batch_size: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self { batch_size: 32 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub concurrency: usize,
    pub max_questions: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_questions: 1_000,
        }
    }
}

impl Config {
    /// Load defaults, overlay the JSON file at `path` (if any), then the
    /// process environment. The result is not validated yet.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let contents = std::fs::read_to_string(path)?;
                serde_json::from_str(&contents).map_err(|e| {
                    Error::Config(format!(
                        "invalid config file {}: {e}",
                        path.display()
                    ))
                })?
            }
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        if let Some(v) = lookup("RFPBERT_COLLECTION") {
            self.store.collection = v;
        }
        if let Some(v) = lookup("RFPBERT_DENSE_PROVIDER") {
            self.dense.provider = v.parse()?;
        }
        if let Some(v) = lookup("RFPBERT_DENSE_MODEL") {
            self.dense.model = v;
        }
        if let Some(v) = lookup("RFPBERT_COLBERT_MODEL") {
            self.dense.colbert_model = v;
        }
        if let Some(v) = lookup("RFPBERT_OPENAI_BASE_URL") {
            self.openai.base_url = v;
        }
        if let Some(v) = lookup("OPENAI_API_KEY").filter(|v| !v.is_empty()) {
            self.openai.api_key = Some(v);
        }
        if let Some(v) = lookup("RFPBERT_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = lookup("RFPBERT_TOP_K") {
            self.search.top_k = parse_env("RFPBERT_TOP_K", &v)?;
        }
        if let Some(v) = lookup("RFPBERT_BATCH_CONCURRENCY") {
            self.batch.concurrency = parse_env("RFPBERT_BATCH_CONCURRENCY", &v)?;
        }
        Ok(())
    }

    /// Check every setting. Called once at startup.
    pub fn validate(&self) -> Result<()> {
        if self.store.collection.trim().is_empty() {
            return Err(invalid("store.collection must not be empty"));
        }
        if self
            .store
            .collection
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        {
            return Err(invalid(
                "store.collection may only contain letters, digits, '_' and '-'",
            ));
        }

        match self.dense.provider {
            DenseProvider::OpenAi => {
                if self.dense.model.trim().is_empty() {
                    return Err(invalid("dense.model must not be empty"));
                }
                if self.dense.dimensions == 0 {
                    return Err(invalid("dense.dimensions must be at least 1"));
                }
                self.require_api_key()?;
            }
            DenseProvider::Colbert => {
                if self.dense.colbert_model.trim().is_empty() {
                    return Err(invalid("dense.colbert_model must not be empty"));
                }
            }
        }

        if self.search.top_k == 0 {
            return Err(invalid("search.top_k must be at least 1"));
        }
        if self.search.oversample_factor == 0 {
            return Err(invalid("search.oversample_factor must be at least 1"));
        }
        unit_interval("search.missing_score_floor", self.search.missing_score_floor)?;
        unit_interval("search.min_fused_score", self.search.min_fused_score)?;

        weight_group(
            "fusion",
            &[
                ("dense_weight", self.fusion.dense_weight),
                ("sparse_weight", self.fusion.sparse_weight),
            ],
        )?;
        if self.fusion.rrf_k == 0 {
            return Err(invalid("fusion.rrf_k must be at least 1"));
        }

        let c = &self.confidence;
        weight_group(
            "confidence",
            &[
                ("relevance_weight", c.relevance_weight),
                ("diversity_weight", c.diversity_weight),
                ("agreement_weight", c.agreement_weight),
            ],
        )?;
        if c.diversity_weight <= 0.0 {
            return Err(invalid("confidence.diversity_weight must be positive"));
        }
        unit_interval("confidence.relevance_floor", c.relevance_floor)?;
        if c.ambiguity_gap.is_nan() || c.ambiguity_gap <= 0.0 {
            return Err(invalid("confidence.ambiguity_gap must be positive"));
        }
        if !(0.0..1.0).contains(&c.ambiguity_penalty) {
            return Err(invalid("confidence.ambiguity_penalty must be in [0, 1)"));
        }

        if self.llm.model.trim().is_empty() {
            return Err(invalid("llm.model must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(invalid("llm.temperature must be in [0, 2]"));
        }
        if self.llm.max_context_chars == 0 {
            return Err(invalid("llm.max_context_chars must be at least 1"));
        }

        let t = &self.timeouts;
        if t.embedding_secs == 0 || t.store_secs == 0 || t.llm_secs == 0 {
            return Err(invalid("timeouts must be at least one second"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be at least 1"));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(invalid(
                "retry.initial_backoff_ms must not exceed retry.max_backoff_ms",
            ));
        }
        if self.indexing.batch_size == 0 {
            return Err(invalid("indexing.batch_size must be at least 1"));
        }
        if self.batch.concurrency == 0 {
            return Err(invalid("batch.concurrency must be at least 1"));
        }
        if self.batch.max_questions == 0 {
            return Err(invalid("batch.max_questions must be at least 1"));
        }

        Ok(())
    }

    /// The OpenAI API key, or a configuration error naming the variable.
    pub fn require_api_key(&self) -> Result<&str> {
        self.openai
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                Error::Config(
                    "OPENAI_API_KEY is required for the configured models"
                        .to_string(),
                )
            })
    }
}

fn invalid(msg: &str) -> Error {
    Error::Config(msg.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        Error::Config(format!("{key} has an invalid value: '{value}'"))
    })
}

fn unit_interval(name: &str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::Config(format!("{name} must be in [0, 1]")))
    }
}

fn weight_group(group: &str, weights: &[(&str, f32)]) -> Result<()> {
    for (name, w) in weights {
        if !w.is_finite() || *w < 0.0 {
            return Err(Error::Config(format!(
                "{group}.{name} must be a non-negative number"
            )));
        }
    }
    let sum: f32 = weights.iter().map(|(_, w)| w).sum();
    if (sum - 1.0).abs() > WEIGHT_EPSILON {
        return Err(Error::Config(format!(
            "{group} weights must sum to 1 (got {sum:.3})"
        )));
    }
    Ok(())
}
