use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::RetrievalError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where index snapshots and the permission store live
    pub data_dir: PathBuf,
    /// LLM provider configuration (chat + embeddings)
    pub llm: LlmConfig,
    /// Cross-encoder reranker configuration
    pub reranker: RerankerConfig,
    /// Retrieval and fusion tuning
    pub retrieval: RetrievalConfig,
    /// Web search provider configuration
    pub web_search: WebSearchConfig,
}

/// Configuration for the cross-encoder reranker sidecar (e.g. llama-server with bge-reranker).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    /// Base URL for the reranker API (e.g. "http://127.0.0.1:8082").
    /// If None, reranking falls back to the pre-rerank order.
    pub base_url: Option<String>,
    /// Model name to send in the rerank request.
    pub model: Option<String>,
    /// Request timeout in seconds (capped at 30).
    pub timeout_secs: u64,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            model: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "ollama" or "openai"
    pub provider: String,
    /// Base URL for the LLM API
    pub base_url: String,
    /// Model name for completion, intent, expansion and answers
    pub chat_model: String,
    /// Model name for embeddings
    pub embedding_model: String,
    /// API key (only needed for cloud providers)
    pub api_key: Option<String>,
    /// Embedding vector dimension
    pub embedding_dim: usize,
}

/// Which index layout the orchestrator queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexLayout {
    /// Statute and case corpora searched and reranked independently.
    Separated,
    /// One merged corpus ranked by min-max alpha fusion.
    Unified,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Results kept per corpus after reranking
    pub top_k: usize,
    /// Candidate pool multiplier handed to the reranker
    pub oversample_factor: usize,
    /// Semantic weight in the fallback fusion path
    pub alpha: f32,
    /// Reciprocal rank constant for multi-query merging
    pub rrf_k: f32,
    /// Weight of the completed question relative to its paraphrases
    pub original_query_weight: f32,
    /// Number of paraphrases requested from the expander
    pub expansion_count: usize,
    /// Recent conversation turns read for completion
    pub history_turns: usize,
    /// Wall-clock bound on every external call
    pub call_timeout_secs: u64,
    pub layout: IndexLayout,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            oversample_factor: 3,
            alpha: 0.5,
            rrf_k: 60.0,
            original_query_weight: 2.0,
            expansion_count: 3,
            history_turns: 5,
            call_timeout_secs: 10,
            layout: IndexLayout::Separated,
        }
    }
}

impl RetrievalConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchConfig {
    /// Serper API key. Web search is unavailable without it.
    pub api_key: Option<String>,
    pub base_url: String,
    pub num_results: usize,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://google.serper.dev".to_string(),
            num_results: 3,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            llm: LlmConfig::default(),
            reranker: RerankerConfig::default(),
            retrieval: RetrievalConfig::default(),
            web_search: WebSearchConfig::default(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            chat_model: "qwen2.5".to_string(),
            embedding_model: "bge-m3".to_string(),
            api_key: None,
            embedding_dim: 1024,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("LAW_RETRIEVAL_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            config.llm.provider = provider;
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            config.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("LLM_CHAT_MODEL") {
            config.llm.chat_model = model;
        }
        if let Ok(model) = std::env::var("LLM_EMBEDDING_MODEL") {
            config.llm.embedding_model = model;
        }
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            config.llm.api_key = Some(key);
        }
        if let Ok(dim) = std::env::var("LLM_EMBEDDING_DIM") {
            if let Ok(d) = dim.parse() {
                config.llm.embedding_dim = d;
            }
        }

        // Reranker config
        if let Ok(url) = std::env::var("RERANKER_BASE_URL") {
            config.reranker.base_url = Some(url);
        }
        if let Ok(model) = std::env::var("RERANKER_MODEL") {
            config.reranker.model = Some(model);
        }
        if let Ok(val) = std::env::var("RERANKER_TIMEOUT_SECS") {
            if let Ok(v) = val.parse::<u64>() {
                config.reranker.timeout_secs = v.min(30); // Cap at 30s
            }
        }

        // Retrieval tuning
        if let Ok(val) = std::env::var("RETRIEVAL_TOP_K") {
            if let Ok(v) = val.parse() {
                config.retrieval.top_k = v;
            }
        }
        if let Ok(val) = std::env::var("RETRIEVAL_OVERSAMPLE") {
            if let Ok(v) = val.parse() {
                config.retrieval.oversample_factor = v;
            }
        }
        if let Ok(val) = std::env::var("RETRIEVAL_ALPHA") {
            if let Ok(v) = val.parse() {
                config.retrieval.alpha = v;
            }
        }
        if let Ok(val) = std::env::var("RETRIEVAL_INDEX_LAYOUT") {
            match val.as_str() {
                "separated" => config.retrieval.layout = IndexLayout::Separated,
                "unified" => config.retrieval.layout = IndexLayout::Unified,
                other => tracing::warn!("Ignoring unknown RETRIEVAL_INDEX_LAYOUT: {other}"),
            }
        }
        if let Ok(val) = std::env::var("RETRIEVAL_CALL_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                config.retrieval.call_timeout_secs = v;
            }
        }
        if let Ok(val) = std::env::var("RETRIEVAL_HISTORY_TURNS") {
            if let Ok(v) = val.parse() {
                config.retrieval.history_turns = v;
            }
        }

        // Web search
        if let Ok(key) = std::env::var("SERPER_API_KEY") {
            config.web_search.api_key = Some(key);
        }
        if let Ok(val) = std::env::var("WEB_SEARCH_RESULTS") {
            if let Ok(v) = val.parse() {
                config.web_search.num_results = v;
            }
        }

        config
    }

    pub fn validate(&self) -> Result<(), RetrievalError> {
        let r = &self.retrieval;
        if !(0.0..=1.0).contains(&r.alpha) {
            return Err(RetrievalError::InvalidConfig(format!(
                "alpha must be within [0, 1], got {}",
                r.alpha
            )));
        }
        if r.oversample_factor == 0 {
            return Err(RetrievalError::InvalidConfig(
                "oversample_factor must be at least 1".to_string(),
            ));
        }
        if r.call_timeout_secs == 0 {
            return Err(RetrievalError::InvalidConfig(
                "call_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("index")
    }

    pub fn statute_snapshot_path(&self) -> PathBuf {
        self.index_dir().join("statutes.json")
    }

    pub fn case_snapshot_path(&self) -> PathBuf {
        self.index_dir().join("cases.json")
    }

    pub fn permissions_path(&self) -> PathBuf {
        self.data_dir.join("permissions.json")
    }
}
