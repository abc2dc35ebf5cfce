//! Cross-encoder reranker via OpenAI-compatible `/v1/rerank` endpoint.
//!
//! Sends a single batch request with all query-passage pairs. Typical
//! latency is tens of milliseconds for a few dozen passages.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::RerankerConfig;

/// Joint (query, passage) relevance scorer.
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// One score per passage, in input order. Higher is more relevant.
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>>;
}

pub struct HttpCrossEncoder {
    client: reqwest::Client,
    config: RerankerConfig,
}

impl HttpCrossEncoder {
    pub fn new(client: reqwest::Client, config: RerankerConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl CrossEncoder for HttpCrossEncoder {
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }

        let base_url = self
            .config
            .base_url
            .as_deref()
            .context("Reranker base_url not configured")?;

        let model = self.config.model.as_deref().unwrap_or("default");

        let url = format!("{}/v1/rerank", base_url.trim_end_matches('/'));

        let req_body = RerankRequest {
            model,
            query,
            documents: passages,
            top_n: passages.len(),
        };

        let timeout = std::time::Duration::from_secs(self.config.timeout_secs.min(30));

        let resp = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&req_body)
            .send()
            .await
            .context("Failed to reach reranker endpoint")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Reranker returned {status}: {body}");
        }

        let body: RerankResponse = resp
            .json()
            .await
            .context("Failed to parse reranker response")?;

        scores_in_input_order(body.results, passages.len())
    }
}

/// Turn `(index, logit)` pairs into sigmoid scores parallel to the input.
/// Every passage must be scored exactly once.
fn scores_in_input_order(results: Vec<RerankResultRaw>, n: usize) -> Result<Vec<f32>> {
    let mut scores: Vec<Option<f32>> = vec![None; n];
    for r in results {
        let slot = scores
            .get_mut(r.index)
            .with_context(|| format!("Reranker returned index {} for {n} passages", r.index))?;
        if slot.is_some() {
            anyhow::bail!("Reranker scored passage {} twice", r.index);
        }
        *slot = Some(sigmoid(r.relevance_score));
    }

    scores
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.with_context(|| format!("Reranker did not score passage {i}")))
        .collect()
}

/// Sigmoid normalization: maps raw logits to 0-1 range.
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

// ─── Request/Response types ────────────────────────────

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResultRaw>,
}

#[derive(Deserialize)]
struct RerankResultRaw {
    index: usize,
    relevance_score: f32,
}
