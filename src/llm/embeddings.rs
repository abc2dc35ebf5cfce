use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;

/// Maximum characters to send per text to the embedding API.
/// bge-m3 has an 8 192-token context and CJK text runs close to one token
/// per character, so 3 000 chars leaves room for mixed-script content.
const MAX_EMBED_CHARS: usize = 3_000;

/// Truncate `text` to at most `MAX_EMBED_CHARS` characters.
fn truncate_for_embedding(text: &str) -> &str {
    match text.char_indices().nth(MAX_EMBED_CHARS) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// Dense text embedder.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .context("No embedding returned")
    }
}

/// Embedder served over HTTP by Ollama or an OpenAI-compatible API.
pub struct HttpEmbedder {
    client: reqwest::Client,
    config: LlmConfig,
}

impl HttpEmbedder {
    pub fn new(client: reqwest::Client, config: LlmConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let truncated: Vec<String> = texts
            .iter()
            .map(|t| truncate_for_embedding(t).to_string())
            .collect();

        let embeddings = match self.config.provider.as_str() {
            "ollama" => embed_ollama(&self.client, &self.config, &truncated).await?,
            "openai" => embed_openai(&self.client, &self.config, &truncated).await?,
            other => anyhow::bail!("Unknown LLM provider: {other}"),
        };

        if embeddings.len() != texts.len() {
            anyhow::bail!(
                "Embedding API returned {} vectors for {} texts",
                embeddings.len(),
                texts.len()
            );
        }
        if let Some(bad) = embeddings
            .iter()
            .find(|e| e.len() != self.config.embedding_dim)
        {
            tracing::warn!(
                "Embedding dimension {} differs from configured {}",
                bad.len(),
                self.config.embedding_dim
            );
        }
        Ok(embeddings)
    }
}

// ─── Ollama ──────────────────────────────────────────────

#[derive(Serialize)]
struct OllamaEmbedRequest {
    model: String,
    input: Vec<String>,
    /// Ask Ollama to truncate over-long inputs instead of failing.
    truncate: bool,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

async fn embed_ollama(
    client: &reqwest::Client,
    config: &LlmConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let url = format!("{}/api/embed", config.base_url.trim_end_matches('/'));

    let batch_size = 32;
    let mut all_embeddings = Vec::with_capacity(texts.len());

    for batch in texts.chunks(batch_size) {
        let req = OllamaEmbedRequest {
            model: config.embedding_model.clone(),
            input: batch.to_vec(),
            truncate: true,
        };

        let resp = client
            .post(&url)
            .json(&req)
            .send()
            .await
            .context("Failed to call Ollama embed API")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Ollama embed API returned {status}: {body}");
        }

        let body: OllamaEmbedResponse = resp
            .json()
            .await
            .context("Failed to parse Ollama embed response")?;

        all_embeddings.extend(body.embeddings);
    }

    Ok(all_embeddings)
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Serialize)]
struct OpenAiEmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedData>,
}

#[derive(Deserialize)]
struct OpenAiEmbedData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

async fn embed_openai(
    client: &reqwest::Client,
    config: &LlmConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let url = format!("{}/v1/embeddings", config.base_url.trim_end_matches('/'));
    let api_key = config.api_key.as_deref().unwrap_or_default();

    let batch_size = 64;
    let mut all_embeddings = Vec::with_capacity(texts.len());

    for batch in texts.chunks(batch_size) {
        let req = OpenAiEmbedRequest {
            model: config.embedding_model.clone(),
            input: batch.to_vec(),
        };

        let resp = client
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&req)
            .send()
            .await
            .context("Failed to call OpenAI embed API")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI embed API returned {status}: {body}");
        }

        let body: OpenAiEmbedResponse = resp
            .json()
            .await
            .context("Failed to parse OpenAI embed response")?;

        all_embeddings.extend(in_request_order(body.data));
    }

    Ok(all_embeddings)
}

/// Servers may answer out of order; `index` restores request order.
fn in_request_order(mut data: Vec<OpenAiEmbedData>) -> Vec<Vec<f32>> {
    if data.iter().all(|d| d.index.is_some()) {
        data.sort_by_key(|d| d.index);
    }
    data.into_iter().map(|d| d.embedding).collect()
}
