//! Web search via the Serper API.
//!
//! Results are flattened to text: one block per organic result
//! (`标题:` / `摘要:` / `来源:` lines), blocks separated by a blank line.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::config::WebSearchConfig;

#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Up to `n` results rendered as text. No results gives an empty string.
    async fn search(&self, query: &str, n: usize) -> Result<String>;
}

pub struct SerperSearch {
    client: reqwest::Client,
    config: WebSearchConfig,
}

impl SerperSearch {
    pub fn new(client: reqwest::Client, config: WebSearchConfig) -> Self {
        Self { client, config }
    }
}

#[derive(Serialize)]
struct SerperRequest<'a> {
    q: &'a str,
    num: usize,
    hl: &'a str,
    gl: &'a str,
}

#[derive(Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<OrganicResult>,
}

#[derive(Deserialize)]
struct OrganicResult {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
    #[serde(default)]
    link: Option<String>,
}

#[async_trait]
impl WebSearch for SerperSearch {
    async fn search(&self, query: &str, n: usize) -> Result<String> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .context("SERPER_API_KEY not configured")?;

        let url = format!("{}/search", self.config.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .header("X-API-KEY", api_key)
            .json(&SerperRequest {
                q: query,
                num: n,
                hl: "zh-cn",
                gl: "cn",
            })
            .send()
            .await
            .context("Failed to call Serper API")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Serper API returned {status}: {body}");
        }

        let body: SerperResponse = resp
            .json()
            .await
            .context("Failed to parse Serper response")?;

        Ok(render_results(&body.organic, n))
    }
}

fn render_results(results: &[OrganicResult], n: usize) -> String {
    results
        .iter()
        .take(n)
        .map(|r| {
            format!(
                "标题: {}\n摘要: {}\n来源: {}",
                r.title.as_deref().unwrap_or("无标题"),
                r.snippet.as_deref().unwrap_or("无摘要"),
                r.link.as_deref().unwrap_or("无链接"),
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Split rendered web content back into individual result blocks.
pub fn split_results(text: &str) -> Vec<&str> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|block| !block.is_empty())
        .collect()
}

static SOURCE_URL: OnceLock<Regex> = OnceLock::new();

/// URLs from the `来源:` lines, in order, without duplicates.
pub fn extract_source_urls(text: &str) -> Vec<String> {
    let pattern = SOURCE_URL.get_or_init(|| {
        Regex::new(r"来源:\s*(https?://\S+)").expect("source url regex must compile")
    });

    let mut urls: Vec<String> = Vec::new();
    for caps in pattern.captures_iter(text) {
        if let Some(url) = caps.get(1) {
            let url = url.as_str().to_string();
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
    }
    urls
}
