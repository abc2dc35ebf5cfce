use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::models::ChatMessage;

/// What a chat call is for. Each task has its own sampling temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatTask {
    Completion,
    Intent,
    Expansion,
    Answer,
    Fallback,
}

impl ChatTask {
    pub fn temperature(self) -> f32 {
        match self {
            ChatTask::Intent => 0.0,
            ChatTask::Completion => 0.1,
            ChatTask::Answer => 0.3,
            ChatTask::Expansion | ChatTask::Fallback => 0.7,
        }
    }
}

/// A non-streaming chat-completion backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, task: ChatTask, messages: &[ChatMessage]) -> Result<String>;
}

/// Chat model served over HTTP by Ollama or an OpenAI-compatible API.
pub struct HttpChatModel {
    client: reqwest::Client,
    config: LlmConfig,
}

impl HttpChatModel {
    pub fn new(client: reqwest::Client, config: LlmConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    async fn chat(&self, task: ChatTask, messages: &[ChatMessage]) -> Result<String> {
        let content = match self.config.provider.as_str() {
            "ollama" => call_ollama(&self.client, &self.config, task, messages).await?,
            "openai" => call_openai(&self.client, &self.config, task, messages).await?,
            other => anyhow::bail!("Unknown LLM provider: {other}"),
        };
        tracing::debug!("{task:?} chat returned {} chars", content.len());
        Ok(content)
    }
}

// ─── Ollama ──────────────────────────────────────────────

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: ChatMessage,
}

async fn call_ollama(
    client: &reqwest::Client,
    config: &LlmConfig,
    task: ChatTask,
    messages: &[ChatMessage],
) -> Result<String> {
    let url = format!("{}/api/chat", config.base_url.trim_end_matches('/'));

    let req = OllamaChatRequest {
        model: &config.chat_model,
        messages,
        stream: false,
        options: OllamaOptions {
            temperature: task.temperature(),
        },
    };

    let resp = client
        .post(&url)
        .json(&req)
        .send()
        .await
        .context("Failed to call Ollama chat API")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("Ollama chat API returned {status}: {body}");
    }

    let body: OllamaChatResponse = resp
        .json()
        .await
        .context("Failed to parse Ollama chat response")?;
    Ok(body.message.content)
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

async fn call_openai(
    client: &reqwest::Client,
    config: &LlmConfig,
    task: ChatTask,
    messages: &[ChatMessage],
) -> Result<String> {
    let url = format!("{}/v1/chat/completions", config.base_url.trim_end_matches('/'));
    let api_key = config.api_key.as_deref().unwrap_or_default();

    let req = OpenAiChatRequest {
        model: &config.chat_model,
        messages,
        temperature: task.temperature(),
    };

    let resp = client
        .post(&url)
        .header("Authorization", format!("Bearer {api_key}"))
        .json(&req)
        .send()
        .await
        .context("Failed to call OpenAI chat API")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("OpenAI chat API returned {status}: {body}");
    }

    let body: OpenAiChatResponse = resp
        .json()
        .await
        .context("Failed to parse OpenAI chat response")?;
    body.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .context("OpenAI chat response had no content")
}
