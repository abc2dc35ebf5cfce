//! Answer generation on top of a [`ChatModel`].
//!
//! Legal questions are answered from the retrieved evidence; anything else
//! goes to a friendly fallback responder that steers back toward legal topics.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::llm::chat::{ChatModel, ChatTask};
use crate::models::ChatMessage;

/// Fixed reply used when generation fails outright.
pub const APOLOGY_TEXT: &str = "抱歉，系统暂时无法回答您的问题。";

/// Produces the final answer to a legal question from assembled evidence.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(
        &self,
        question: &str,
        context_text: &str,
        history: &[ChatMessage],
    ) -> Result<String>;
}

/// Handles turns classified as non-legal.
#[async_trait]
pub trait FallbackResponder: Send + Sync {
    async fn respond(
        &self,
        question: &str,
        web_context: &str,
        history: &[ChatMessage],
    ) -> Result<String>;
}

const ANSWER_SYSTEM_PROMPT: &str = "你是一名专业律师，请严格按以下要求回答问题：\n\
1. 必须基于提供的法律条文和案例，禁止编造\n\
2. 引用格式：《法律名称》第XX条\n\
3. 若无相关法条，明确告知无法回答";

const FALLBACK_SYSTEM_PROMPT: &str = "你是一名友善的法律助理。用户的问题与法律无关：\n\
先回应问题本身的情感价值，再挖掘该话题下潜在的法律需求，\n\
最后给出两到三个可以咨询的法律方向。";

/// Chat-backed implementation of both [`AnswerGenerator`] and [`FallbackResponder`].
pub struct ChatAnswerGenerator {
    chat: Arc<dyn ChatModel>,
}

impl ChatAnswerGenerator {
    pub fn new(chat: Arc<dyn ChatModel>) -> Self {
        Self { chat }
    }
}

/// System prompt, prior turns, then the question with its material.
fn build_messages(
    system: &str,
    history: &[ChatMessage],
    material_heading: &str,
    material: &str,
    question: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system));
    messages.extend(history.iter().filter(|m| !m.content.trim().is_empty()).cloned());

    let material = if material.trim().is_empty() {
        "无"
    } else {
        material
    };
    messages.push(ChatMessage::user(format!(
        "【{material_heading}】\n{material}\n\n【用户问题】\n{question}"
    )));
    messages
}

#[async_trait]
impl AnswerGenerator for ChatAnswerGenerator {
    async fn generate(
        &self,
        question: &str,
        context_text: &str,
        history: &[ChatMessage],
    ) -> Result<String> {
        let messages = build_messages(
            ANSWER_SYSTEM_PROMPT,
            history,
            "相关法律条文与案例",
            context_text,
            question,
        );
        let answer = self.chat.chat(ChatTask::Answer, &messages).await?;
        if answer.trim().is_empty() {
            anyhow::bail!("Answer model returned an empty reply");
        }
        Ok(answer.trim().to_string())
    }
}

#[async_trait]
impl FallbackResponder for ChatAnswerGenerator {
    async fn respond(
        &self,
        question: &str,
        web_context: &str,
        history: &[ChatMessage],
    ) -> Result<String> {
        let messages = build_messages(
            FALLBACK_SYSTEM_PROMPT,
            history,
            "网络搜索结果",
            web_context,
            question,
        );
        let reply = self.chat.chat(ChatTask::Fallback, &messages).await?;
        if reply.trim().is_empty() {
            anyhow::bail!("Fallback model returned an empty reply");
        }
        Ok(reply.trim().to_string())
    }
}
