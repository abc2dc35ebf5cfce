//! Query preprocessing: completion, intent classification and multi-query
//! expansion.
//!
//! Each step returns `Result<_, RetrievalError>`; the orchestrator decides
//! the fallback. None of them retries.

use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::error::{bounded, RetrievalError, Service};
use crate::llm::chat::{ChatModel, ChatTask};
use crate::models::{ChatMessage, Intent};

const COMPLETION_PROMPT: &str = "你是问题补全助手。任务：将用户当前输入补全为完整独立的问题。\n\
【严格要求】\n\
1. 只输出一个完整的问题句子\n\
2. 不要任何解释、说明、前缀、后缀\n\
3. 不要输出答案或建议\n\
【处理逻辑】\n\
- 如果当前输入是完整问题，直接输出原问题\n\
- 如果包含指代词（这、那、它等），替换为历史问题中的具体内容\n\
- 如果是延续性表达（还有呢、怎么办等），补全为完整问题";

const INTENT_PROMPT: &str = "你是法律意图识别分类器。判断问题是否涉及法律咨询或相关领域。\n\
涉及法律术语、权利义务、法律程序或维权方式的，返回 law；\n\
日常闲聊或其他专业领域的，返回 other。\n\
只输出小写单词 law 或 other，禁止解释，禁止标点。";

/// Labels the model tends to echo in front of its answer.
const ECHO_PREFIXES: [&str; 3] = ["补全后的问题：", "补全后的问题:", "问题："];

pub struct Preprocessor {
    chat: Arc<dyn ChatModel>,
    timeout: Duration,
    expansion_count: usize,
}

impl Preprocessor {
    pub fn new(chat: Arc<dyn ChatModel>, timeout: Duration, expansion_count: usize) -> Self {
        Self {
            chat,
            timeout,
            expansion_count,
        }
    }

    /// Rewrite `raw` into a self-contained question using prior user turns.
    /// Assistant turns are never shown to the model.
    pub async fn complete(&self, raw: &str, history: &[ChatMessage]) -> Result<String, RetrievalError> {
        let user_turns: Vec<&str> = history
            .iter()
            .filter(|m| m.is_user())
            .map(|m| m.content.trim())
            .filter(|c| !c.is_empty())
            .collect();
        let history_text = if user_turns.is_empty() {
            "无".to_string()
        } else {
            user_turns.join("\n")
        };

        let messages = vec![
            ChatMessage::system(COMPLETION_PROMPT),
            ChatMessage::user(format!(
                "历史用户问题：{history_text}\n当前用户输入：{raw}\n补全后的问题："
            )),
        ];

        let reply = bounded(
            Service::Completion,
            self.timeout,
            self.chat.chat(ChatTask::Completion, &messages),
        )
        .await?;

        let completed = strip_echo(&reply);
        if completed.is_empty() {
            return Err(RetrievalError::malformed(Service::Completion, "empty completion"));
        }
        tracing::debug!("Completed question: {completed}");
        Ok(completed.to_string())
    }

    /// Strict `law` / `other` classification. Any other reply is malformed.
    pub async fn classify(&self, question: &str) -> Result<Intent, RetrievalError> {
        let messages = vec![
            ChatMessage::system(INTENT_PROMPT),
            ChatMessage::user(question),
        ];
        let reply = bounded(
            Service::IntentClassifier,
            self.timeout,
            self.chat.chat(ChatTask::Intent, &messages),
        )
        .await?;

        Intent::from_label(&reply).ok_or_else(|| {
            RetrievalError::malformed(Service::IntentClassifier, format!("unexpected label {reply:?}"))
        })
    }

    /// Up to `expansion_count` paraphrases of `question`.
    pub async fn expand(&self, question: &str) -> Result<Vec<String>, RetrievalError> {
        let n = self.expansion_count;
        let prompt = format!(
            "你是 AI 语言模型助手。请为下面的用户问题生成 {n} 个不同表述的版本，\
             用于从向量数据库中检索相关文档。每个问题占单独一行，不要编号，\
             不要添加任何额外内容。\n问题：{question}"
        );
        let reply = bounded(
            Service::QueryExpansion,
            self.timeout,
            self.chat.chat(ChatTask::Expansion, &[ChatMessage::user(prompt)]),
        )
        .await?;

        let queries = parse_expanded_queries(&reply, n);
        if queries.is_empty() {
            return Err(RetrievalError::malformed(
                Service::QueryExpansion,
                format!("no paraphrases in {reply:?}"),
            ));
        }
        if queries.len() < n {
            tracing::debug!("Expansion returned {} of {n} paraphrases", queries.len());
        }
        Ok(queries)
    }
}

fn strip_echo(reply: &str) -> &str {
    let trimmed = reply.trim();
    ECHO_PREFIXES
        .iter()
        .find_map(|p| trimmed.strip_prefix(p))
        .unwrap_or(trimmed)
        .trim()
}

static LIST_MARKER: OnceLock<Regex> = OnceLock::new();

fn list_marker() -> &'static Regex {
    LIST_MARKER.get_or_init(|| {
        Regex::new(r"^(?:\d+\s*[.)、:：]|[-*•]|[（(]\d+[）)])\s*")
            .expect("list marker regex must compile")
    })
}

/// Accept a JSON array of strings anywhere in the reply, otherwise one
/// query per non-blank line with list markers removed.
fn parse_expanded_queries(content: &str, limit: usize) -> Vec<String> {
    if let (Some(start), Some(end)) = (content.find('['), content.rfind(']')) {
        if start < end {
            if let Ok(queries) = serde_json::from_str::<Vec<String>>(&content[start..=end]) {
                return clean(queries.into_iter(), limit);
            }
        }
    }

    let lines = content
        .lines()
        .filter(|l| !l.trim_start().starts_with("```"))
        .map(|l| list_marker().replace(l.trim(), "").into_owned());
    clean(lines, limit)
}

fn clean(queries: impl Iterator<Item = String>, limit: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for q in queries {
        let q = q.trim().to_string();
        if !q.is_empty() && !out.contains(&q) {
            out.push(q);
        }
        if out.len() == limit {
            break;
        }
    }
    out
}
