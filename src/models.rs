use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub type FileId = u64;
pub type UserId = u64;

/// Discriminant for every indexed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    Statute,
    PrivateCase,
    PublicCase,
}

impl DocType {
    pub fn is_case(self) -> bool {
        matches!(self, DocType::PrivateCase | DocType::PublicCase)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocType::Statute => "statute",
            DocType::PrivateCase => "private_case",
            DocType::PublicCase => "public_case",
        }
    }
}

/// A single indexed, immutable retrieval unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub file_id: FileId,
    pub source_path: String,
    pub doc_type: DocType,
    pub title: String,
    /// Display ordering within a file. Never used for ranking.
    pub chunk_sequence: usize,
    pub text: String,
}

/// A row of the `files` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_id: FileId,
    pub owner_user_id: UserId,
    pub title: String,
    pub path: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

/// What a permission row grants. A private grant cannot exist without an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "permission_type", rename_all = "snake_case")]
pub enum PermissionGrant {
    Public,
    Private { owner_id: UserId },
}

impl PermissionGrant {
    /// A chunk is visible to `user` iff some grant on its file is public or
    /// private to that user.
    pub fn admits(&self, user: UserId) -> bool {
        match self {
            PermissionGrant::Public => true,
            PermissionGrant::Private { owner_id } => *owner_id == user,
        }
    }
}

/// A row of the `file_permissions` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    pub file_id: FileId,
    #[serde(flatten)]
    pub grant: PermissionGrant,
}

/// Retrieval scope selector. Stateless per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeMode {
    #[serde(alias = "shared_knowledge", alias = "knowledgeQA")]
    PublicKnowledge,
    PrivateKnowledge,
    EntireKnowledge,
    NoneKnowledge,
}

impl KnowledgeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            KnowledgeMode::PublicKnowledge => "public_knowledge",
            KnowledgeMode::PrivateKnowledge => "private_knowledge",
            KnowledgeMode::EntireKnowledge => "entire_knowledge",
            KnowledgeMode::NoneKnowledge => "none_knowledge",
        }
    }
}

impl fmt::Display for KnowledgeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KnowledgeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "public_knowledge" | "shared_knowledge" | "knowledgeQA" => {
                Ok(KnowledgeMode::PublicKnowledge)
            }
            "private_knowledge" => Ok(KnowledgeMode::PrivateKnowledge),
            "entire_knowledge" => Ok(KnowledgeMode::EntireKnowledge),
            "none_knowledge" => Ok(KnowledgeMode::NoneKnowledge),
            other => Err(format!("unknown knowledge mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Law,
    Other,
}

impl Intent {
    /// Strict parse of the classifier token. Anything but `law` / `other`
    /// after trimming and lowercasing is rejected.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "law" => Some(Intent::Law),
            "other" => Some(Intent::Other),
            _ => None,
        }
    }
}

/// Per-request query state. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Query {
    pub raw_text: String,
    pub completed_text: String,
    pub intent: Intent,
    pub expanded_queries: Vec<String>,
}

/// A scored chunk flowing through fusion and reranking.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub chunk: Arc<Chunk>,
    pub lexical_score: f32,
    pub semantic_score: f32,
    pub fused_score: f32,
    pub rerank_score: Option<f32>,
}

impl RetrievalResult {
    pub fn new(chunk: Arc<Chunk>) -> Self {
        Self {
            chunk,
            lexical_score: 0.0,
            semantic_score: 0.0,
            fused_score: 0.0,
            rerank_score: None,
        }
    }
}

/// Final evidence handed to the answer generator: statute results first,
/// then case results.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RankedDocumentSet {
    pub results: Vec<RetrievalResult>,
}

impl RankedDocumentSet {
    pub fn concat(statutes: Vec<RetrievalResult>, cases: Vec<RetrievalResult>) -> Self {
        let mut results = statutes;
        results.extend(cases);
        Self { results }
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn chunk_ids(&self) -> Vec<String> {
        self.results.iter().map(|r| r.chunk.chunk_id.clone()).collect()
    }

    pub fn statutes(&self) -> impl Iterator<Item = &RetrievalResult> {
        self.results
            .iter()
            .filter(|r| r.chunk.doc_type == DocType::Statute)
    }

    pub fn cases(&self) -> impl Iterator<Item = &RetrievalResult> {
        self.results.iter().filter(|r| r.chunk.doc_type.is_case())
    }

    /// Evidence text for the generator, one chunk per paragraph.
    pub fn context_text(&self) -> String {
        self.results
            .iter()
            .map(|r| r.chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// A single conversation turn (user or assistant)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == "user"
    }
}
