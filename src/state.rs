use anyhow::Context;
use std::sync::Arc;

use crate::access::PermissionStore;
use crate::config::{Config, IndexLayout};
use crate::conversation::InMemoryConversations;
use crate::llm::answer::ChatAnswerGenerator;
use crate::llm::chat::{ChatModel, HttpChatModel};
use crate::llm::cross_encoder::{CrossEncoder, HttpCrossEncoder};
use crate::llm::embeddings::{Embedder, HttpEmbedder};
use crate::pipeline::{Collaborators, Orchestrator};
use crate::resource::ModelSlot;
use crate::search::corpus::{load_snapshot, Corpus, CorpusKind, CorpusSet};
use crate::web_search::{SerperSearch, WebSearch};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub permissions: Arc<PermissionStore>,
    pub conversations: Arc<InMemoryConversations>,
    pub orchestrator: Arc<Orchestrator>,
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(config.index_dir())?;

        let permissions = Arc::new(
            PermissionStore::open_or_create(&config.permissions_path())
                .context("Failed to open permission store")?,
        );
        let corpora = load_corpora(&config)?;

        let http_client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(120))
            .build()?;

        let chat: Arc<dyn ChatModel> = Arc::new(HttpChatModel::new(http_client.clone(), config.llm.clone()));
        let generator = Arc::new(ChatAnswerGenerator::new(chat.clone()));

        let embedder = {
            let client = http_client.clone();
            let llm = config.llm.clone();
            ModelSlot::new("embedding", move || {
                Ok(Arc::new(HttpEmbedder::new(client.clone(), llm.clone())) as Arc<dyn Embedder>)
            })
        };
        let reranker = {
            let client = http_client.clone();
            let reranker = config.reranker.clone();
            ModelSlot::new("reranker", move || {
                Ok(Arc::new(HttpCrossEncoder::new(client.clone(), reranker.clone())) as Arc<dyn CrossEncoder>)
            })
        };

        let web_search = config.web_search.api_key.as_ref().map(|_| {
            Arc::new(SerperSearch::new(http_client.clone(), config.web_search.clone())) as Arc<dyn WebSearch>
        });
        if web_search.is_none() {
            tracing::info!("SERPER_API_KEY not set, web search disabled");
        }

        let conversations = Arc::new(InMemoryConversations::new());

        let orchestrator = Orchestrator::new(
            config.retrieval.clone(),
            config.web_search.num_results,
            corpora,
            Collaborators {
                chat,
                embedder,
                reranker,
                generator: generator.clone(),
                fallback: generator,
                web_search,
                conversations: Some(conversations.clone()),
                permissions: permissions.clone(),
            },
        );

        Ok(Self {
            config,
            permissions,
            conversations,
            orchestrator: Arc::new(orchestrator),
            http_client,
        })
    }
}

fn load_corpora(config: &Config) -> anyhow::Result<CorpusSet> {
    match config.retrieval.layout {
        IndexLayout::Separated => {
            let statutes = Corpus::open(CorpusKind::Statutes, &config.statute_snapshot_path())?;
            let cases = Corpus::open(CorpusKind::Cases, &config.case_snapshot_path())?;
            tracing::info!(
                "Loaded {} statute chunks and {} case chunks",
                statutes.len(),
                cases.len()
            );
            Ok(CorpusSet::separated(statutes, cases))
        }
        IndexLayout::Unified => {
            let statutes = load_snapshot(&config.statute_snapshot_path()).unwrap_or_else(|e| {
                tracing::warn!("Statute snapshot unavailable: {e:#}");
                Vec::new()
            });
            let cases = load_snapshot(&config.case_snapshot_path()).unwrap_or_else(|e| {
                tracing::warn!("Case snapshot unavailable: {e:#}");
                Vec::new()
            });
            CorpusSet::unified(statutes, cases)
        }
    }
}
