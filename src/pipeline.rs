//! Retrieval orchestrator.
//!
//! Every request walks `received → completed → classified → {law | other}
//! → answered`. Each step before the branch has a fallback value, so a
//! failing collaborator lowers answer quality but never aborts the request.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

use crate::access::{AccessScope, PermissionLookup};
use crate::config::RetrievalConfig;
use crate::conversation::ConversationStore;
use crate::error::{bounded, DegradeExt, Degraded, RetrievalError, Service};
use crate::llm::answer::{AnswerGenerator, FallbackResponder, APOLOGY_TEXT};
use crate::llm::chat::ChatModel;
use crate::llm::cross_encoder::CrossEncoder;
use crate::llm::embeddings::Embedder;
use crate::models::{ChatMessage, Intent, KnowledgeMode, Query, RankedDocumentSet, RetrievalResult, UserId};
use crate::preprocess::Preprocessor;
use crate::resource::ModelSlot;
use crate::search::bm25::LexicalHit;
use crate::search::corpus::{Corpus, CorpusSet};
use crate::search::filter::ChunkFilter;
use crate::search::hybrid::{alpha_fusion, multi_query_rrf_fusion, VariantHits};
use crate::search::rerank::rerank_or_truncate;
use crate::sources::summarize_sources;
use crate::web_search::WebSearch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Received,
    Completed,
    Classified,
    LawBranch,
    OtherBranch,
    Answered,
}

/// Parameters of one `answer` call.
#[derive(Debug, Clone, Deserialize)]
pub struct AnswerRequest {
    pub question: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub mode: KnowledgeMode,
    pub user_id: UserId,
    /// Results per corpus; the configured default when absent
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub use_web_search: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Answer {
    pub main_answer: String,
    pub source_summary: String,
}

impl Answer {
    /// Main answer followed by the citation block, if any.
    pub fn full_text(&self) -> String {
        if self.source_summary.is_empty() {
            self.main_answer.clone()
        } else {
            format!("{}\n\n{}", self.main_answer, self.source_summary)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineTrace {
    pub request_id: Uuid,
    pub states: Vec<PipelineState>,
    pub query: Query,
    pub chunk_ids: Vec<String>,
    pub web_content_length: usize,
    /// Collaborators whose fallback was used, in first-failure order
    pub degraded: Vec<Service>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerOutcome {
    pub answer: Answer,
    pub evidence: RankedDocumentSet,
    pub trace: PipelineTrace,
}

/// External collaborators the orchestrator is wired with.
pub struct Collaborators {
    pub chat: Arc<dyn ChatModel>,
    pub embedder: ModelSlot<dyn Embedder>,
    pub reranker: ModelSlot<dyn CrossEncoder>,
    pub generator: Arc<dyn AnswerGenerator>,
    pub fallback: Arc<dyn FallbackResponder>,
    pub web_search: Option<Arc<dyn WebSearch>>,
    pub conversations: Option<Arc<dyn ConversationStore>>,
    pub permissions: Arc<dyn PermissionLookup>,
}

/// A query variant and its fusion weight.
#[derive(Debug, Clone, PartialEq)]
struct WeightedQuery {
    text: String,
    weight: f32,
}

/// Services that fell back during one request.
#[derive(Default)]
struct StepLog {
    degraded: Vec<Service>,
}

impl StepLog {
    fn take<T>(&mut self, step: Degraded<T>) -> T {
        if let Some(service) = step.cause().and_then(RetrievalError::service) {
            if !self.degraded.contains(&service) {
                self.degraded.push(service);
            }
        }
        step.into_value()
    }
}

pub struct Orchestrator {
    config: RetrievalConfig,
    web_results: usize,
    corpora: CorpusSet,
    preprocessor: Preprocessor,
    embedder: ModelSlot<dyn Embedder>,
    reranker: ModelSlot<dyn CrossEncoder>,
    generator: Arc<dyn AnswerGenerator>,
    fallback: Arc<dyn FallbackResponder>,
    web_search: Option<Arc<dyn WebSearch>>,
    conversations: Option<Arc<dyn ConversationStore>>,
    permissions: Arc<dyn PermissionLookup>,
}

impl Orchestrator {
    pub fn new(config: RetrievalConfig, web_results: usize, corpora: CorpusSet, parts: Collaborators) -> Self {
        let preprocessor = Preprocessor::new(parts.chat, config.call_timeout(), config.expansion_count);
        Self {
            config,
            web_results,
            corpora,
            preprocessor,
            embedder: parts.embedder,
            reranker: parts.reranker,
            generator: parts.generator,
            fallback: parts.fallback,
            web_search: parts.web_search,
            conversations: parts.conversations,
            permissions: parts.permissions,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Drop resident embedder and reranker instances. Returns how many were loaded.
    pub fn release_models(&self) -> usize {
        [self.embedder.release(), self.reranker.release()]
            .into_iter()
            .filter(|released| *released)
            .count()
    }

    /// Evidence for an already self-contained legal question: statute
    /// results first, then case results, at most `top_k` of each.
    pub async fn retrieve(&self, question: &str, mode: KnowledgeMode, user_id: UserId, top_k: usize) -> RankedDocumentSet {
        let mut log = StepLog::default();
        self.retrieve_logged(question, mode, user_id, top_k, &mut log)
            .await
            .0
    }

    /// Run the full state machine for one turn.
    pub async fn answer(&self, request: AnswerRequest) -> AnswerOutcome {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "answer",
            %request_id,
            mode = %request.mode,
            user_id = request.user_id
        );
        self.answer_in_span(request_id, request).instrument(span).await
    }

    async fn answer_in_span(&self, request_id: Uuid, request: AnswerRequest) -> AnswerOutcome {
        let mut log = StepLog::default();
        let mut states = vec![PipelineState::Received];
        let top_k = request.top_k.unwrap_or(self.config.top_k);

        let history = match &request.conversation_id {
            Some(id) => log.take(self.recent_history(id).await.degrade_to(Vec::new())),
            None => Vec::new(),
        };

        let completed = log.take(
            self.preprocessor
                .complete(&request.question, &history)
                .await
                .degrade_with(|| request.question.clone()),
        );
        states.push(PipelineState::Completed);
        tracing::debug!("State: completed");

        let intent = log.take(
            self.preprocessor
                .classify(&completed)
                .await
                .degrade_to(Intent::Other),
        );
        states.push(PipelineState::Classified);
        tracing::info!("Question classified as {intent:?}");

        let (answer, evidence, expanded, web_content) = match intent {
            Intent::Law => {
                states.push(PipelineState::LawBranch);
                let (evidence, expanded) = self
                    .retrieve_logged(&completed, request.mode, request.user_id, top_k, &mut log)
                    .await;
                let web_content = self
                    .web_content(&completed, request.use_web_search, &mut log)
                    .await;

                let answer = self
                    .answer_legal(&completed, &evidence, &web_content, &history, &mut log)
                    .await;
                (answer, evidence, expanded, web_content)
            }
            Intent::Other => {
                states.push(PipelineState::OtherBranch);
                let web_content = self
                    .web_content(&completed, request.use_web_search, &mut log)
                    .await;

                let reply = self
                    .fallback
                    .respond(&completed, &web_content, &history)
                    .await
                    .map_err(|e| RetrievalError::external(Service::AnswerGenerator, e))
                    .degrade_with(|| APOLOGY_TEXT.to_string());
                let answer = Answer {
                    main_answer: log.take(reply),
                    source_summary: String::new(),
                };
                (answer, RankedDocumentSet::default(), Vec::new(), web_content)
            }
        };
        states.push(PipelineState::Answered);

        tracing::info!(
            "Answered with {} evidence chunks, {} degraded steps",
            evidence.len(),
            log.degraded.len()
        );

        let trace = PipelineTrace {
            request_id,
            states,
            query: Query {
                raw_text: request.question,
                completed_text: completed,
                intent,
                expanded_queries: expanded,
            },
            chunk_ids: evidence.chunk_ids(),
            web_content_length: web_content.chars().count(),
            degraded: log.degraded,
        };

        AnswerOutcome {
            answer,
            evidence,
            trace,
        }
    }

    async fn answer_legal(
        &self,
        question: &str,
        evidence: &RankedDocumentSet,
        web_content: &str,
        history: &[ChatMessage],
        log: &mut StepLog,
    ) -> Answer {
        let mut context = evidence.context_text();
        if !web_content.is_empty() {
            if !context.is_empty() {
                context.push_str("\n\n");
            }
            context.push_str("网络搜索结果:\n");
            context.push_str(web_content);
        }

        let generated = self
            .generator
            .generate(question, &context, history)
            .await
            .map_err(|e| RetrievalError::external(Service::AnswerGenerator, e))
            .degrade_with(|| APOLOGY_TEXT.to_string());

        let cite = !generated.is_fallback() && !evidence.is_empty();
        let main_answer = log.take(generated);
        let source_summary = if cite {
            summarize_sources(evidence, web_content)
        } else {
            String::new()
        };

        Answer {
            main_answer,
            source_summary,
        }
    }

    async fn recent_history(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, RetrievalError> {
        let Some(store) = &self.conversations else {
            return Ok(Vec::new());
        };
        bounded(
            Service::ConversationStore,
            self.config.call_timeout(),
            store.recent_turns(conversation_id, self.config.history_turns),
        )
        .await
    }

    async fn web_content(&self, query: &str, wanted: bool, log: &mut StepLog) -> String {
        if !wanted {
            return String::new();
        }
        let outcome = match &self.web_search {
            Some(search) => {
                bounded(
                    Service::WebSearch,
                    self.config.call_timeout(),
                    search.search(query, self.web_results),
                )
                .await
            }
            None => Err(RetrievalError::external(
                Service::WebSearch,
                anyhow::anyhow!("no web search provider configured"),
            )),
        };
        let content = log.take(outcome.degrade_to(String::new()));
        tracing::debug!("Web search returned {} chars", content.chars().count());
        content
    }

    /// Access filter, then expansion and per-corpus scoring.
    async fn retrieve_logged(
        &self,
        question: &str,
        mode: KnowledgeMode,
        user_id: UserId,
        top_k: usize,
        log: &mut StepLog,
    ) -> (RankedDocumentSet, Vec<String>) {
        if mode == KnowledgeMode::NoneKnowledge || top_k == 0 {
            tracing::debug!("Skipping retrieval (mode={mode}, top_k={top_k})");
            return (RankedDocumentSet::default(), Vec::new());
        }

        let scope = log.take(AccessScope::resolve(self.permissions.as_ref(), mode, user_id));
        let oversample = top_k.saturating_mul(self.config.oversample_factor);

        let (evidence, expanded) = match &self.corpora {
            CorpusSet::Separated { statutes, cases } => {
                let expanded = log.take(
                    self.preprocessor
                        .expand(question)
                        .await
                        .degrade_with(|| vec![question.to_string()]),
                );
                let variants = weighted_variants(question, &expanded, self.config.original_query_weight);
                let texts: Vec<String> = variants.iter().map(|v| v.text.clone()).collect();
                let embeddings = log.take(self.embed_queries(&texts).await.map(Some).degrade_to(None));

                let (statute_results, case_results) = tokio::join!(
                    self.rank_corpus(statutes, scope.statute_filter(), question, &variants, embeddings.as_deref(), top_k, oversample),
                    self.rank_corpus(cases, scope.case_filter(), question, &variants, embeddings.as_deref(), top_k, oversample),
                );
                (RankedDocumentSet::concat(log.take(statute_results), log.take(case_results)), expanded)
            }
            CorpusSet::Unified(corpus) => {
                // Alpha fusion scores the primary question only.
                tracing::debug!("Unified layout, skipping query expansion");
                let texts = vec![question.to_string()];
                let embedding = log
                    .take(self.embed_queries(&texts).await.map(Some).degrade_to(None))
                    .and_then(|mut e| e.pop());
                let results = self
                    .fuse_unified(corpus, scope.unified_filter(), question, embedding.as_deref(), top_k, oversample)
                    .await;
                (RankedDocumentSet { results }, Vec::new())
            }
        };

        tracing::info!(
            "Retrieved {} statute and {} case chunks",
            evidence.statutes().count(),
            evidence.cases().count()
        );
        (evidence, expanded)
    }

    async fn embed_queries(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let embedder = self
            .embedder
            .checkout()
            .map_err(|e| RetrievalError::external(Service::Embedder, e))?;
        let vectors = bounded(Service::Embedder, self.config.call_timeout(), embedder.embed(texts)).await?;
        if vectors.len() != texts.len() {
            return Err(RetrievalError::malformed(
                Service::Embedder,
                format!("{} vectors for {} queries", vectors.len(), texts.len()),
            ));
        }
        Ok(vectors)
    }

    /// Primary path for one corpus: per-variant lexical and semantic hits,
    /// reciprocal-rank merge, then cross-encoder rerank down to `top_k`.
    #[allow(clippy::too_many_arguments)]
    async fn rank_corpus(
        &self,
        corpus: &Arc<Corpus>,
        filter: Option<ChunkFilter>,
        question: &str,
        variants: &[WeightedQuery],
        embeddings: Option<&[Vec<f32>]>,
        top_k: usize,
        oversample: usize,
    ) -> Degraded<Vec<RetrievalResult>> {
        let Some(filter) = filter else {
            tracing::debug!("{} corpus out of scope", corpus.kind());
            return Degraded::Fresh(Vec::new());
        };
        if corpus.is_empty() {
            return Degraded::Fresh(Vec::new());
        }
        let oversample = oversample.min(corpus.len());

        let mut all_hits = Vec::with_capacity(variants.len());
        for (i, variant) in variants.iter().enumerate() {
            let lexical = lexical_hits(corpus, &variant.text, oversample, &filter).await;
            let semantic = embeddings
                .and_then(|e| e.get(i))
                .map(|embedding| corpus.semantic_search(embedding, oversample, &filter))
                .unwrap_or_default();
            all_hits.push(VariantHits {
                lexical,
                semantic,
                weight: variant.weight,
            });
        }

        let candidates =
            multi_query_rrf_fusion(&all_hits, self.config.rrf_k, oversample, |ord| corpus.chunk(ord).cloned());
        tracing::debug!(
            "{} corpus: {} candidates from {} query variants",
            corpus.kind(),
            candidates.len(),
            variants.len()
        );

        rerank_or_truncate(&self.reranker, question, candidates, top_k, self.config.call_timeout()).await
    }

    /// Single-index path: union of lexical and semantic candidates for the
    /// primary question, min-max alpha fusion, best `top_k`.
    async fn fuse_unified(
        &self,
        corpus: &Arc<Corpus>,
        filter: Option<ChunkFilter>,
        question: &str,
        embedding: Option<&[f32]>,
        top_k: usize,
        oversample: usize,
    ) -> Vec<RetrievalResult> {
        let Some(filter) = filter else {
            return Vec::new();
        };
        let oversample = oversample.min(corpus.len());

        // Every matching chunk, so lexical scores are exact for semantic-only candidates.
        let lexical = lexical_hits(corpus, question, corpus.len(), &filter).await;
        let semantic = embedding
            .map(|e| corpus.semantic_search(e, oversample, &filter))
            .unwrap_or_default();

        let lexical_scores: HashMap<usize, f32> = lexical.iter().map(|h| (h.ord, h.score)).collect();
        let mut ords: BTreeSet<usize> = lexical.iter().take(oversample).map(|h| h.ord).collect();
        ords.extend(semantic.iter().map(|h| h.ord));
        let ords: Vec<usize> = ords.into_iter().collect();

        let semantic_scores = embedding
            .map(|e| corpus.semantic_scores(e, &ords))
            .unwrap_or_else(|| vec![0.0; ords.len()]);

        let candidates: Vec<RetrievalResult> = ords
            .iter()
            .zip(semantic_scores)
            .filter_map(|(ord, semantic_score)| {
                corpus.chunk(*ord).map(|chunk| RetrievalResult {
                    lexical_score: lexical_scores.get(ord).copied().unwrap_or(0.0),
                    semantic_score,
                    ..RetrievalResult::new(chunk.clone())
                })
            })
            .collect();

        tracing::debug!("Unified corpus: fusing {} candidates", candidates.len());
        alpha_fusion(candidates, self.config.alpha, top_k)
    }
}

/// The primary question at `primary_weight`, then each distinct paraphrase at 1.0.
fn weighted_variants(question: &str, expanded: &[String], primary_weight: f32) -> Vec<WeightedQuery> {
    let mut variants = vec![WeightedQuery {
        text: question.to_string(),
        weight: primary_weight,
    }];
    for q in expanded {
        let q = q.trim();
        if !q.is_empty() && variants.iter().all(|v| v.text != q) {
            variants.push(WeightedQuery {
                text: q.to_string(),
                weight: 1.0,
            });
        }
    }
    variants
}

/// Lexical search off the async runtime. An index failure yields no hits.
async fn lexical_hits(corpus: &Arc<Corpus>, query: &str, limit: usize, filter: &ChunkFilter) -> Vec<LexicalHit> {
    let index = corpus.clone();
    let query = query.to_string();
    let filter = filter.clone();
    let outcome = tokio::task::spawn_blocking(move || index.lexical_search(&query, limit, &filter)).await;

    let reason = match outcome {
        Ok(Ok(hits)) => return hits,
        Ok(Err(e)) => format!("{e:#}"),
        Err(e) => format!("lexical search task failed: {e}"),
    };
    let err = RetrievalError::IndexUnavailable {
        corpus: corpus.kind().to_string(),
        reason,
    };
    tracing::warn!("{err}");
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_variants_dedupes_primary() {
        let expanded = vec![
            "违法解除的赔偿".to_string(),
            "公司违法辞退赔多少".to_string(),
            " 违法解除的赔偿 ".to_string(),
        ];
        let variants = weighted_variants("违法解除的赔偿", &expanded, 2.0);
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0].weight, 2.0);
        assert_eq!(variants[1].text, "公司违法辞退赔多少");
        assert_eq!(variants[1].weight, 1.0);
    }

    #[test]
    fn test_fallback_expansion_yields_single_variant() {
        let q = "劳动合同怎么解除";
        let variants = weighted_variants(q, &[q.to_string()], 2.0);
        assert_eq!(variants.len(), 1);
    }

    #[test]
    fn test_full_text_appends_summary() {
        let answer = Answer {
            main_answer: "答复".to_string(),
            source_summary: "---\n**案例依据：**\n- 《某案》".to_string(),
        };
        assert_eq!(answer.full_text(), "答复\n\n---\n**案例依据：**\n- 《某案》");
        assert_eq!(Answer::default().full_text(), "");
    }

    #[test]
    fn test_step_log_records_each_service_once() {
        let mut log = StepLog::default();
        let failed: Result<u8, RetrievalError> = Err(RetrievalError::malformed(Service::Reranker, "x"));
        assert_eq!(log.take(failed.degrade_to(1)), 1);
        let failed: Result<u8, RetrievalError> = Err(RetrievalError::malformed(Service::Reranker, "y"));
        log.take(failed.degrade_to(2));
        let fresh: Result<u8, RetrievalError> = Ok(3);
        log.take(fresh.degrade_to(0));
        assert_eq!(log.degraded, vec![Service::Reranker]);
    }

    #[test]
    fn test_answer_request_defaults() {
        let req: AnswerRequest = serde_json::from_str(
            r#"{"question": "q", "mode": "private_knowledge", "user_id": 7}"#,
        )
        .unwrap();
        assert_eq!(req.mode, KnowledgeMode::PrivateKnowledge);
        assert!(req.top_k.is_none());
        assert!(!req.use_web_search);
    }
}
