//! # law-retrieval
//!
//! Permission-aware hybrid retrieval for legal question answering. A
//! question is completed against conversation history, classified, expanded
//! into paraphrases, and scored against a statute corpus and a case corpus
//! with BM25 and vector search. Candidates are merged with reciprocal rank
//! fusion and reranked by a cross-encoder before an LLM writes the answer.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────────────┐
//!                    │  Question + history  │
//!                    └──────────┬───────────┘
//!                               ▼
//!                    ┌──────────────────────┐
//!                    │ Completion (LLM)     │  fallback: raw question
//!                    └──────────┬───────────┘
//!                               ▼
//!                    ┌──────────────────────┐
//!                    │ Intent: law | other  │  fallback: other
//!                    └─────┬──────────┬─────┘
//!                     law  │          │ other
//!                          ▼          ▼
//!          ┌────────────────────┐   ┌────────────────────┐
//!          │ Query expansion    │   │ Fallback responder │
//!          │ original ×2 weight │   │ (+ web results)    │
//!          └─────────┬──────────┘   └────────────────────┘
//!                    ▼
//!          ┌────────────────────┐
//!          │ Access scope       │  mode + user → visible files
//!          └─────────┬──────────┘
//!             ┌──────┴──────┐
//!             ▼             ▼
//!      ┌────────────┐ ┌────────────┐
//!      │ Statutes   │ │ Cases      │   per variant: BM25 + vector,
//!      │ RRF+rerank │ │ RRF+rerank │   pre-filtered, top_k × oversample
//!      └─────┬──────┘ └─────┬──────┘
//!            └──────┬───────┘
//!                   ▼
//!          ┌────────────────────┐
//!          │ Statutes then cases│──► Answer generator ──► source summary
//!          └────────────────────┘
//! ```
//!
//! A unified layout replaces the two corpora with one merged index ranked by
//! min-max alpha fusion of the primary question's lexical and semantic scores.
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration and validation
//! - [`error`] - `RetrievalError` taxonomy and the degrade-to-default combinator
//! - [`models`] - Chunks, files, permissions, queries and ranked results
//! - [`access`] - JSON-persisted permission store and per-request `AccessScope`
//! - [`case_extract`] - Canonical section extraction for case documents
//! - [`search::bm25`] - Per-character BM25 index powered by tantivy
//! - [`search::vector`] - In-memory cosine store with a visibility pre-filter
//! - [`search::corpus`] - One collection: chunks, lexical index and vectors from a snapshot
//! - [`search::hybrid`] - Multi-query Reciprocal Rank Fusion and alpha fusion
//! - [`search::rerank`] - Cross-encoder reranking with a truncate fallback
//! - [`llm`] - Chat, embedding, cross-encoder and answer-generation clients
//! - [`resource`] - Lazily loaded, releasable model handles
//! - [`preprocess`] - Question completion, intent classification, query expansion
//! - [`web_search`] - Serper web search and source URL extraction
//! - [`conversation`] - Conversation history store
//! - [`sources`] - Citation block appended to legal answers
//! - [`pipeline`] - The request state machine tying it all together
//! - [`state`] - Wiring of configuration into a ready orchestrator

pub mod access;
pub mod case_extract;
pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod preprocess;
pub mod resource;
pub mod search;
pub mod sources;
pub mod state;
pub mod web_search;
