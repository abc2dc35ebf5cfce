use anyhow::{Context, Result};
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, ConstScoreQuery, Occur, Query, TermQuery, TermSetQuery};
use tantivy::schema::*;
use tantivy::tokenizer::{LowerCaser, NgramTokenizer, TextAnalyzer, TokenStream};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, Term};

use crate::models::Chunk;
use crate::search::filter::{scope_key, ChunkFilter};

const CHAR_TOKENIZER: &str = "char_unigram";

/// BM25 index over a corpus snapshot, tokenized one character at a time.
///
/// Whitespace is stripped before tokenizing, so CJK text is scored per
/// character without dictionary segmentation. The index lives in RAM and is
/// built once from the full snapshot; there is no incremental update.
pub struct LexicalIndex {
    index: Index,
    reader: IndexReader,
    f_ord: Field,
    f_scope: Field,
    f_body: Field,
    doc_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LexicalHit {
    /// Position of the chunk in the owning corpus
    pub ord: usize,
    pub score: f32,
}

impl LexicalIndex {
    /// Build the index from chunks; a chunk's ordinal is its position in `chunks`.
    pub fn build(chunks: &[Arc<Chunk>]) -> Result<Self> {
        let mut schema_builder = Schema::builder();
        let f_ord = schema_builder.add_u64_field("ord", INDEXED | STORED);
        let f_scope = schema_builder.add_text_field("scope", STRING);
        let body_options = TextOptions::default().set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(CHAR_TOKENIZER)
                .set_index_option(IndexRecordOption::WithFreqs),
        );
        let f_body = schema_builder.add_text_field("body", body_options);
        let schema = schema_builder.build();

        let index = Index::create_in_ram(schema);
        let analyzer = TextAnalyzer::builder(
            NgramTokenizer::new(1, 1, false).context("Failed to build character tokenizer")?,
        )
        .filter(LowerCaser)
        .build();
        index.tokenizers().register(CHAR_TOKENIZER, analyzer);

        let mut writer: IndexWriter = index
            .writer(50_000_000)
            .context("Failed to create index writer")?;

        for (ord, chunk) in chunks.iter().enumerate() {
            writer.add_document(doc!(
                f_ord => ord as u64,
                f_scope => scope_key(chunk.doc_type, chunk.file_id),
                f_body => strip_whitespace(&chunk.text),
            ))?;
        }

        writer.commit().context("Failed to commit index")?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .context("Failed to create reader")?;

        Ok(Self {
            index,
            reader,
            f_ord,
            f_scope,
            f_body,
            doc_count: chunks.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.doc_count
    }

    pub fn is_empty(&self) -> bool {
        self.doc_count == 0
    }

    /// Score `query` against chunks admitted by `filter`, best first.
    ///
    /// The filter is part of the query itself, so `limit` counts only
    /// admitted chunks. Chunks sharing no character with the query are not
    /// returned.
    pub fn search(&self, query: &str, limit: usize, filter: &ChunkFilter) -> Result<Vec<LexicalHit>> {
        if limit == 0 || filter.is_closed() || self.is_empty() {
            return Ok(Vec::new());
        }

        let terms = self.query_terms(query)?;
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        // Repeated characters stay as repeated clauses, one per occurrence.
        let term_clauses: Vec<(Occur, Box<dyn Query>)> = terms
            .into_iter()
            .map(|term| {
                let q: Box<dyn Query> = Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs));
                (Occur::Should, q)
            })
            .collect();

        let scope_terms = filter
            .scope_keys()
            .into_iter()
            .map(|key| Term::from_field_text(self.f_scope, &key));
        let scope: Box<dyn Query> =
            Box::new(ConstScoreQuery::new(Box::new(TermSetQuery::new(scope_terms)), 0.0));

        let query = BooleanQuery::new(vec![
            (Occur::Must, scope),
            (Occur::Must, Box::new(BooleanQuery::new(term_clauses))),
        ]);

        // TopDocs preallocates from its limit, so never ask for more than exist.
        let limit = limit.min(self.len());
        let searcher = self.reader.searcher();
        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(limit))
            .context("Search failed")?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(doc_address)
                .context("Failed to retrieve document")?;

            let Some(ord) = doc.get_first(self.f_ord).and_then(|v| v.as_u64()) else {
                continue;
            };

            hits.push(LexicalHit {
                ord: ord as usize,
                score,
            });
        }

        // Equal scores fall back to corpus order so repeated queries agree.
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.ord.cmp(&b.ord)));
        Ok(hits)
    }

    fn query_terms(&self, query: &str) -> Result<Vec<Term>> {
        let mut analyzer = self
            .index
            .tokenizer_for_field(self.f_body)
            .context("Missing body tokenizer")?;
        let stripped = strip_whitespace(query);
        let mut stream = analyzer.token_stream(&stripped);
        let mut terms = Vec::new();
        while stream.advance() {
            terms.push(Term::from_field_text(self.f_body, &stream.token().text));
        }
        Ok(terms)
    }
}

pub fn strip_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}
