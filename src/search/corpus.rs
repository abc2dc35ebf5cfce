use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::case_extract::normalize_case_text;
use crate::models::{Chunk, DocType};
use crate::search::bm25::{LexicalHit, LexicalIndex};
use crate::search::filter::ChunkFilter;
use crate::search::vector::{VectorHit, VectorStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorpusKind {
    Statutes,
    Cases,
    /// Statutes and cases merged into one collection
    Unified,
}

impl CorpusKind {
    fn accepts(self, doc_type: DocType) -> bool {
        match self {
            CorpusKind::Statutes => doc_type == DocType::Statute,
            CorpusKind::Cases => doc_type.is_case(),
            CorpusKind::Unified => true,
        }
    }
}

impl fmt::Display for CorpusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CorpusKind::Statutes => "statute",
            CorpusKind::Cases => "case",
            CorpusKind::Unified => "unified",
        })
    }
}

/// One line of an index snapshot: a chunk and its precomputed embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// A document collection: chunk table, lexical index and vector store,
/// all addressed by the chunk's ordinal in `chunks`.
pub struct Corpus {
    kind: CorpusKind,
    chunks: Vec<Arc<Chunk>>,
    lexical: LexicalIndex,
    vectors: VectorStore,
}

impl Corpus {
    /// Build from snapshot records. Case text is reduced to its canonical
    /// extract first; records of the wrong document type are skipped.
    pub fn build(kind: CorpusKind, records: Vec<SnapshotRecord>) -> Result<Self> {
        let mut chunks = Vec::with_capacity(records.len());
        let mut vectors = VectorStore::new();

        for record in records {
            let SnapshotRecord {
                mut chunk,
                embedding,
            } = record;
            if !kind.accepts(chunk.doc_type) {
                tracing::warn!(
                    "Skipping {} chunk {} in {kind} corpus",
                    chunk.doc_type.as_str(),
                    chunk.chunk_id
                );
                continue;
            }
            if chunk.doc_type.is_case() {
                chunk.text = normalize_case_text(&chunk.text);
            }

            let ord = chunks.len();
            vectors.insert(ord, chunk.doc_type, chunk.file_id, embedding);
            chunks.push(Arc::new(chunk));
        }

        let lexical = LexicalIndex::build(&chunks)
            .with_context(|| format!("Failed to build {kind} lexical index"))?;

        tracing::info!(
            "Built {kind} corpus with {} chunks ({} vectors)",
            chunks.len(),
            vectors.entry_count()
        );

        Ok(Self {
            kind,
            chunks,
            lexical,
            vectors,
        })
    }

    pub fn empty(kind: CorpusKind) -> Result<Self> {
        Self::build(kind, Vec::new())
    }

    /// Load the snapshot at `path` and build a corpus from it. A missing or
    /// unreadable snapshot gives an empty corpus.
    pub fn open(kind: CorpusKind, path: &Path) -> Result<Self> {
        match load_snapshot(path) {
            Ok(records) => Self::build(kind, records),
            Err(e) => {
                tracing::warn!("{kind} index unavailable, serving empty corpus: {e:#}");
                Self::empty(kind)
            }
        }
    }

    pub fn kind(&self) -> CorpusKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunk(&self, ord: usize) -> Option<&Arc<Chunk>> {
        self.chunks.get(ord)
    }

    pub fn lexical_search(&self, query: &str, limit: usize, filter: &ChunkFilter) -> Result<Vec<LexicalHit>> {
        self.lexical.search(query, limit, filter)
    }

    pub fn semantic_search(&self, query_embedding: &[f32], limit: usize, filter: &ChunkFilter) -> Vec<VectorHit> {
        self.vectors.search(query_embedding, limit, filter)
    }

    pub fn semantic_scores(&self, query_embedding: &[f32], ords: &[usize]) -> Vec<f32> {
        self.vectors.score(query_embedding, ords)
    }
}

pub fn load_snapshot(path: &Path) -> Result<Vec<SnapshotRecord>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
    serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse snapshot {}", path.display()))
}

/// Write a snapshot (atomic write via temp file + rename).
pub fn write_snapshot(path: &Path, records: &[SnapshotRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_string(records)?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, data).context("Failed to write snapshot")?;
    std::fs::rename(&tmp_path, path).context("Failed to replace snapshot")?;
    Ok(())
}

/// The collections one orchestrator queries.
pub enum CorpusSet {
    Separated {
        statutes: Arc<Corpus>,
        cases: Arc<Corpus>,
    },
    Unified(Arc<Corpus>),
}

impl CorpusSet {
    pub fn separated(statutes: Corpus, cases: Corpus) -> Self {
        CorpusSet::Separated {
            statutes: Arc::new(statutes),
            cases: Arc::new(cases),
        }
    }

    /// Merge statute and case records into one collection.
    pub fn unified(statutes: Vec<SnapshotRecord>, cases: Vec<SnapshotRecord>) -> Result<Self> {
        let mut records = statutes;
        records.extend(cases);
        Ok(CorpusSet::Unified(Arc::new(Corpus::build(
            CorpusKind::Unified,
            records,
        )?)))
    }
}
