use crate::models::{DocType, FileId};
use crate::search::filter::ChunkFilter;

/// A stored vector entry
#[derive(Debug, Clone)]
struct VectorEntry {
    ord: usize,
    doc_type: DocType,
    file_id: FileId,
    embedding: Vec<f32>,
}

/// In-memory vector store with cosine similarity search.
///
/// Entries are keyed by their ordinal in the owning corpus. The store is
/// filled once and read concurrently afterwards.
#[derive(Debug, Default)]
pub struct VectorStore {
    entries: Vec<VectorEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorHit {
    pub ord: usize,
    pub score: f32,
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a vector for the chunk at `ord`. The vector is L2-normalized.
    pub fn insert(&mut self, ord: usize, doc_type: DocType, file_id: FileId, embedding: Vec<f32>) {
        self.entries.push(VectorEntry {
            ord,
            doc_type,
            file_id,
            embedding: normalize(embedding),
        });
    }

    /// Nearest neighbours among entries admitted by `filter`.
    ///
    /// The predicate restricts the search space before scoring, so
    /// `limit` is counted over visible entries only.
    pub fn search(&self, query_embedding: &[f32], limit: usize, filter: &ChunkFilter) -> Vec<VectorHit> {
        if limit == 0 || filter.is_closed() {
            return Vec::new();
        }

        let mut scored: Vec<VectorHit> = self
            .entries
            .iter()
            .filter(|e| filter.admits(e.doc_type, e.file_id))
            .map(|e| VectorHit {
                ord: e.ord,
                score: cosine_similarity(query_embedding, &e.embedding),
            })
            .collect();

        // Sort descending by score, then by ordinal
        scored.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.ord.cmp(&b.ord)));
        scored.truncate(limit);
        scored
    }

    /// Exact similarity for specific entries, in the order requested.
    /// Unknown ordinals score 0.
    pub fn score(&self, query_embedding: &[f32], ords: &[usize]) -> Vec<f32> {
        ords.iter()
            .map(|ord| {
                self.entries
                    .iter()
                    .find(|e| e.ord == *ord)
                    .map(|e| cosine_similarity(query_embedding, &e.embedding))
                    .unwrap_or(0.0)
            })
            .collect()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn store() -> VectorStore {
        let mut s = VectorStore::new();
        s.insert(0, DocType::Statute, 1, vec![1.0, 0.0, 0.0]);
        s.insert(1, DocType::PublicCase, 10, vec![0.9, 0.1, 0.0]);
        s.insert(2, DocType::PrivateCase, 11, vec![0.0, 1.0, 0.0]);
        s.insert(3, DocType::PublicCase, 12, vec![3.0, 0.0, 0.0]);
        s
    }

    #[test]
    fn test_cosine_similarity_edges() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_prefilter_counts_only_visible_entries() {
        let s = store();
        let filter = ChunkFilter::cases(Arc::new([11].into_iter().collect()));
        let hits = s.search(&[1.0, 0.0, 0.0], 1, &filter);
        // The closest entries are hidden; the visible one is still returned.
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].ord, 2);
    }

    #[test]
    fn test_ties_break_by_ordinal() {
        let s = store();
        let filter = ChunkFilter::new(true, Arc::new([10, 11, 12].into_iter().collect()));
        let hits = s.search(&[1.0, 0.0, 0.0], 4, &filter);
        let ords: Vec<usize> = hits.iter().map(|h| h.ord).collect();
        assert_eq!(ords, vec![0, 3, 1, 2]);
    }

    #[test]
    fn test_score_specific_entries() {
        let s = store();
        let scores = s.score(&[0.0, 1.0, 0.0], &[2, 0, 42]);
        assert!((scores[0] - 1.0).abs() < 1e-6);
        assert_eq!(scores[1], 0.0);
        assert_eq!(scores[2], 0.0);
    }

    #[test]
    fn test_closed_filter_returns_nothing() {
        let s = store();
        assert!(s
            .search(&[1.0, 0.0, 0.0], 5, &ChunkFilter::cases(Arc::default()))
            .is_empty());
    }
}
