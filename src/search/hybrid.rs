use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{Chunk, RetrievalResult};
use crate::search::bm25::LexicalHit;
use crate::search::vector::VectorHit;

/// Lexical and semantic hits from a single query variant.
pub struct VariantHits {
    pub lexical: Vec<LexicalHit>,
    pub semantic: Vec<VectorHit>,
    /// Weight multiplier for this query variant (completed question = 2.0, paraphrase = 1.0)
    pub weight: f32,
}

const TOP_RANK_BONUS: f32 = 0.05;

/// Multi-query RRF fusion with weighted query variants and top-rank bonus.
///
/// 1. Every ranked list of every variant contributes `weight / (k + rank + 1)`
///    to each chunk it contains.
/// 2. Chunks ranked first in any list get a bonus of +0.05.
/// 3. Best `limit` chunks are kept, ties broken by corpus ordinal.
///
/// `fused_score` carries the RRF sum; lexical and semantic scores keep the
/// best raw value seen across variants.
pub fn multi_query_rrf_fusion<F>(
    variants: &[VariantHits],
    k: f32,
    limit: usize,
    chunk_for: F,
) -> Vec<RetrievalResult>
where
    F: Fn(usize) -> Option<Arc<Chunk>>,
{
    #[derive(Default)]
    struct Acc {
        lexical: f32,
        semantic: f32,
        rrf: f32,
        top_ranked: bool,
    }

    let mut score_map: HashMap<usize, Acc> = HashMap::new();

    for variant in variants {
        for (rank, hit) in variant.lexical.iter().enumerate() {
            let entry = score_map.entry(hit.ord).or_default();
            entry.lexical = entry.lexical.max(hit.score);
            entry.rrf += variant.weight / (k + rank as f32 + 1.0);
            entry.top_ranked |= rank == 0;
        }

        for (rank, hit) in variant.semantic.iter().enumerate() {
            let entry = score_map.entry(hit.ord).or_default();
            entry.semantic = entry.semantic.max(hit.score);
            entry.rrf += variant.weight / (k + rank as f32 + 1.0);
            entry.top_ranked |= rank == 0;
        }
    }

    let mut ranked: Vec<(usize, Acc)> = score_map.into_iter().collect();
    for (_, acc) in ranked.iter_mut() {
        if acc.top_ranked {
            acc.rrf += TOP_RANK_BONUS;
        }
    }
    ranked.sort_by(|a, b| b.1.rrf.total_cmp(&a.1.rrf).then(a.0.cmp(&b.0)));

    ranked
        .into_iter()
        .filter_map(|(ord, acc)| {
            let chunk = chunk_for(ord)?;
            Some(RetrievalResult {
                lexical_score: acc.lexical,
                semantic_score: acc.semantic,
                fused_score: acc.rrf,
                ..RetrievalResult::new(chunk)
            })
        })
        .take(limit)
        .collect()
}

/// Min-max normalize into `[0, 1]`.
///
/// Non-finite inputs count as 0. When every value is equal the result is
/// all zeros.
pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    let clean: Vec<f32> = scores
        .iter()
        .map(|s| if s.is_finite() { *s } else { 0.0 })
        .collect();

    let min = clean.iter().copied().fold(f32::INFINITY, f32::min);
    let max = clean.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;

    if clean.is_empty() || !(range > 0.0 && range.is_finite()) {
        return vec![0.0; clean.len()];
    }

    clean.iter().map(|s| (s - min) / range).collect()
}

/// `alpha * S_norm + (1 - alpha) * L_norm`, element-wise.
pub fn fuse_scores(lexical: &[f32], semantic: &[f32], alpha: f32) -> Vec<f32> {
    let l = min_max_normalize(lexical);
    let s = min_max_normalize(semantic);
    l.iter()
        .zip(&s)
        .map(|(l, s)| alpha * s + (1.0 - alpha) * l)
        .collect()
}

/// Single-index fallback ranking: normalize, fuse, sort, keep `top_k`.
///
/// Candidates must carry raw `lexical_score` and `semantic_score`; equal
/// fused scores keep their input order.
pub fn alpha_fusion(mut candidates: Vec<RetrievalResult>, alpha: f32, top_k: usize) -> Vec<RetrievalResult> {
    let lexical: Vec<f32> = candidates.iter().map(|c| c.lexical_score).collect();
    let semantic: Vec<f32> = candidates.iter().map(|c| c.semantic_score).collect();
    let fused = fuse_scores(&lexical, &semantic, alpha);

    for (candidate, score) in candidates.iter_mut().zip(fused) {
        candidate.fused_score = score;
    }

    candidates.sort_by(|a, b| b.fused_score.total_cmp(&a.fused_score));
    candidates.truncate(top_k);
    candidates
}
