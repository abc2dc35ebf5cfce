use std::time::Duration;

use crate::error::{bounded, DegradeExt, Degraded, RetrievalError, Service};
use crate::llm::cross_encoder::CrossEncoder;
use crate::models::RetrievalResult;
use crate::resource::ModelSlot;

/// Reorder `candidates` by cross-encoder score and keep the best `top_k`.
///
/// The output is always a subset of the input. Equal scores keep their
/// pre-rerank order. A score vector of the wrong length or with non-finite
/// values is rejected as malformed.
pub async fn rerank_candidates(
    encoder: &dyn CrossEncoder,
    query: &str,
    candidates: &[RetrievalResult],
    top_k: usize,
    timeout: Duration,
) -> Result<Vec<RetrievalResult>, RetrievalError> {
    if candidates.is_empty() || top_k == 0 {
        return Ok(Vec::new());
    }

    let passages: Vec<String> = candidates.iter().map(|c| c.chunk.text.clone()).collect();
    let scores = bounded(Service::Reranker, timeout, encoder.score(query, &passages)).await?;

    if scores.len() != candidates.len() {
        return Err(RetrievalError::malformed(
            Service::Reranker,
            format!("{} scores for {} passages", scores.len(), candidates.len()),
        ));
    }
    if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
        return Err(RetrievalError::malformed(
            Service::Reranker,
            format!("non-finite score {bad}"),
        ));
    }

    let mut reranked: Vec<RetrievalResult> = candidates
        .iter()
        .cloned()
        .zip(scores)
        .map(|(mut candidate, score)| {
            candidate.rerank_score = Some(score);
            candidate
        })
        .collect();

    reranked.sort_by(|a, b| {
        let a = a.rerank_score.unwrap_or(f32::NEG_INFINITY);
        let b = b.rerank_score.unwrap_or(f32::NEG_INFINITY);
        b.total_cmp(&a)
    });
    reranked.truncate(top_k);
    Ok(reranked)
}

/// Rerank with a model checked out from `slot`. Any failure, including a
/// failed model load, falls back to the first `top_k` candidates in their
/// existing order.
pub async fn rerank_or_truncate(
    slot: &ModelSlot<dyn CrossEncoder>,
    query: &str,
    candidates: Vec<RetrievalResult>,
    top_k: usize,
    timeout: Duration,
) -> Degraded<Vec<RetrievalResult>> {
    let outcome = match slot.checkout() {
        Ok(encoder) => rerank_candidates(encoder.as_ref(), query, &candidates, top_k, timeout).await,
        Err(e) => Err(RetrievalError::external(Service::Reranker, e)),
    };

    outcome.degrade_with(|| {
        let mut kept = candidates;
        kept.truncate(top_k);
        kept
    })
}
