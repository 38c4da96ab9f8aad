//! Similarity ranking over a project's stored vectors.
//!
//! The algorithm runs entirely through the [`Store`] trait. The caller
//! embeds the query and picks the [`RetrievalParams`] for its call site.
//!
//! # Ranking
//!
//! 1. Load every vector candidate for the project.
//! 2. Reject the query if any candidate has a different dimensionality.
//! 3. Score each candidate: `similarity = cos(query, candidate)`.
//! 4. Keep `similarity > threshold`.
//! 5. Sort by similarity (desc), then path (asc).
//! 6. Truncate to `limit`.
//!
//! Zero surviving candidates is a normal outcome and yields an empty list.

use anyhow::Result;

use crate::embedding::cosine_similarity;
use crate::error::DimensionMismatch;
use crate::models::{FileMatch, VectorCandidate};
use crate::store::Store;

/// Retrieval tuning for one call site.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalParams {
    /// Maximum number of matches to return.
    pub limit: usize,
    /// Matches must score strictly above this value.
    pub threshold: f32,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            limit: 10,
            threshold: 0.5,
        }
    }
}

/// Score, filter, order, and truncate candidates against a query vector.
pub fn rank_candidates(
    query_vec: &[f32],
    candidates: Vec<VectorCandidate>,
    params: &RetrievalParams,
) -> std::result::Result<Vec<FileMatch>, DimensionMismatch> {
    let mut matches = Vec::new();
    for cand in candidates {
        DimensionMismatch::check(query_vec.len(), cand.embedding.len())?;
        let similarity = cosine_similarity(query_vec, &cand.embedding);
        if similarity > params.threshold {
            matches.push(FileMatch {
                path: cand.path,
                summary: cand.summary,
                content: cand.content,
                similarity,
            });
        }
    }

    matches.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.path.cmp(&b.path))
    });
    matches.truncate(params.limit);
    Ok(matches)
}

/// Retrieve the best-matching files of a project for a pre-computed query
/// embedding.
pub async fn retrieve<S: Store + ?Sized>(
    store: &S,
    project_id: &str,
    query_vec: &[f32],
    params: &RetrievalParams,
) -> Result<Vec<FileMatch>> {
    let candidates = store.vector_candidates(project_id).await?;
    if candidates.is_empty() {
        return Ok(Vec::new());
    }
    Ok(rank_candidates(query_vec, candidates, params)?)
}
