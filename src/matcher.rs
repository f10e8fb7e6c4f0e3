//! Matching core: Euclidean distance over a full reference sweep, per-name
//! dedup, min-max score normalization and stable ranking.

use std::collections::HashSet;

use serde::Serialize;

use crate::error::MatchError;
use crate::store::ReferenceStore;

/// A reference record paired with its distance to the query, pre-ranking.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub name: String,
    pub image_url: String,
    pub distance: f32,
}

/// One ranked output row. `similarity` is already rounded to 2 decimals.
#[derive(Debug, Clone, Serialize)]
pub struct RankedMatch {
    pub rank: usize,
    pub name: String,
    pub similarity: f32,
    pub image_url: String,
}

/// Euclidean distance between two equal-length vectors. A length mismatch
/// is a hard error; skipping the record instead would skew the
/// normalization base of the whole query.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> Result<f32, MatchError> {
    if a.len() != b.len() {
        return Err(MatchError::DimensionMismatch {
            query: a.len(),
            reference: b.len(),
        });
    }
    let sum: f32 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
    Ok(sum.sqrt())
}

/// Sweep the whole reference store, one page at a time, and rank the
/// distinct candidates against the query vector.
///
/// The record count is read once up front; rows added or removed while the
/// sweep runs may be missed or seen twice. Any page or distance error
/// aborts the match with no partial result.
pub async fn rank_matches(
    store: &dyn ReferenceStore,
    query: &[f32],
    num_results: usize,
    chunk_size: u64,
) -> Result<Vec<RankedMatch>, MatchError> {
    let total = store.count().await?;

    let mut seen: HashSet<String> = HashSet::new();
    let mut candidates = Vec::new();
    let mut offset = 0;
    while offset < total {
        let page = store.page(offset, chunk_size).await?;
        if page.is_empty() {
            break;
        }
        for record in page {
            // First occurrence of a name wins; later ones are dropped.
            if !seen.insert(record.name.clone()) {
                continue;
            }
            let distance = euclidean_distance(query, &record.embedding)?;
            candidates.push(Candidate {
                name: record.name,
                image_url: record.image_url,
                distance,
            });
        }
        offset += chunk_size;
    }

    Ok(rank_candidates(candidates, num_results))
}

/// Normalize distances into [0, 10] scores and rank the top `num_results`.
///
/// The closest candidate scores exactly 10 and the farthest exactly 0,
/// linearly in between. When every distance is equal (including the
/// single-candidate case) all scores are 10. Scores only mean something
/// relative to the candidate set of this one query.
pub fn rank_candidates(candidates: Vec<Candidate>, num_results: usize) -> Vec<RankedMatch> {
    if candidates.is_empty() || num_results == 0 {
        return Vec::new();
    }

    let min = candidates
        .iter()
        .map(|c| c.distance)
        .fold(f32::INFINITY, f32::min);
    let max = candidates
        .iter()
        .map(|c| c.distance)
        .fold(f32::NEG_INFINITY, f32::max);
    let spread = max - min;

    let mut scored: Vec<(Candidate, f32)> = candidates
        .into_iter()
        .map(|c| {
            let score = if spread == 0.0 {
                10.0
            } else {
                10.0 * (max - c.distance) / spread
            };
            (c, score)
        })
        .collect();

    // Stable sort: equal scores keep encounter order.
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));

    scored
        .into_iter()
        .take(num_results)
        .enumerate()
        .map(|(i, (c, score))| RankedMatch {
            rank: i + 1,
            name: c.name,
            similarity: round2(score),
            image_url: c.image_url,
        })
        .collect()
}

/// Round to 2 decimals, half away from zero.
fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}
