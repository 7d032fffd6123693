//! Result deduplication by document id

use crate::retrieval::RankedResult;
use ahash::AHashSet;

/// Drop repeated document ids, keeping the first (highest-ranked) occurrence,
/// and renumber ranks contiguously from 1
pub fn deduplicate(results: Vec<RankedResult>) -> Vec<RankedResult> {
    let mut seen: AHashSet<String> = AHashSet::with_capacity(results.len());

    let mut unique: Vec<RankedResult> = results
        .into_iter()
        .filter(|result| seen.insert(result.id().to_string()))
        .collect();

    for (position, result) in unique.iter_mut().enumerate() {
        result.rank = position + 1;
    }
    unique
}
