//! Score normalisation and fusion of the lexical and vector paths

use crate::config::RankingProfile;
use crate::retrieval::CandidateResult;

/// Min-max scale the present scores to [0, 1]
///
/// Absent scores stay absent. If every present score is equal they all
/// normalise to 1.0, so a lone candidate is treated as a perfect match for
/// its path rather than a zero.
pub fn min_max_normalize(scores: &[Option<f32>]) -> Vec<Option<f32>> {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for score in scores.iter().flatten() {
        min = min.min(*score);
        max = max.max(*score);
    }

    let range = max - min;
    scores
        .iter()
        .map(|score| {
            score.map(|s| {
                if range > 0.0 && range.is_finite() {
                    (s - min) / range
                } else {
                    1.0
                }
            })
        })
        .collect()
}

/// Normalised per-path scores of one candidate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedScores {
    pub lexical: Option<f32>,
    pub vector: Option<f32>,
}

/// Normalise both paths across the whole candidate set
pub fn normalize_candidates(candidates: &[CandidateResult]) -> Vec<NormalizedScores> {
    let lexical: Vec<Option<f32>> = candidates.iter().map(|c| c.lexical_score).collect();
    let vector: Vec<Option<f32>> = candidates.iter().map(|c| c.vector_score).collect();

    min_max_normalize(&lexical)
        .into_iter()
        .zip(min_max_normalize(&vector))
        .map(|(lexical, vector)| NormalizedScores { lexical, vector })
        .collect()
}

/// Combined relevance in [0, 1]
///
/// Both paths present: the profile's weighted mean. One path: that path's
/// score alone, with no penalty for missing the other.
pub fn combine(scores: NormalizedScores, profile: &RankingProfile) -> f32 {
    match (scores.lexical, scores.vector) {
        (Some(lexical), Some(vector)) => {
            let total = profile.lexical_weight + profile.vector_weight;
            if total > 0.0 {
                (profile.lexical_weight * lexical + profile.vector_weight * vector) / total
            } else {
                0.5 * lexical + 0.5 * vector
            }
        }
        (Some(lexical), None) => lexical,
        (None, Some(vector)) => vector,
        (None, None) => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_max_basic() {
        let normalized = min_max_normalize(&[Some(2.0), None, Some(4.0), Some(3.0)]);
        assert_eq!(normalized, vec![Some(0.0), None, Some(1.0), Some(0.5)]);
    }

    #[test]
    fn test_equal_scores_normalise_to_one() {
        assert_eq!(
            min_max_normalize(&[Some(0.7), Some(0.7)]),
            vec![Some(1.0), Some(1.0)]
        );
        assert_eq!(min_max_normalize(&[Some(5.0)]), vec![Some(1.0)]);
        assert_eq!(min_max_normalize(&[None, None]), vec![None, None]);
    }

    #[test]
    fn test_combine_both_paths() {
        let profile = RankingProfile::default();
        let combined = combine(
            NormalizedScores {
                lexical: Some(1.0),
                vector: Some(0.5),
            },
            &profile,
        );
        assert!((combined - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_single_path_has_no_penalty() {
        let profile = RankingProfile::default();
        let lexical_only = combine(
            NormalizedScores {
                lexical: Some(0.8),
                vector: None,
            },
            &profile,
        );
        let vector_only = combine(
            NormalizedScores {
                lexical: None,
                vector: Some(0.8),
            },
            &profile,
        );
        assert_eq!(lexical_only, 0.8);
        assert_eq!(vector_only, 0.8);
    }

    #[test]
    fn test_weighted_profile() {
        let profile = RankingProfile {
            lexical_weight: 0.25,
            vector_weight: 0.75,
            ..RankingProfile::default()
        };
        let combined = combine(
            NormalizedScores {
                lexical: Some(0.0),
                vector: Some(1.0),
            },
            &profile,
        );
        assert!((combined - 0.75).abs() < 1e-6);
    }
}
