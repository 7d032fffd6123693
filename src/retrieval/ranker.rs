//! Composite scoring and deterministic ordering of candidates

use crate::config::{RankingConfig, RankingProfile};
use crate::retrieval::fusion::{combine, normalize_candidates};
use crate::retrieval::{CandidateResult, QueryPlan, RankedResult};
use chrono::{DateTime, Utc};

/// Ranking engine driven by per-content-type profiles
pub struct Ranker {
    config: RankingConfig,
}

impl Ranker {
    pub fn new(config: RankingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RankingConfig {
        &self.config
    }

    /// Rank with the profile of each candidate's content type
    pub fn rank(&self, candidates: Vec<CandidateResult>, plan: &QueryPlan) -> Vec<RankedResult> {
        self.rank_by(candidates, plan, |candidate| {
            self.config.profile_for(candidate.snapshot.content_type)
        })
    }

    /// Rank every candidate with one explicit profile
    pub fn rank_with_profile(
        &self,
        candidates: Vec<CandidateResult>,
        plan: &QueryPlan,
        profile: &RankingProfile,
    ) -> Vec<RankedResult> {
        self.rank_by(candidates, plan, |_| profile)
    }

    fn rank_by<'p>(
        &self,
        candidates: Vec<CandidateResult>,
        plan: &QueryPlan,
        profile_of: impl Fn(&CandidateResult) -> &'p RankingProfile,
    ) -> Vec<RankedResult> {
        let normalized = normalize_candidates(&candidates);

        let mut ranked: Vec<RankedResult> = candidates
            .into_iter()
            .zip(normalized)
            .map(|(candidate, scores)| {
                let profile = profile_of(&candidate);
                let final_score = final_score(combine(scores, profile), &candidate, profile, plan.now);

                RankedResult {
                    candidate,
                    final_score,
                    rank: 0,
                    highlights: Vec::new(),
                }
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.final_score
                .total_cmp(&a.final_score)
                .then_with(|| a.id().cmp(b.id()))
        });
        for (position, result) in ranked.iter_mut().enumerate() {
            result.rank = position + 1;
        }

        ranked
    }
}

/// `combined*relevance + quality/100*quality + freshness*freshness_weight`
pub fn final_score(
    combined: f32,
    candidate: &CandidateResult,
    profile: &RankingProfile,
    now: DateTime<Utc>,
) -> f32 {
    let quality = candidate.snapshot.quality_score / 100.0;
    let mut score = combined * profile.relevance_weight + quality * profile.quality_weight;

    if profile.freshness_weight > 0.0 {
        score += freshness(candidate.snapshot.created_at, now, profile.freshness_half_life_days)
            * profile.freshness_weight;
    }
    score
}

/// Exponential decay with the given half-life; future timestamps count as new
pub fn freshness(created_at: DateTime<Utc>, now: DateTime<Utc>, half_life_days: f32) -> f32 {
    let age_days = (now - created_at).num_milliseconds().max(0) as f64 / 86_400_000.0;
    0.5f64.powf(age_days / half_life_days as f64) as f32
}
