//! Query-time pipeline
//!
//! A raw query is planned into analysed terms, filters and an optional
//! embedding, retrieved from the lexical and vector paths, fused with min-max
//! normalisation, re-scored with quality and freshness priors, then
//! deduplicated and paginated.

mod assembler;
mod candidate;
mod deduplication;
mod fusion;
mod highlight;
mod hybrid;
mod planner;
mod ranker;

pub use assembler::{PageResult, ResultAssembler};
pub use candidate::{CandidateResult, RankedResult};
pub use deduplication::deduplicate;
pub use fusion::{combine, min_max_normalize, normalize_candidates, NormalizedScores};
pub use highlight::extract_highlights;
pub use hybrid::HybridSearcher;
pub use planner::{merge_candidates, ParsedQuery, QueryPlan, QueryPlanner, RetrievalPaths};
pub use ranker::{final_score, freshness, Ranker};

use crate::index::SearchFilters;
use serde::{Deserialize, Serialize};

/// Search query with optional filters and pagination
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Query text, may carry inline `category:`/`tag:`/`type:` filters
    pub text: String,

    #[serde(default)]
    pub filters: SearchFilters,

    /// 0-based page, defaults to 0
    pub page: Option<i64>,

    /// Defaults to `query.default_page_size`
    pub page_size: Option<i64>,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_page(mut self, page: i64, page_size: i64) -> Self {
        self.page = Some(page);
        self.page_size = Some(page_size);
        self
    }
}
