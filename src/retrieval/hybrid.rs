//! Hybrid search combining lexical and vector retrieval

use crate::error::{ErrorKind, Result};
use crate::index::IndexEngine;
use crate::retrieval::{
    merge_candidates, PageResult, QueryPlanner, Ranker, ResultAssembler, SearchQuery,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Runs a query end to end: plan, retrieve, fuse, rank, paginate
pub struct HybridSearcher {
    index: Arc<IndexEngine>,
    planner: QueryPlanner,
    ranker: Ranker,
    assembler: ResultAssembler,
    default_page_size: usize,
}

impl HybridSearcher {
    pub fn new(
        index: Arc<IndexEngine>,
        planner: QueryPlanner,
        ranker: Ranker,
        assembler: ResultAssembler,
        default_page_size: usize,
    ) -> Self {
        Self {
            index,
            planner,
            ranker,
            assembler,
            default_page_size,
        }
    }

    pub fn planner(&self) -> &QueryPlanner {
        &self.planner
    }

    pub fn ranker(&self) -> &Ranker {
        &self.ranker
    }

    /// Perform hybrid search
    pub async fn search(&self, query: &SearchQuery) -> Result<PageResult> {
        let page = query.page.unwrap_or(0);
        let page_size = query
            .page_size
            .unwrap_or(self.default_page_size as i64);

        let depth = self.assembler.depth(page, page_size)?;

        let plan = self.planner.plan(&query.text, &query.filters).await?;
        let limit = plan.candidate_limit.max(depth);

        // The lexical path always runs; the vector path is optional and never
        // fails the query
        let embedding = plan.embedding.as_deref().filter(|_| plan.paths.vector);
        let retrieval = match self
            .index
            .retrieve(&plan.terms, embedding, &plan.filters, limit)
        {
            Err(e) if embedding.is_some() && e.kind() == ErrorKind::DimensionMismatch => {
                warn!("Vector search failed, using lexical results only: {}", e);
                self.index.retrieve(&plan.terms, None, &plan.filters, limit)?
            }
            other => other?,
        };

        debug!(
            "Query {:?}: {} lexical hits, {} vector hits, {} matched",
            plan.text,
            retrieval.lexical.len(),
            retrieval.vector.len(),
            retrieval.matched
        );

        let candidates = merge_candidates(retrieval.lexical, retrieval.vector);
        let ranked = self.ranker.rank(candidates, &plan);
        self.assembler
            .assemble(ranked, retrieval.matched, &plan.terms, page, page_size)
    }
}
