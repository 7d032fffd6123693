//! Final deduplication and pagination of ranked results

use crate::error::{QuarryError, Result};
use crate::index::Analyzer;
use crate::retrieval::deduplication::deduplicate;
use crate::retrieval::highlight::extract_highlights;
use crate::retrieval::RankedResult;
use serde::{Deserialize, Serialize};

/// One page of ranked results
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
    pub results: Vec<RankedResult>,
    /// Matches before pagination, after deduplication
    pub total: usize,
    /// 0-based page index
    pub page: usize,
    pub page_size: usize,
    pub has_more: bool,
}

struct Highlighter {
    analyzer: Analyzer,
    snippet_width: usize,
    max_highlights: usize,
}

pub struct ResultAssembler {
    max_page_size: usize,
    highlighter: Option<Highlighter>,
}

impl ResultAssembler {
    pub fn new(max_page_size: usize) -> Self {
        Self {
            max_page_size,
            highlighter: None,
        }
    }

    /// Attach body snippets to the lexical matches of each returned page
    pub fn with_highlights(
        mut self,
        analyzer: Analyzer,
        snippet_width: usize,
        max_highlights: usize,
    ) -> Self {
        self.highlighter = Some(Highlighter {
            analyzer,
            snippet_width,
            max_highlights,
        });
        self
    }

    pub fn max_page_size(&self) -> usize {
        self.max_page_size
    }

    /// Validate paging arguments and convert them to `(page, page_size)`
    ///
    /// Signed arguments so negative wire values are rejected here rather than
    /// wrapping.
    pub fn validate(&self, page: i64, page_size: i64) -> Result<(usize, usize)> {
        if page < 0 {
            return Err(QuarryError::InvalidArguments(format!(
                "page must be a non-negative integer, got {}",
                page
            )));
        }
        if page_size < 1 || page_size as u64 > self.max_page_size as u64 {
            return Err(QuarryError::InvalidArguments(format!(
                "pageSize must be between 1 and {}, got {}",
                self.max_page_size, page_size
            )));
        }
        let page = usize::try_from(page)
            .map_err(|_| QuarryError::InvalidArguments(format!("page {} is too large", page)))?;
        Ok((page, page_size as usize))
    }

    /// How many ranked results a page needs to exist
    pub fn depth(&self, page: i64, page_size: i64) -> Result<usize> {
        let (page, page_size) = self.validate(page, page_size)?;
        Ok(page.saturating_add(1).saturating_mul(page_size))
    }

    /// Slice `[page*page_size, (page+1)*page_size)` of the deduplicated ranking
    ///
    /// `matched` is the number of documents the retrieval paths accepted
    /// before truncating to their candidate depth. Duplicates dropped from
    /// the ranking are taken off it. Highlights for `terms` are computed for
    /// the sliced page only.
    pub fn assemble(
        &self,
        ranked: Vec<RankedResult>,
        matched: usize,
        terms: &[String],
        page: i64,
        page_size: i64,
    ) -> Result<PageResult> {
        let (page, page_size) = self.validate(page, page_size)?;

        let retrieved = ranked.len();
        let unique = deduplicate(ranked);
        let available = unique.len();
        let total = matched
            .saturating_sub(retrieved - available)
            .max(available);
        let start = page.saturating_mul(page_size).min(available);
        let end = start.saturating_add(page_size).min(available);

        let mut results: Vec<RankedResult> =
            unique.into_iter().skip(start).take(end - start).collect();
        if let Some(highlighter) = &self.highlighter {
            for result in results
                .iter_mut()
                .filter(|result| result.candidate.lexical_score.is_some())
            {
                result.highlights = extract_highlights(
                    &highlighter.analyzer,
                    &result.candidate.snapshot.body,
                    terms,
                    highlighter.snippet_width,
                    highlighter.max_highlights,
                );
            }
        }

        Ok(PageResult {
            results,
            total,
            page,
            page_size,
            has_more: page.saturating_add(1).saturating_mul(page_size) < total,
        })
    }
}
