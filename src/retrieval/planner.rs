//! Query planning: filter extraction, tokenisation, retrieval path selection

use crate::config::QueryConfig;
use crate::document::ContentType;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::{QuarryError, Result};
use crate::index::{Analyzer, ScoredDocument, SearchFilters};
use crate::retrieval::CandidateResult;
use ahash::AHashMap;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;

/// Inline filter syntax: `category:X`, `tag:Y`, `type:Z`, values optionally quoted
const FILTER_PATTERN: &str = r#"(?i)(?:^|\s)(category|tag|type):(?:"([^"]*)"|(\S+))"#;

/// Which retrieval paths a plan runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalPaths {
    pub lexical: bool,
    pub vector: bool,
}

/// Executable form of a raw query
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub raw: String,
    /// Free text left after filter extraction, whitespace-normalised
    pub text: String,
    /// Unique analysed terms in first-occurrence order
    pub terms: Vec<String>,
    pub filters: SearchFilters,
    /// Query embedding, present only when the vector path runs
    pub embedding: Option<Vec<f32>>,
    pub paths: RetrievalPaths,
    /// Candidates requested from each path
    pub candidate_limit: usize,
    /// Reference time for freshness scoring
    pub now: DateTime<Utc>,
}

/// Raw query split into free text and inline filters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    pub text: String,
    pub filters: SearchFilters,
}

/// Turns raw query strings into [`QueryPlan`]s
pub struct QueryPlanner {
    analyzer: Analyzer,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    embed_timeout: Duration,
    dimension: usize,
    candidate_limit: usize,
    filter_regex: Regex,
}

impl QueryPlanner {
    pub fn new(
        analyzer: Analyzer,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        embed_timeout: Duration,
        dimension: usize,
        config: &QueryConfig,
    ) -> Result<Self> {
        let filter_regex = Regex::new(FILTER_PATTERN)
            .map_err(|e| QuarryError::Internal(format!("Invalid filter pattern: {}", e)))?;

        Ok(Self {
            analyzer,
            embedder,
            embed_timeout,
            dimension,
            candidate_limit: config.candidate_limit,
            filter_regex,
        })
    }

    /// Tokenise exactly as the index engine does
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        self.analyzer.tokenize(text)
    }

    /// Extract inline filters, leaving the remaining free text
    pub fn parse(&self, raw: &str) -> Result<ParsedQuery> {
        let mut filters = SearchFilters::default();

        for captures in self.filter_regex.captures_iter(raw) {
            let key = captures
                .get(1)
                .map(|m| m.as_str().to_ascii_lowercase())
                .unwrap_or_default();
            let value = captures
                .get(2)
                .or_else(|| captures.get(3))
                .map(|m| m.as_str().trim())
                .unwrap_or_default();
            if value.is_empty() {
                continue;
            }

            match key.as_str() {
                "category" => filters.category = Some(value.to_string()),
                "tag" => {
                    filters.tags.insert(value.to_lowercase());
                }
                "type" => {
                    let content_type = ContentType::parse(value).ok_or_else(|| {
                        QuarryError::InvalidQuery(format!(
                            "unknown content type '{}', expected web, image or video",
                            value
                        ))
                    })?;
                    filters.content_types.insert(content_type);
                }
                _ => {}
            }
        }

        let remaining = self.filter_regex.replace_all(raw, " ");
        let text = remaining.split_whitespace().collect::<Vec<_>>().join(" ");

        Ok(ParsedQuery { text, filters })
    }

    /// Plan a query
    ///
    /// `request_filters` come from the API body. Tags are unioned with inline
    /// tags; an inline category overrides the request category.
    pub async fn plan(&self, raw: &str, request_filters: &SearchFilters) -> Result<QueryPlan> {
        let parsed = self.parse(raw)?;

        let mut filters = request_filters.clone();
        filters.tags = filters
            .tags
            .iter()
            .map(|tag| tag.trim().to_lowercase())
            .filter(|tag| !tag.is_empty())
            .collect();
        if parsed.filters.category.is_some() {
            filters.category = parsed.filters.category;
        }
        filters.tags.extend(parsed.filters.tags);
        filters.content_types.extend(parsed.filters.content_types);

        let terms = self.analyzer.unique_terms(&parsed.text);
        if terms.is_empty() {
            return Err(QuarryError::InvalidQuery(if raw.trim().is_empty() {
                "query is empty".to_string()
            } else {
                format!("query '{}' has no searchable terms", raw.trim())
            }));
        }

        let embedding = self.embed_query(&parsed.text).await;
        let paths = RetrievalPaths {
            lexical: true,
            vector: embedding.is_some(),
        };

        tracing::debug!(
            "Planned query {:?}: {} terms, vector path {}",
            parsed.text,
            terms.len(),
            paths.vector
        );

        Ok(QueryPlan {
            raw: raw.to_string(),
            text: parsed.text,
            terms,
            filters,
            embedding,
            paths,
            candidate_limit: self.candidate_limit,
            now: Utc::now(),
        })
    }

    /// Query embedding, or `None` when the vector path cannot run
    async fn embed_query(&self, text: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;

        match embedding::embed_text(embedder, text, self.embed_timeout).await {
            Ok(vector) if vector.len() == self.dimension => Some(vector),
            Ok(vector) => {
                tracing::warn!(
                    "Query embedding has dimension {}, expected {}; running lexical only",
                    vector.len(),
                    self.dimension
                );
                None
            }
            Err(e) => {
                tracing::warn!("Query embedding failed, running lexical only: {}", e);
                None
            }
        }
    }
}

/// Union lexical and vector hits by document id
///
/// Lexical hits come first in their ranked order, then vector-only hits in
/// theirs. The lexical snapshot wins when both paths saw a document.
pub fn merge_candidates(
    lexical: Vec<ScoredDocument>,
    vector: Vec<ScoredDocument>,
) -> Vec<CandidateResult> {
    let mut candidates: Vec<CandidateResult> = Vec::with_capacity(lexical.len() + vector.len());
    let mut positions: AHashMap<String, usize> = AHashMap::new();

    for hit in lexical {
        if positions.contains_key(&hit.document.id) {
            continue;
        }
        positions.insert(hit.document.id.clone(), candidates.len());
        candidates.push(CandidateResult::lexical(hit.document, hit.score));
    }

    for hit in vector {
        match positions.get(&hit.document.id) {
            Some(&position) => {
                let candidate = &mut candidates[position];
                if candidate.vector_score.is_none() {
                    candidate.vector_score = Some(hit.score);
                }
            }
            None => {
                positions.insert(hit.document.id.clone(), candidates.len());
                candidates.push(CandidateResult::vector(hit.document, hit.score));
            }
        }
    }

    candidates
}
