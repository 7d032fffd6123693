//! Wire shapes of the ingestion and query APIs
//!
//! Field names are camelCase on the wire. These types carry no behaviour
//! beyond conversions; the engine does the work.

use crate::document::NewDocument;
use crate::error::{ErrorKind, QuarryError};
use crate::index::{IndexStats, SearchFilters};
use crate::retrieval::{PageResult, RankedResult, SearchQuery};
use crate::storage::Scope;
use serde::{Deserialize, Serialize};

/// `POST index`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestRequest {
    /// Default to `web` unless a content type is given
    #[serde(default)]
    pub documents: Vec<NewDocument>,
    /// Always stored as `image`
    #[serde(default)]
    pub images: Vec<NewDocument>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedCounts {
    pub documents: usize,
    pub images: usize,
}

/// One document the ingestion could not store or index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedItem {
    /// Caller-supplied id; absent when the document had none
    pub id: Option<String>,
    pub reason: String,
    pub error: ErrorKind,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestResponse {
    pub indexed: IndexedCounts,
    pub failed: Vec<FailedItem>,
}

/// `DELETE index?scope=`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ClearRequest {
    #[serde(default)]
    pub scope: Scope,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClearResponse {
    pub cleared: Scope,
    /// Stored documents deleted
    pub removed: usize,
}

/// Filters accepted in a search request body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestFilters {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// `POST search`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub filters: Option<RequestFilters>,
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub page_size: Option<i64>,
}

impl From<SearchRequest> for SearchQuery {
    fn from(request: SearchRequest) -> Self {
        let filters = request
            .filters
            .map(|f| SearchFilters {
                category: f.category,
                tags: f.tags.into_iter().collect(),
                ..SearchFilters::default()
            })
            .unwrap_or_default();

        SearchQuery {
            text: request.query,
            filters,
            page: request.page,
            page_size: request.page_size,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<RankedResult>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub has_more: bool,
    pub took_ms: u64,
}

impl SearchResponse {
    pub fn from_page(page: PageResult, took_ms: u64) -> Self {
        Self {
            results: page.results,
            total: page.total,
            page: page.page,
            page_size: page.page_size,
            has_more: page.has_more,
            took_ms,
        }
    }
}

/// Engine health and size counters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub documents: usize,
    pub images: usize,
    pub embeddings: usize,
    pub dirty: usize,
    pub compressed: usize,
    pub index: IndexStats,
    pub embedding_model: Option<String>,
    pub dimension: usize,
    pub enrichment: bool,
}

/// `{success: false, error, message, status}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: ErrorKind,
    pub message: String,
    pub status: u16,
}

impl From<&QuarryError> for ErrorBody {
    fn from(error: &QuarryError) -> Self {
        let kind = error.kind();
        Self {
            success: false,
            error: kind,
            message: error.to_string(),
            status: kind.status_code(),
        }
    }
}
