//! Per-query candidate and ranked result structures

use crate::document::Document;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A document retrieved by at least one path for the current query
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateResult {
    pub document_id: String,

    /// Raw BM25 score, if the lexical path found it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lexical_score: Option<f32>,

    /// Raw cosine similarity, if the vector path found it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f32>,

    /// Version of the document the scores were computed against
    #[serde(rename = "document")]
    pub snapshot: Arc<Document>,
}

impl CandidateResult {
    pub fn lexical(snapshot: Arc<Document>, score: f32) -> Self {
        Self {
            document_id: snapshot.id.clone(),
            lexical_score: Some(score),
            vector_score: None,
            snapshot,
        }
    }

    pub fn vector(snapshot: Arc<Document>, score: f32) -> Self {
        Self {
            document_id: snapshot.id.clone(),
            lexical_score: None,
            vector_score: Some(score),
            snapshot,
        }
    }

    pub fn in_both_paths(&self) -> bool {
        self.lexical_score.is_some() && self.vector_score.is_some()
    }
}

/// A scored, ranked candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedResult {
    #[serde(flatten)]
    pub candidate: CandidateResult,

    pub final_score: f32,

    /// 1-based position in the full ranking
    pub rank: usize,

    /// Body snippets around matched terms
    pub highlights: Vec<String>,
}

impl RankedResult {
    pub fn id(&self) -> &str {
        &self.candidate.document_id
    }

    pub fn document(&self) -> &Document {
        &self.candidate.snapshot
    }
}
