//! Storage layer for Quarry
//!
//! Durable document store backed by SQLite

pub mod database;
pub mod document_store;

use serde::{Deserialize, Serialize};

pub use database::{Database, DbPool, DbStats};
pub use document_store::{BulkPutResult, DocumentStore, FailedDocument, StoredDocument};

/// Subset of the corpus addressed by bulk operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    All,
    /// Everything that is not an image
    Documents,
    Images,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Documents => "documents",
            Self::Images => "images",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "all" => Some(Self::All),
            "documents" => Some(Self::Documents),
            "images" => Some(Self::Images),
            _ => None,
        }
    }

    /// Whether a document of the given type falls in this scope
    pub fn contains(&self, content_type: crate::document::ContentType) -> bool {
        use crate::document::ContentType;
        match self {
            Self::All => true,
            Self::Documents => content_type != ContentType::Image,
            Self::Images => content_type == ContentType::Image,
        }
    }

    pub(crate) fn sql_predicate(&self) -> &'static str {
        match self {
            Self::All => "1 = 1",
            Self::Documents => "content_type != 'image'",
            Self::Images => "content_type = 'image'",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
