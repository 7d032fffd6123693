/// Optional description enrichment for documents
use crate::document::Document;
use crate::error::QuarryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DescribeError {
    #[error("Description provider unavailable: {0}")]
    Unavailable(String),

    #[error("Description generation failed: {0}")]
    GenerationError(String),
}

impl From<DescribeError> for QuarryError {
    fn from(e: DescribeError) -> Self {
        QuarryError::Unavailable(e.to_string())
    }
}

/// External generator of short document descriptions
///
/// The output is indexed as the `description` field. Blocking, like
/// [`super::EmbeddingProvider`]; failures never block indexing.
pub trait DescriptionProvider: Send + Sync {
    fn describe(&self, document: &Document) -> Result<String, DescribeError>;

    fn name(&self) -> &str;
}
