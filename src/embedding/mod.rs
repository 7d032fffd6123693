mod batch;
mod describe;
/// External model collaborators and bulk indexing
///
/// The engine depends only on narrow capability traits:
/// - EmbeddingProvider turns text into a fixed-dimension vector
/// - DescriptionProvider produces an optional enrichment text
///
/// Both are optional; when absent or failing, indexing and search degrade
/// to lexical-only instead of failing.
mod provider;

pub use batch::{BulkIndexResult, BulkIndexer, BulkIndexerOptions, IndexFailure, IndexJob};
pub use describe::{DescribeError, DescriptionProvider};
pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};

use crate::config::EmbeddingConfig;
use crate::error::{QuarryError, Result};
use crate::runtime::run_blocking;
use std::sync::Arc;

/// Build the configured provider, checking it against the deployment dimension
pub fn provider_from_config(config: &EmbeddingConfig) -> Result<Option<Arc<dyn EmbeddingProvider>>> {
    if !config.enabled {
        tracing::info!("Embeddings disabled; search will be lexical only");
        return Ok(None);
    }

    // A model that fails to load degrades to lexical-only; a wrong dimension is fatal
    let provider = match FastEmbedProvider::new(&config.model) {
        Ok(provider) => provider,
        Err(e) => {
            tracing::warn!("Embedding provider unavailable, search will be lexical only: {}", e);
            return Ok(None);
        }
    };
    check_dimension(&provider, config.dimension)?;
    Ok(Some(Arc::new(provider)))
}

/// The provider's dimension must equal the configured one
pub fn check_dimension(provider: &dyn EmbeddingProvider, expected: usize) -> Result<()> {
    if provider.dimension() != expected {
        return Err(QuarryError::DimensionMismatch {
            expected,
            actual: provider.dimension(),
        });
    }
    Ok(())
}

/// Embed a single text under the configured deadline
pub async fn embed_text(
    provider: &Arc<dyn EmbeddingProvider>,
    text: &str,
    timeout: std::time::Duration,
) -> Result<Vec<f32>> {
    let provider = Arc::clone(provider);
    let text = text.to_string();
    run_blocking("embed query", timeout, move || {
        provider.embed(&text).map_err(QuarryError::from)
    })
    .await
}
