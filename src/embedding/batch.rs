/// Bounded-concurrency bulk indexing
use super::{DescriptionProvider, EmbeddingProvider};
use crate::document::Document;
use crate::error::{QuarryError, Result};
use crate::index::IndexEngine;
use crate::runtime::run_blocking;
use crate::storage::DocumentStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// A stored document waiting to be indexed
#[derive(Debug, Clone)]
pub struct IndexJob {
    pub document: Document,
    /// Caller-supplied or previously stored embedding
    pub embedding: Option<Vec<f32>>,
}

/// Document that was stored but could not be indexed
#[derive(Debug)]
pub struct IndexFailure {
    pub id: String,
    pub error: QuarryError,
}

/// Result of bulk indexing
#[derive(Debug, Default)]
pub struct BulkIndexResult {
    /// Indexed ids, in input order
    pub indexed: Vec<String>,
    pub failed: Vec<IndexFailure>,
    /// Documents indexed with a vector
    pub vectors: usize,
    pub duration_ms: u64,
}

/// Timeouts and limits used by the bulk indexer
#[derive(Debug, Clone, Copy)]
pub struct BulkIndexerOptions {
    pub workers: usize,
    pub batch_size: usize,
    pub embed_timeout: Duration,
    pub describe_timeout: Duration,
    pub storage_timeout: Duration,
}

/// Bulk indexer: embeds missing vectors in batches, then indexes documents
/// on a fixed-size worker pool
///
/// Per-document failures are collected, never retried.
pub struct BulkIndexer {
    index: Arc<IndexEngine>,
    store: DocumentStore,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    describer: Option<Arc<dyn DescriptionProvider>>,
    options: BulkIndexerOptions,
}

impl BulkIndexer {
    pub fn new(
        index: Arc<IndexEngine>,
        store: DocumentStore,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        describer: Option<Arc<dyn DescriptionProvider>>,
        options: BulkIndexerOptions,
    ) -> Self {
        Self {
            index,
            store,
            embedder,
            describer,
            options,
        }
    }

    /// Index a batch of stored documents
    pub async fn process(self: &Arc<Self>, mut jobs: Vec<IndexJob>) -> BulkIndexResult {
        let start = std::time::Instant::now();
        let total = jobs.len();
        debug!("Indexing batch of {} documents", total);

        self.embed_missing(&mut jobs).await;

        let semaphore = Arc::new(Semaphore::new(self.options.workers.max(1)));
        let mut tasks = JoinSet::new();

        for (position, job) in jobs.into_iter().enumerate() {
            let this = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let id = job.document.id.clone();
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => this.index_one(job).await,
                    Err(_) => Err(QuarryError::Internal("worker pool closed".to_string())),
                };
                (position, id, outcome)
            });
        }

        let mut outcomes = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!("Indexing task failed to complete: {}", e),
            }
        }
        outcomes.sort_by_key(|(position, _, _)| *position);

        let mut result = BulkIndexResult::default();
        for (_, id, outcome) in outcomes {
            match outcome {
                Ok(vector_indexed) => {
                    if vector_indexed {
                        result.vectors += 1;
                    }
                    result.indexed.push(id);
                }
                Err(error) => {
                    warn!("Failed to index {}: {}", id, error);
                    result.failed.push(IndexFailure { id, error });
                }
            }
        }
        result.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Indexed {} documents ({} with vectors), {} failed, {}ms",
            result.indexed.len(),
            result.vectors,
            result.failed.len(),
            result.duration_ms
        );
        result
    }

    /// Fill in embeddings for jobs without one, a batch at a time
    ///
    /// Provider failures leave the affected documents lexical-only.
    async fn embed_missing(&self, jobs: &mut [IndexJob]) {
        let Some(embedder) = &self.embedder else {
            return;
        };

        let missing: Vec<usize> = jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| job.embedding.is_none())
            .map(|(i, _)| i)
            .collect();

        for chunk in missing.chunks(self.options.batch_size.max(1)) {
            let texts: Vec<String> = chunk
                .iter()
                .map(|&i| jobs[i].document.embedding_text())
                .collect();

            let provider = Arc::clone(embedder);
            let embedded = run_blocking("embed batch", self.options.embed_timeout, move || {
                provider.embed_batch(&texts).map_err(QuarryError::from)
            })
            .await;

            let vectors = match embedded {
                Ok(vectors) if vectors.len() == chunk.len() => vectors,
                Ok(vectors) => {
                    warn!(
                        "Embedding provider returned {} vectors for {} texts; indexing lexical only",
                        vectors.len(),
                        chunk.len()
                    );
                    continue;
                }
                Err(e) => {
                    warn!("Embedding unavailable, indexing lexical only: {}", e);
                    continue;
                }
            };

            let mut persisted = Vec::with_capacity(chunk.len());
            for (&i, vector) in chunk.iter().zip(vectors) {
                persisted.push((
                    jobs[i].document.id.clone(),
                    jobs[i].document.version,
                    vector.clone(),
                ));
                jobs[i].embedding = Some(vector);
            }

            let store = self.store.clone();
            let model = embedder.model_name().to_string();
            let saved = run_blocking("store embeddings", self.options.storage_timeout, move || {
                for (id, version, vector) in &persisted {
                    store.put_embedding(id, *version, vector, Some(&model))?;
                }
                Ok(())
            })
            .await;
            if let Err(e) = saved {
                // Indexing proceeds; the vector is recomputed on the next rebuild
                warn!("Failed to persist embeddings: {}", e);
            }
        }
    }

    async fn index_one(&self, job: IndexJob) -> Result<bool> {
        let IndexJob {
            mut document,
            embedding,
        } = job;

        if let Some(describer) = &self.describer {
            if document.description.is_none() {
                document.description = self.describe(describer, &document).await;
            }
        }

        let id = document.id.clone();
        let version = document.version;

        // A delete or newer upsert may have landed while embedding or
        // describing; deletes take the same guard, so the check holds until commit
        let guard = self.index.lock_document(&id).await;
        let store = self.store.clone();
        let (check_id, hash) = (id.clone(), document.content_hash.clone());
        let current = run_blocking("check document", self.options.storage_timeout, move || {
            store.is_current(&check_id, version, &hash)
        })
        .await?;
        if !current {
            debug!("Skipping superseded version {} of {}", version, id);
            return Ok(false);
        }

        let outcome = guard.index(Arc::new(document), embedding.as_deref())?;
        drop(guard);

        let store = self.store.clone();
        let cleaned = run_blocking("mark clean", self.options.storage_timeout, move || {
            store.mark_clean(&id, version)
        })
        .await;
        if let Err(e) = cleaned {
            warn!("Indexed document left dirty: {}", e);
        }

        Ok(outcome.vector_indexed)
    }

    async fn describe(
        &self,
        describer: &Arc<dyn DescriptionProvider>,
        document: &Document,
    ) -> Option<String> {
        let provider = Arc::clone(describer);
        let snapshot = document.clone();
        let described = run_blocking("describe", self.options.describe_timeout, move || {
            provider.describe(&snapshot).map_err(QuarryError::from)
        })
        .await;

        let description = match described {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => return None,
            Err(e) => {
                warn!("No description for {}: {}", document.id, e);
                return None;
            }
        };

        let store = self.store.clone();
        let id = document.id.clone();
        let version = document.version;
        let text = description.clone();
        let saved = run_blocking("store description", self.options.storage_timeout, move || {
            store.set_description(&id, version, &text)
        })
        .await;
        if let Err(e) = saved {
            warn!("Failed to persist description for {}: {}", document.id, e);
        }

        Some(description)
    }
}
