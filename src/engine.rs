//! Search engine facade: the ingestion and query APIs
//!
//! Owns the document store, the in-memory index and the query pipeline. The
//! store is the source of truth; the index is rebuilt from it on open and
//! follows every mutation.

use crate::api::{
    ClearResponse, FailedItem, IngestRequest, IngestResponse, SearchResponse, StatusResponse,
};
use crate::config::{Config, ConfigValidator};
use crate::document::{ContentType, Document, NewDocument};
use crate::embedding::{
    self, BulkIndexer, BulkIndexerOptions, DescriptionProvider, EmbeddingProvider, IndexJob,
};
use crate::error::{QuarryError, Result};
use crate::index::{Analyzer, DocumentState, IndexEngine};
use crate::retrieval::{HybridSearcher, QueryPlanner, Ranker, ResultAssembler, SearchQuery};
use crate::runtime::run_blocking;
use crate::storage::{BulkPutResult, DocumentStore, FailedDocument, Scope, StoredDocument};
use ahash::{AHashMap, AHashSet};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub struct SearchEngine {
    config: Config,
    store: DocumentStore,
    index: Arc<IndexEngine>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    indexer: Arc<BulkIndexer>,
    searcher: HybridSearcher,
}

impl SearchEngine {
    /// Open with the configured embedding provider and no describer
    pub async fn open(config: Config) -> Result<Self> {
        let embedding_config = config.embedding.clone();
        // Model loading is blocking and may download weights, so no deadline here
        let embedder = tokio::task::spawn_blocking(move || {
            embedding::provider_from_config(&embedding_config)
        })
        .await
        .map_err(|e| QuarryError::Internal(format!("embedding provider init failed: {}", e)))??;

        Self::with_providers(config, embedder, None).await
    }

    /// Open with explicit collaborators
    ///
    /// The describer only runs when `enrichment.enabled` is set.
    pub async fn with_providers(
        config: Config,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        describer: Option<Arc<dyn DescriptionProvider>>,
    ) -> Result<Self> {
        ConfigValidator::validate(&config)?;

        let dimension = config.embedding.dimension;
        if let Some(provider) = &embedder {
            embedding::check_dimension(provider.as_ref(), dimension)?;
        }

        let storage = config.storage.clone();
        let store = run_blocking("open store", config.storage.timeout(), move || {
            DocumentStore::open(&storage, dimension)
        })
        .await?;

        let analyzer = Analyzer::new(config.indexing.max_token_len);
        let index = Arc::new(IndexEngine::with_analyzer(
            &config.indexing,
            dimension,
            analyzer.clone(),
        ));

        let describer = if config.enrichment.enabled {
            describer
        } else {
            None
        };

        let options = BulkIndexerOptions {
            workers: config.indexing.ingest_workers,
            batch_size: config.embedding.batch_size,
            embed_timeout: config.embedding.timeout(),
            describe_timeout: config.enrichment.timeout(),
            storage_timeout: config.storage.timeout(),
        };
        let indexer = Arc::new(BulkIndexer::new(
            Arc::clone(&index),
            store.clone(),
            embedder.clone(),
            describer,
            options,
        ));

        let planner = QueryPlanner::new(
            analyzer.clone(),
            embedder.clone(),
            config.embedding.timeout(),
            dimension,
            &config.query,
        )?;
        let searcher = HybridSearcher::new(
            Arc::clone(&index),
            planner,
            Ranker::new(config.ranking.clone()),
            ResultAssembler::new(config.query.max_page_size).with_highlights(
                analyzer,
                config.ranking.snippet_width,
                config.ranking.max_highlights,
            ),
            config.query.default_page_size,
        );

        let engine = Self {
            config,
            store,
            index,
            embedder,
            indexer,
            searcher,
        };
        engine.rebuild().await?;
        Ok(engine)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn index(&self) -> &Arc<IndexEngine> {
        &self.index
    }

    fn storage_timeout(&self) -> Duration {
        self.config.storage.timeout()
    }

    /// Load every stored document into the index
    ///
    /// Stored embeddings are reused; documents without one are embedded again
    /// when a provider is present. Every indexed document is marked clean.
    async fn rebuild(&self) -> Result<()> {
        let store = self.store.clone();
        let (jobs, dirty) = run_blocking("load documents", self.storage_timeout(), move || {
            let dirty = store.dirty_ids()?.len();
            let jobs = store
                .list(Scope::All)?
                .into_iter()
                .map(|document| {
                    let embedding = store.get_embedding(&document.id)?;
                    Ok(IndexJob {
                        document,
                        embedding,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok((jobs, dirty))
        })
        .await?;

        if jobs.is_empty() {
            info!("Opened empty document store");
            return Ok(());
        }

        info!(
            "Rebuilding index from {} stored documents ({} dirty)",
            jobs.len(),
            dirty
        );
        let result = self.indexer.process(jobs).await;
        self.index.refresh().await;

        if !result.failed.is_empty() {
            warn!(
                "{} documents could not be indexed during rebuild and stay dirty",
                result.failed.len()
            );
        }
        Ok(())
    }

    // ---- Ingestion API ----

    /// `POST index`
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestResponse> {
        let mut origins = Vec::with_capacity(request.documents.len() + request.images.len());
        let mut docs = Vec::with_capacity(origins.capacity());

        for mut doc in request.documents {
            if doc.content_type.is_none() {
                doc.content_type = Some(ContentType::Web.as_str().to_string());
            }
            origins.push(false);
            docs.push(doc);
        }
        for mut doc in request.images {
            doc.content_type = Some(ContentType::Image.as_str().to_string());
            origins.push(true);
            docs.push(doc);
        }

        let store = self.store.clone();
        let outcomes = run_blocking("store documents", self.storage_timeout(), move || {
            store.bulk_upsert(docs)
        })
        .await?;

        let mut response = IngestResponse::default();
        let mut stored: Vec<(bool, String)> = Vec::new();
        let mut jobs = Vec::new();

        for (is_image, outcome) in origins.into_iter().zip(outcomes) {
            match outcome {
                Ok(doc) => {
                    stored.push((is_image, doc.document.id.clone()));
                    if let Some(job) = self.job_for(doc)? {
                        jobs.push(job);
                    }
                }
                Err(failed) => response.failed.push(FailedItem {
                    id: failed.id(),
                    reason: failed.reason,
                    error: failed.kind,
                }),
            }
        }

        let result = self.indexer.process(jobs).await;
        let index_failed: AHashSet<&str> = result.failed.iter().map(|f| f.id.as_str()).collect();

        for (is_image, id) in &stored {
            if index_failed.contains(id.as_str()) {
                continue;
            }
            if *is_image {
                response.indexed.images += 1;
            } else {
                response.indexed.documents += 1;
            }
        }
        for failure in &result.failed {
            response.failed.push(FailedItem {
                id: Some(failure.id.clone()),
                reason: failure.error.to_string(),
                error: failure.error.kind(),
            });
        }

        info!(
            "Ingested {} documents, {} images, {} failed",
            response.indexed.documents,
            response.indexed.images,
            response.failed.len()
        );
        Ok(response)
    }

    /// Index job for a stored document, or `None` if the index already holds it
    fn job_for(&self, stored: StoredDocument) -> Result<Option<IndexJob>> {
        if !stored.changed {
            let visible = self.index.get(&stored.document.id)?;
            if visible.is_some_and(|doc| doc.version == stored.document.version) {
                debug!("Document {} unchanged", stored.document.id);
                return Ok(None);
            }
        }
        Ok(Some(IndexJob {
            document: stored.document,
            embedding: stored.embedding,
        }))
    }

    /// Store and index one document, returning the stored version
    pub async fn put(&self, doc: NewDocument) -> Result<Document> {
        let store = self.store.clone();
        let stored = run_blocking("store document", self.storage_timeout(), move || {
            store.upsert(doc)
        })
        .await?;
        let document = stored.document.clone();

        if let Some(job) = self.job_for(stored)? {
            let mut result = self.indexer.process(vec![job]).await;
            if let Some(failure) = result.failed.pop() {
                return Err(failure.error);
            }
        }
        Ok(document)
    }

    /// Store many documents and index the ones that stored cleanly
    ///
    /// A document that stored but failed to index moves from `succeeded` to
    /// `failed`; its row stays dirty and is picked up by the next rebuild.
    pub async fn bulk_put(&self, docs: Vec<NewDocument>) -> Result<BulkPutResult> {
        let store = self.store.clone();
        let outcomes = run_blocking("store documents", self.storage_timeout(), move || {
            store.bulk_upsert(docs)
        })
        .await?;

        let mut result = BulkPutResult::default();
        let mut jobs = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(stored) => {
                    result.succeeded.push(stored.document.id.clone());
                    if let Some(job) = self.job_for(stored)? {
                        jobs.push(job);
                    }
                }
                Err(failed) => result.failed.push(failed),
            }
        }

        let pending: AHashMap<String, NewDocument> = jobs
            .iter()
            .map(|job| (job.document.id.clone(), NewDocument::from(&job.document)))
            .collect();
        let indexed = self.indexer.process(jobs).await;

        for failure in indexed.failed {
            result.succeeded.retain(|id| *id != failure.id);
            let document = pending.get(&failure.id).cloned().unwrap_or_else(|| NewDocument {
                id: Some(failure.id.clone()),
                ..NewDocument::default()
            });
            result
                .failed
                .push(FailedDocument::new(document, &failure.error));
        }
        Ok(result)
    }

    pub async fn get(&self, id: &str) -> Result<Document> {
        let store = self.store.clone();
        let id = id.to_string();
        run_blocking("get document", self.storage_timeout(), move || store.get(&id)).await
    }

    /// Delete from the store, then from the index
    ///
    /// The document guard is held across both steps, so an index job for `id`
    /// still embedding or describing cannot commit once the row is gone. The
    /// index removal runs even when the store reports `NotFound`, so an index
    /// that lags behind the store is brought back in line.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let guard = self.index.lock_document(id).await;

        let store = self.store.clone();
        let owned = id.to_string();
        let deleted = run_blocking("delete document", self.storage_timeout(), move || {
            store.delete(&owned)
        })
        .await;

        guard.remove()?;
        deleted
    }

    /// `DELETE index?scope=`
    pub async fn clear(&self, scope: Scope) -> Result<ClearResponse> {
        let store = self.store.clone();
        let removed = run_blocking("clear documents", self.storage_timeout(), move || {
            store.delete_by_scope(scope)
        })
        .await?;

        if scope == Scope::All {
            self.index.clear().await?;
        }
        // Removed ids go through the per-document guard even after a full
        // clear, which waits out index jobs that passed their store check
        let mut ids: BTreeSet<String> = removed.iter().cloned().collect();
        ids.extend(self.index.ids_where(|doc| scope.contains(doc.content_type))?);
        for id in ids {
            self.index.remove_document(&id).await?;
        }

        info!("Cleared {} ({} documents)", scope, removed.len());
        Ok(ClearResponse {
            cleared: scope,
            removed: removed.len(),
        })
    }

    // ---- Query API ----

    /// `POST search`
    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResponse> {
        let start = Instant::now();
        let page = self.searcher.search(query).await?;
        let took_ms = start.elapsed().as_millis() as u64;
        debug!(
            "Search {:?} returned {} of {} in {}ms",
            query.text,
            page.results.len(),
            page.total,
            took_ms
        );
        Ok(SearchResponse::from_page(page, took_ms))
    }

    /// Wait until every mutation issued so far is searchable
    pub async fn refresh(&self) {
        self.index.refresh().await;
    }

    pub fn document_state(&self, id: &str) -> Result<DocumentState> {
        self.index.document_state(id)
    }

    pub async fn status(&self) -> Result<StatusResponse> {
        let store = self.store.clone();
        let (db, images) = run_blocking("status", self.storage_timeout(), move || {
            Ok((store.database().stats()?, store.count(Scope::Images)?))
        })
        .await?;

        Ok(StatusResponse {
            documents: db.document_count,
            images,
            embeddings: db.embedding_count,
            dirty: db.dirty_count,
            compressed: db.compressed_count,
            index: self.index.stats()?,
            embedding_model: self.embedder.as_ref().map(|e| e.model_name().to_string()),
            dimension: self.config.embedding.dimension,
            enrichment: self.config.enrichment.enabled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::IndexedCounts;
    use crate::embedding::{DescribeError, EmbeddingError};
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    struct ConstantProvider;

    impl EmbeddingProvider for ConstantProvider {
        fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            Ok(vec![0.5, 0.5, 0.5, 0.5])
        }

        fn embed_batch(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            texts.iter().map(|t| self.embed(t)).collect()
        }

        fn dimension(&self) -> usize {
            4
        }

        fn model_name(&self) -> &str {
            "constant"
        }
    }

    struct KeywordDescriber;

    impl DescriptionProvider for KeywordDescriber {
        fn describe(&self, _document: &Document) -> std::result::Result<String, DescribeError> {
            Ok("zebra crossing".to_string())
        }

        fn name(&self) -> &str {
            "keyword"
        }
    }

    fn config(dir: &TempDir) -> Config {
        let mut config = Config::with_data_dir(dir.path());
        config.embedding.dimension = 4;
        config
    }

    async fn engine(dir: &TempDir) -> SearchEngine {
        SearchEngine::with_providers(config(dir), Some(Arc::new(ConstantProvider)), None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_ingest_counts_and_failures() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;

        let response = engine
            .ingest(IngestRequest {
                documents: vec![
                    NewDocument::new("d1", "Rust ownership", "Borrowing rules explained"),
                    NewDocument::new("d3", "", "No title"),
                ],
                images: vec![NewDocument::new("i1", "Sunset", "Orange sky over water")],
            })
            .await
            .unwrap();

        assert_eq!(response.indexed, IndexedCounts { documents: 1, images: 1 });
        assert_eq!(response.failed.len(), 1);
        assert_eq!(response.failed[0].id.as_deref(), Some("d3"));
        assert_eq!(response.failed[0].error, ErrorKind::ValidationError);

        let image = engine.get("i1").await.unwrap();
        assert_eq!(image.content_type, ContentType::Image);
    }

    #[tokio::test]
    async fn test_put_then_search() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;

        engine
            .put(NewDocument::new("d1", "Machine Learning Basics", "Neural networks"))
            .await
            .unwrap();
        engine.refresh().await;

        let response = engine.search(&SearchQuery::new("neural")).await.unwrap();
        assert_eq!(response.total, 1);
        assert_eq!(response.results[0].id(), "d1");
        assert!(response.results[0].candidate.in_both_paths());
    }

    #[tokio::test]
    async fn test_delete_removes_from_index_and_store() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;
        engine
            .put(NewDocument::new("d1", "Title words", "Body words"))
            .await
            .unwrap();

        engine.delete("d1").await.unwrap();
        assert_eq!(
            engine.get("d1").await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(engine.document_state("d1").unwrap(), DocumentState::Absent);

        let err = engine.delete("d1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_clear_images_only() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;
        engine
            .ingest(IngestRequest {
                documents: vec![NewDocument::new("d1", "Lake", "Calm lake water")],
                images: vec![NewDocument::new("i1", "Lake photo", "Lake at dawn")],
            })
            .await
            .unwrap();

        let cleared = engine.clear(Scope::Images).await.unwrap();
        assert_eq!(cleared.removed, 1);

        engine.refresh().await;
        let response = engine.search(&SearchQuery::new("lake")).await.unwrap();
        let ids: Vec<&str> = response.results.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["d1"]);
    }

    #[tokio::test]
    async fn test_reopen_rebuilds_index() {
        let dir = TempDir::new().unwrap();
        {
            let engine = engine(&dir).await;
            engine
                .put(NewDocument::new("d1", "Persistent", "Survives a restart"))
                .await
                .unwrap();
        }

        let reopened = engine(&dir).await;
        let response = reopened.search(&SearchQuery::new("restart")).await.unwrap();
        assert_eq!(response.total, 1);

        let status = reopened.status().await.unwrap();
        assert_eq!(status.documents, 1);
        assert_eq!(status.dirty, 0);
        assert_eq!(status.embeddings, 1);
        assert_eq!(status.index.vectors, 1);
    }

    #[tokio::test]
    async fn test_description_indexed_when_enrichment_enabled() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.enrichment.enabled = true;
        let engine = SearchEngine::with_providers(config, None, Some(Arc::new(KeywordDescriber)))
            .await
            .unwrap();

        engine
            .put(NewDocument::new("d1", "Street photo", "A busy road"))
            .await
            .unwrap();
        engine.refresh().await;

        let response = engine.search(&SearchQuery::new("zebra")).await.unwrap();
        assert_eq!(response.total, 1);
        assert_eq!(
            engine.get("d1").await.unwrap().description.as_deref(),
            Some("zebra crossing")
        );
    }

    #[tokio::test]
    async fn test_provider_dimension_must_match() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.embedding.dimension = 8;
        let result =
            SearchEngine::with_providers(config, Some(Arc::new(ConstantProvider)), None).await;
        assert!(matches!(
            result,
            Err(QuarryError::DimensionMismatch {
                expected: 8,
                actual: 4
            })
        ));
    }
}
