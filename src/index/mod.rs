//! Index engine: inverted lexical index plus dense vector store
//!
//! Both structures live behind one state lock and a document's postings,
//! vector and metadata snapshot are swapped in a single short critical
//! section. Searches therefore see either the previous visible version of a
//! document or the new one, never a mix. Tokenisation and vector
//! normalisation are done before the lock is taken.

pub mod analysis;
pub mod coordination;
pub mod lexical;
pub mod vector;

use crate::config::IndexingConfig;
use crate::document::{ContentType, Document};
use crate::error::{QuarryError, Result};
use ahash::{AHashMap, AHashSet};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use analysis::{AnalyzedToken, Analyzer};
pub use coordination::DocumentState;
pub use lexical::{Bm25Params, FieldTokens, LexicalIndex, Posting, PostingList, TextField};
pub use vector::{VectorError, VectorStore};

use coordination::{Lifecycle, MutationTicket, RefreshBarrier, ShardedLocks};
use tokio::sync::MutexGuard as AsyncMutexGuard;

/// Metadata filters applied by both retrieval paths
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Case-insensitive equality
    pub category: Option<String>,
    /// Document must carry every tag
    pub tags: BTreeSet<String>,
    /// Document type must be one of these; empty means any
    pub content_types: BTreeSet<ContentType>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.category.is_none() && self.tags.is_empty() && self.content_types.is_empty()
    }

    pub fn matches(&self, document: &Document) -> bool {
        if let Some(category) = &self.category {
            let matches = document
                .category
                .as_deref()
                .is_some_and(|c| c.to_lowercase() == category.to_lowercase());
            if !matches {
                return false;
            }
        }

        if !self.tags.iter().all(|tag| document.tags.contains(tag)) {
            return false;
        }

        self.content_types.is_empty() || self.content_types.contains(&document.content_type)
    }
}

/// A search hit with the document version it was scored against
#[derive(Debug, Clone)]
pub struct ScoredDocument {
    pub document: Arc<Document>,
    pub score: f32,
}

/// Hits from both retrieval paths plus the untruncated match count
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub lexical: Vec<ScoredDocument>,
    pub vector: Vec<ScoredDocument>,
    pub matched: usize,
}

/// What `index_document` actually applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOutcome {
    /// False when the embedding was missing, mismatched or degenerate
    pub vector_indexed: bool,
    /// True when a newer version was already visible and nothing changed
    pub stale: bool,
}

/// Index size counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub documents: usize,
    pub vectors: usize,
    pub terms: usize,
    pub postings: usize,
    pub pending_mutations: usize,
}

#[derive(Debug, Clone)]
struct IndexedDoc {
    document: Arc<Document>,
    /// Ingestion order, assigned on first commit, kept across updates
    sequence: u64,
}

#[derive(Debug)]
struct IndexState {
    docs: AHashMap<String, IndexedDoc>,
    lexical: LexicalIndex,
    vectors: VectorStore,
    next_sequence: u64,
}

impl IndexState {
    fn sequence_of(&self, id: &str) -> u64 {
        self.docs.get(id).map_or(u64::MAX, |doc| doc.sequence)
    }

    /// Score desc, then ingestion order, then id
    fn rank(&self, mut hits: Vec<(String, f32)>, limit: usize) -> Vec<ScoredDocument> {
        hits.sort_by(|(a_id, a), (b_id, b)| {
            b.total_cmp(a)
                .then_with(|| self.sequence_of(a_id).cmp(&self.sequence_of(b_id)))
                .then_with(|| a_id.cmp(b_id))
        });
        hits.truncate(limit);

        hits.into_iter()
            .filter_map(|(id, score)| {
                self.docs.get(&id).map(|doc| ScoredDocument {
                    document: Arc::clone(&doc.document),
                    score,
                })
            })
            .collect()
    }

    fn remove(&mut self, id: &str) -> bool {
        let existed = self.docs.remove(id).is_some();
        self.lexical.remove(id);
        self.vectors.remove(id);
        existed
    }
}

/// Concurrent in-memory index engine
pub struct IndexEngine {
    state: RwLock<IndexState>,
    dimension: usize,
    analyzer: Analyzer,
    params: Bm25Params,
    locks: ShardedLocks,
    barrier: Arc<RefreshBarrier>,
    lifecycle: Arc<Lifecycle>,
}

impl IndexEngine {
    pub fn new(config: &IndexingConfig, dimension: usize) -> Self {
        Self::with_analyzer(config, dimension, Analyzer::new(config.max_token_len))
    }

    pub fn with_analyzer(config: &IndexingConfig, dimension: usize, analyzer: Analyzer) -> Self {
        Self {
            state: RwLock::new(IndexState {
                docs: AHashMap::new(),
                lexical: LexicalIndex::new(),
                vectors: VectorStore::new(dimension),
                next_sequence: 0,
            }),
            dimension,
            analyzer,
            params: Bm25Params::from(config),
            locks: ShardedLocks::new(config.lock_shards),
            barrier: Arc::new(RefreshBarrier::new()),
            lifecycle: Arc::new(Lifecycle::new()),
        }
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn params(&self) -> &Bm25Params {
        &self.params
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, IndexState>> {
        self.state
            .read()
            .map_err(|_| QuarryError::Internal("index state lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, IndexState>> {
        self.state
            .write()
            .map_err(|_| QuarryError::Internal("index state lock poisoned".to_string()))
    }

    /// Analyse the indexed fields of a document
    pub fn field_tokens(&self, document: &Document) -> FieldTokens {
        [
            self.analyzer.tokenize(&document.title),
            self.analyzer.tokenize(&document.body),
            document
                .description
                .as_deref()
                .map(|d| self.analyzer.tokenize(d))
                .unwrap_or_default(),
        ]
    }

    /// Exclusive mutation access to one document id
    ///
    /// Callers that must check the store before touching the index hold the
    /// guard across both steps, so a concurrent delete of the same id either
    /// completes before the check or waits for the commit.
    pub async fn lock_document(&self, id: &str) -> DocumentGuard<'_> {
        let ticket = self.barrier.enter();
        let shard = self.locks.lock(id).await;
        DocumentGuard {
            engine: self,
            id: id.to_string(),
            _ticket: ticket,
            _shard: shard,
        }
    }

    /// Index or re-index a document
    ///
    /// The lexical portion always applies. The vector portion is skipped with
    /// a warning when `embedding` is absent, of the wrong dimension or zero.
    pub async fn index_document(
        &self,
        document: Arc<Document>,
        embedding: Option<&[f32]>,
    ) -> Result<IndexOutcome> {
        self.lock_document(&document.id)
            .await
            .index(document, embedding)
    }

    fn prepare_vector(&self, id: &str, embedding: &[f32]) -> Option<Array1<f32>> {
        match vector::normalize(embedding, self.dimension) {
            Ok(vector) => Some(vector),
            Err(e) => {
                tracing::warn!("Indexing {} without a vector: {}", id, e);
                None
            }
        }
    }

    /// Remove a document; removing an unknown id is a no-op
    pub async fn remove_document(&self, id: &str) -> Result<bool> {
        self.lock_document(id).await.remove()
    }

    /// Drop every document
    pub async fn clear(&self) -> Result<usize> {
        let _ticket = self.barrier.enter();
        let mut state = self.write()?;
        let removed = state.docs.len();
        state.docs.clear();
        state.lexical.clear();
        state.vectors.clear();
        Ok(removed)
    }

    /// BM25 search over already analysed, unique `terms`
    pub fn lexical_search(
        &self,
        terms: &[String],
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<ScoredDocument>> {
        Ok(self.retrieve(terms, None, filters, limit)?.lexical)
    }

    /// Exact cosine-similarity search
    pub fn vector_search(
        &self,
        query: &[f32],
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<ScoredDocument>> {
        Ok(self.retrieve(&[], Some(query), filters, limit)?.vector)
    }

    /// Run both retrieval paths against one snapshot
    ///
    /// Each path keeps its best `limit` hits. `matched` counts every distinct
    /// document either path accepted before truncation.
    pub fn retrieve(
        &self,
        terms: &[String],
        query_vector: Option<&[f32]>,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Retrieval> {
        let query = match query_vector.map(|v| vector::normalize(v, self.dimension)) {
            None | Some(Err(VectorError::DegenerateVector)) => None,
            Some(Ok(query)) => Some(query),
            Some(Err(VectorError::InvalidDimension { expected, actual })) => {
                return Err(QuarryError::DimensionMismatch { expected, actual });
            }
        };

        let state = self.read()?;
        let accept = |id: &str| {
            state
                .docs
                .get(id)
                .is_some_and(|doc| filters.matches(&doc.document))
        };
        let lexical_hits = if terms.is_empty() {
            Vec::new()
        } else {
            state.lexical.score(terms, &self.params, accept)
        };
        let vector_hits = match &query {
            Some(query) => state.vectors.similarities(query, accept),
            None => Vec::new(),
        };

        let matched = if vector_hits.is_empty() {
            lexical_hits.len()
        } else {
            let mut ids: AHashSet<&str> = lexical_hits.iter().map(|(id, _)| id.as_str()).collect();
            ids.extend(vector_hits.iter().map(|(id, _)| id.as_str()));
            ids.len()
        };

        Ok(Retrieval {
            lexical: state.rank(lexical_hits, limit),
            vector: state.rank(vector_hits, limit),
            matched,
        })
    }

    /// Wait until every mutation started before this call is visible
    pub async fn refresh(&self) {
        self.barrier.wait().await;
    }

    /// Lifecycle state of a document
    pub fn document_state(&self, id: &str) -> Result<DocumentState> {
        if let Some(state) = self.lifecycle.transient(id) {
            return Ok(state);
        }
        if self.read()?.docs.contains_key(id) {
            Ok(DocumentState::Visible)
        } else {
            Ok(DocumentState::Absent)
        }
    }

    /// Visible version of a document
    pub fn get(&self, id: &str) -> Result<Option<Arc<Document>>> {
        Ok(self
            .read()?
            .docs
            .get(id)
            .map(|doc| Arc::clone(&doc.document)))
    }

    pub fn has_vector(&self, id: &str) -> Result<bool> {
        Ok(self.read()?.vectors.contains(id))
    }

    /// Visible ids of documents matching `predicate`, sorted
    pub fn ids_where(&self, mut predicate: impl FnMut(&Document) -> bool) -> Result<Vec<String>> {
        let state = self.read()?;
        let mut ids: Vec<String> = state
            .docs
            .values()
            .filter(|doc| predicate(&doc.document))
            .map(|doc| doc.document.id.clone())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    pub fn stats(&self) -> Result<IndexStats> {
        let state = self.read()?;
        Ok(IndexStats {
            documents: state.docs.len(),
            vectors: state.vectors.len(),
            terms: state.lexical.term_count(),
            postings: state.lexical.posting_count(),
            pending_mutations: self.barrier.pending(),
        })
    }
}

/// Held mutation slot for one document id, see [`IndexEngine::lock_document`]
pub struct DocumentGuard<'a> {
    engine: &'a IndexEngine,
    id: String,
    _ticket: MutationTicket,
    _shard: AsyncMutexGuard<'a, ()>,
}

impl DocumentGuard<'_> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Commit `document` under this guard
    pub fn index(&self, document: Arc<Document>, embedding: Option<&[f32]>) -> Result<IndexOutcome> {
        if document.id != self.id {
            return Err(QuarryError::Internal(format!(
                "guard for {} used to index {}",
                self.id, document.id
            )));
        }
        let engine = self.engine;

        let initial = if engine.read()?.docs.contains_key(&document.id) {
            DocumentState::Updating
        } else {
            DocumentState::Indexing
        };
        let _lifecycle = engine.lifecycle.begin(&document.id, initial);

        let fields = engine.field_tokens(&document);
        let vector = match embedding {
            Some(embedding) => engine.prepare_vector(&document.id, embedding),
            None => None,
        };
        let vector_indexed = vector.is_some();

        let mut state = engine.write()?;
        if let Some(current) = state.docs.get(&document.id) {
            if current.document.version > document.version {
                tracing::debug!(
                    "Skipping stale version {} of {} (visible: {})",
                    document.version,
                    document.id,
                    current.document.version
                );
                return Ok(IndexOutcome {
                    vector_indexed: false,
                    stale: true,
                });
            }
        }

        let sequence = match state.docs.get(&document.id) {
            Some(current) => current.sequence,
            None => {
                let sequence = state.next_sequence;
                state.next_sequence += 1;
                sequence
            }
        };

        let id = document.id.clone();
        state.lexical.insert(&id, &fields);
        match vector {
            Some(vector) => state.vectors.insert(&id, vector),
            None => {
                state.vectors.remove(&id);
            }
        }
        state.docs.insert(id, IndexedDoc { document, sequence });

        Ok(IndexOutcome {
            vector_indexed,
            stale: false,
        })
    }

    /// Remove the document under this guard; a no-op when it is not indexed
    pub fn remove(&self) -> Result<bool> {
        let engine = self.engine;
        if !engine.read()?.docs.contains_key(&self.id) {
            return Ok(false);
        }
        let _lifecycle = engine.lifecycle.begin(&self.id, DocumentState::Removing);
        let removed = engine.write()?.remove(&self.id);
        Ok(removed)
    }
}
