//! Shared helpers for integration tests

#![allow(dead_code)]

use quarry::config::Config;
use quarry::document::NewDocument;
use quarry::embedding::{EmbeddingError, EmbeddingProvider};
use quarry::index::Analyzer;
use quarry::SearchEngine;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const TEST_DIMENSION: usize = 32;

/// Feature-hashing embedder over analysed tokens
///
/// Texts sharing stemmed terms get overlapping vectors, so similarity tracks
/// lexical overlap without a model download.
pub struct HashingEmbedder {
    analyzer: Analyzer,
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            analyzer: Analyzer::default(),
            dimension,
        }
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0.0f32; self.dimension];
        for term in self.analyzer.tokenize(text) {
            let hash = blake3::hash(term.as_bytes());
            let bytes = hash.as_bytes();
            let bucket = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
                % self.dimension;
            let sign = if bytes[4] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        if vector.iter().all(|v| *v == 0.0) {
            vector[0] = 1.0;
        }
        Ok(vector)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "feature-hashing"
    }
}

/// Hashing embedder whose batch calls take `delay`
///
/// Single-text calls used by query planning stay fast.
pub struct SlowEmbedder {
    inner: HashingEmbedder,
    delay: Duration,
}

impl SlowEmbedder {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: HashingEmbedder::new(TEST_DIMENSION),
            delay,
        }
    }
}

impl EmbeddingProvider for SlowEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.inner.embed(text)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        std::thread::sleep(self.delay);
        self.inner.embed_batch(texts)
    }

    fn dimension(&self) -> usize {
        TEST_DIMENSION
    }

    fn model_name(&self) -> &str {
        "slow-hashing"
    }
}

/// Embedder that is always down
pub struct UnavailableEmbedder;

impl EmbeddingProvider for UnavailableEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Unavailable("offline".to_string()))
    }

    fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::Unavailable("offline".to_string()))
    }

    fn dimension(&self) -> usize {
        TEST_DIMENSION
    }

    fn model_name(&self) -> &str {
        "unavailable"
    }
}

pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::with_data_dir(dir.path());
    config.embedding.dimension = TEST_DIMENSION;
    config
}

pub async fn lexical_engine(dir: &TempDir) -> SearchEngine {
    SearchEngine::with_providers(test_config(dir), None, None)
        .await
        .unwrap()
}

pub async fn hybrid_engine(dir: &TempDir) -> SearchEngine {
    SearchEngine::with_providers(
        test_config(dir),
        Some(Arc::new(HashingEmbedder::new(TEST_DIMENSION))),
        None,
    )
    .await
    .unwrap()
}

pub async fn slow_engine(dir: &TempDir, delay: Duration) -> Arc<SearchEngine> {
    Arc::new(
        SearchEngine::with_providers(test_config(dir), Some(Arc::new(SlowEmbedder::new(delay))), None)
            .await
            .unwrap(),
    )
}

/// Deterministic document generator (64-bit LCG)
pub struct SeededCorpus {
    state: u64,
}

const WORDS: &[&str] = &[
    "search", "index", "vector", "ranking", "query", "token", "stemming", "cosine", "posting",
    "document", "quality", "freshness", "snippet", "filter", "category", "embedding", "latency",
    "cluster", "shard", "replica", "cache", "compression", "parser", "lexical", "semantic",
];

impl SeededCorpus {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state >> 33
    }

    fn words(&mut self, count: usize) -> String {
        (0..count)
            .map(|_| WORDS[self.next() as usize % WORDS.len()])
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn document(&mut self, id: impl Into<String>) -> NewDocument {
        let title_len = 2 + self.next() as usize % 3;
        let body_len = 8 + self.next() as usize % 24;
        let title = self.words(title_len);
        let body = self.words(body_len);
        let quality = (self.next() % 101) as f32;
        NewDocument::new(id, title, body).with_quality(quality)
    }

    pub fn documents(&mut self, count: usize) -> Vec<NewDocument> {
        (0..count)
            .map(|i| self.document(format!("doc-{:04}", i)))
            .collect()
    }
}
