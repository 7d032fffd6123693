//! Exact cosine-similarity vector store
//!
//! Vectors are L2-normalised on insert so cosine similarity is a dot product.

use ahash::AHashMap;
use ndarray::{Array1, ArrayView1};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VectorError {
    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Vector has zero or non-finite norm")]
    DegenerateVector,
}

/// Normalise `vector` to unit length, checking its dimension
pub fn normalize(vector: &[f32], dimension: usize) -> Result<Array1<f32>, VectorError> {
    if vector.len() != dimension {
        return Err(VectorError::InvalidDimension {
            expected: dimension,
            actual: vector.len(),
        });
    }

    let array = ArrayView1::from(vector);
    let norm = array.dot(&array).sqrt();
    if !norm.is_finite() || norm == 0.0 {
        return Err(VectorError::DegenerateVector);
    }
    Ok(array.mapv(|v| v / norm))
}

/// In-memory store of one vector per document
#[derive(Debug, Clone)]
pub struct VectorStore {
    dimension: usize,
    vectors: AHashMap<String, Array1<f32>>,
}

impl VectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: AHashMap::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Store an already normalised vector, replacing any previous one
    pub fn insert(&mut self, id: &str, vector: Array1<f32>) {
        self.vectors.insert(id.to_string(), vector);
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.vectors.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.vectors.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn clear(&mut self) {
        self.vectors.clear();
    }

    /// Cosine similarity of every accepted vector against a normalised query
    pub fn similarities(
        &self,
        query: &Array1<f32>,
        mut accept: impl FnMut(&str) -> bool,
    ) -> Vec<(String, f32)> {
        self.vectors
            .iter()
            .filter(|(id, _)| accept(id.as_str()))
            .map(|(id, vector)| (id.clone(), vector.dot(query)))
            .collect()
    }
}
