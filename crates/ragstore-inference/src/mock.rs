//! Mock embedding backend for deterministic testing.
//!
//! Texts with an explicit mapping get exactly that vector, so tests can
//! place chunks at known distances from a query. Everything else gets a
//! stable hashed vector.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ragstore_inference::MockEmbeddingBackend;
//! use ragstore_core::EmbeddingBackend;
//!
//! let backend = MockEmbeddingBackend::new(3)
//!     .with_mapping("north", vec![0.0, 1.0, 0.0]);
//! let v = backend.embed_query("north").await.unwrap();
//! assert_eq!(v.as_slice(), &[0.0, 1.0, 0.0]);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use ragstore_core::{EmbeddingBackend, Error, Result, Vector};

use crate::offload::HashEmbeddingModel;

/// Mock embedding backend.
#[derive(Clone)]
pub struct MockEmbeddingBackend {
    dimension: usize,
    mappings: HashMap<String, Vec<f32>>,
    fallback: HashEmbeddingModel,
    fail_with: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl MockEmbeddingBackend {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            mappings: HashMap::new(),
            fallback: HashEmbeddingModel::new(dimension),
            fail_with: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Embed `text` as exactly `vector`.
    pub fn with_mapping(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.mappings.insert(text.into(), vector);
        self
    }

    /// Fail every call with an embedding error.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.fail_with = Some(message.into());
        self
    }

    /// Number of `embed_texts` calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingBackend for MockEmbeddingBackend {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_with {
            return Err(Error::Embedding(message.clone()));
        }
        Ok(texts
            .iter()
            .map(|t| {
                let v = self
                    .mappings
                    .get(t)
                    .cloned()
                    .unwrap_or_else(|| self.fallback.embed_one(t));
                Vector::from(v)
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}
