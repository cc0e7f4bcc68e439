//! # ragstore-inference
//!
//! Embedding backends for ragstore.
//!
//! This crate provides:
//! - Ollama implementation (default, feature `ollama`)
//! - A bounded worker pool for local CPU-bound models, with a hashing model
//! - A deterministic mock backend (feature `mock`)
//!
//! # Example
//!
//! ```rust,no_run
//! use ragstore_inference::OllamaBackend;
//! use ragstore_core::EmbeddingBackend;
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = OllamaBackend::new().unwrap();
//!     let texts = vec!["Hello".to_string()];
//!     let embeddings = backend.embed_texts(&texts).await.unwrap();
//! }
//! ```

pub mod offload;

#[cfg(feature = "ollama")]
pub mod ollama;

// Mock embedding backend for testing
#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export core types
pub use ragstore_core::*;

#[cfg(feature = "ollama")]
pub use ollama::OllamaBackend;

pub use offload::{worker_count, HashEmbeddingModel, LocalEmbeddingModel, OffloadedBackend};

#[cfg(any(test, feature = "mock"))]
pub use mock::MockEmbeddingBackend;
