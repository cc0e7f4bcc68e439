//! Core traits for ragstore abstractions.
//!
//! These traits define the seams to external collaborators (embedding
//! models and notification delivery) so the store can be tested with
//! deterministic stand-ins.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{EmbeddingNotification, Vector};

// =============================================================================
// EMBEDDING
// =============================================================================

/// Backend that turns text into fixed-length vectors.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Generate embeddings for the given texts.
    ///
    /// Returns one vector per input text, in input order.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>>;

    /// Embed a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vector> {
        self.embed_texts(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("Backend returned no embedding".to_string()))
    }

    /// Get the expected dimension of embedding vectors.
    fn dimension(&self) -> usize;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

/// Check that `vectors` has one entry per text and that every entry has
/// `dimension` components.
pub fn validate_embeddings(vectors: &[Vector], expected: usize, dimension: usize) -> Result<()> {
    if vectors.len() != expected {
        return Err(Error::Embedding(format!(
            "Expected {} embeddings, backend returned {}",
            expected,
            vectors.len()
        )));
    }
    if let Some((i, v)) = vectors
        .iter()
        .enumerate()
        .find(|(_, v)| v.as_slice().len() != dimension)
    {
        return Err(Error::Embedding(format!(
            "Embedding {} has dimension {}, expected {}",
            i,
            v.as_slice().len(),
            dimension
        )));
    }
    Ok(())
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// Receives the outcome of store operations. Delivery is best-effort:
/// implementations log their own failures and never return them.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: EmbeddingNotification);
}

/// Sink that drops every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl NotificationSink for NoopNotifier {
    async fn notify(&self, notification: EmbeddingNotification) {
        tracing::debug!(
            file_id = %notification.file_id,
            namespace = %notification.namespace,
            "Notification sink disabled, dropping notification"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedBackend;

    #[async_trait]
    impl EmbeddingBackend for FixedBackend {
        async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
            Ok(texts
                .iter()
                .map(|t| Vector::from(vec![t.len() as f32, 1.0]))
                .collect())
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    #[tokio::test]
    async fn test_embed_query_uses_batch_path() {
        let v = FixedBackend.embed_query("abc").await.unwrap();
        assert_eq!(v.as_slice(), &[3.0, 1.0]);
    }

    #[test]
    fn test_validate_embeddings_count_mismatch() {
        let vectors = vec![Vector::from(vec![0.0, 1.0])];
        let err = validate_embeddings(&vectors, 2, 2).unwrap_err();
        assert!(err.to_string().contains("Expected 2 embeddings"));
    }

    #[test]
    fn test_validate_embeddings_dimension_mismatch() {
        let vectors = vec![Vector::from(vec![0.0, 1.0]), Vector::from(vec![0.0])];
        let err = validate_embeddings(&vectors, 2, 2).unwrap_err();
        assert!(err.to_string().contains("Embedding 1 has dimension 1"));
    }

    #[test]
    fn test_validate_embeddings_ok() {
        let vectors = vec![Vector::from(vec![0.0, 1.0]), Vector::from(vec![1.0, 0.0])];
        assert!(validate_embeddings(&vectors, 2, 2).is_ok());
    }

    #[tokio::test]
    async fn test_noop_notifier_accepts_notifications() {
        NoopNotifier
            .notify(EmbeddingNotification::success("f1", "alice"))
            .await;
    }
}
