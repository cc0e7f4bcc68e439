//! Local, CPU-bound embedding models run on a bounded worker pool.
//!
//! Embedding on the async runtime's threads would stall every other
//! request, so [`OffloadedBackend`] moves each batch onto tokio's blocking
//! pool and caps how many batches run at once. Dropping the returned future
//! stops waiting but does not interrupt a batch already running.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use ragstore_core::defaults::EMBED_WORKERS_MAX;
use ragstore_core::{EmbeddingBackend, Error, Result, Vector};

/// A synchronous embedding model.
pub trait LocalEmbeddingModel: Send + Sync + 'static {
    /// One vector per text, in order.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// Number of embedding workers: the configured value or the machine's
/// available parallelism, clamped to `1..=EMBED_WORKERS_MAX`.
pub fn worker_count(configured: Option<usize>) -> usize {
    configured
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
        .clamp(1, EMBED_WORKERS_MAX)
}

/// Runs a [`LocalEmbeddingModel`] off the async runtime.
pub struct OffloadedBackend<M: LocalEmbeddingModel> {
    model: Arc<M>,
    permits: Arc<Semaphore>,
    workers: usize,
}

impl<M: LocalEmbeddingModel> OffloadedBackend<M> {
    pub fn new(model: M, workers: usize) -> Self {
        let workers = workers.clamp(1, EMBED_WORKERS_MAX);
        info!(
            subsystem = "inference",
            component = "offload",
            model = model.model_name(),
            workers,
            "Local embedding model on bounded worker pool"
        );
        Self {
            model: Arc::new(model),
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Permits not currently held by a running batch.
    pub fn idle_workers(&self) -> usize {
        self.permits.available_permits()
    }
}

#[async_trait]
impl<M: LocalEmbeddingModel> EmbeddingBackend for OffloadedBackend<M> {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let start = Instant::now();
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("Embedding worker pool closed".to_string()))?;
        let waited_ms = start.elapsed().as_millis() as u64;

        let model = self.model.clone();
        let texts = texts.to_vec();
        let count = texts.len();
        let vectors = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            model.embed_batch(&texts)
        })
        .await
        .map_err(|e| Error::Internal(format!("Embedding worker failed: {}", e)))??;

        debug!(
            subsystem = "inference",
            component = "offload",
            op = "embed_texts",
            input_count = count,
            waited_ms,
            duration_ms = start.elapsed().as_millis() as u64,
            "Embedding complete"
        );
        Ok(vectors.into_iter().map(Vector::from).collect())
    }

    fn dimension(&self) -> usize {
        self.model.dimension()
    }

    fn model_name(&self) -> &str {
        self.model.model_name()
    }
}

/// Feature-hashing bag-of-words model. Deterministic and dependency-free;
/// useful offline and for development, not for retrieval quality.
#[derive(Debug, Clone)]
pub struct HashEmbeddingModel {
    dimension: usize,
}

impl HashEmbeddingModel {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// L2-normalized hashed token counts of `text`.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = blake3::hash(token.to_lowercase().as_bytes());
            let bytes = hash.as_bytes();
            let mut idx = [0u8; 8];
            idx.copy_from_slice(&bytes[..8]);
            let slot = (u64::from_le_bytes(idx) % self.dimension as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[slot] += sign;
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        } else {
            // Cosine distance is undefined for the zero vector.
            v[0] = 1.0;
        }
        v
    }
}

impl LocalEmbeddingModel for HashEmbeddingModel {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "hash"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_worker_count_capped() {
        assert_eq!(worker_count(Some(32)), 8);
        assert_eq!(worker_count(Some(0)), 1);
        assert_eq!(worker_count(Some(3)), 3);
        let auto = worker_count(None);
        assert!((1..=8).contains(&auto));
    }

    #[test]
    fn test_hash_model_deterministic_and_normalized() {
        let model = HashEmbeddingModel::new(64);
        let a = model.embed_one("Hello world");
        let b = model.embed_one("hello, WORLD!");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hash_model_empty_text_not_zero() {
        let model = HashEmbeddingModel::new(8);
        let v = model.embed_one("   ");
        assert_eq!(v[0], 1.0);
        assert_eq!(v.len(), 8);
    }

    #[tokio::test]
    async fn test_offloaded_backend_embeds_in_order() {
        let backend = OffloadedBackend::new(HashEmbeddingModel::new(16), 2);
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let vectors = backend.embed_texts(&texts).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(
            vectors[0].as_slice(),
            HashEmbeddingModel::new(16).embed_one("alpha").as_slice()
        );
        assert_eq!(backend.dimension(), 16);
        assert_eq!(backend.model_name(), "hash");
        assert_eq!(backend.idle_workers(), 2);
    }

    struct SlowModel {
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl LocalEmbeddingModel for SlowModel {
        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }

        fn dimension(&self) -> usize {
            1
        }

        fn model_name(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrency_bounded_by_workers() {
        let peak = Arc::new(AtomicUsize::new(0));
        let backend = Arc::new(OffloadedBackend::new(
            SlowModel {
                running: Arc::new(AtomicUsize::new(0)),
                peak: peak.clone(),
            },
            2,
        ));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let backend = backend.clone();
            handles.push(tokio::spawn(async move {
                backend.embed_texts(&["x".to_string()]).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(backend.idle_workers(), 2);
    }

    struct FailingModel;

    impl LocalEmbeddingModel for FailingModel {
        fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(Error::Embedding("model not loaded".to_string()))
        }

        fn dimension(&self) -> usize {
            1
        }

        fn model_name(&self) -> &str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_model_error_propagates_and_releases_permit() {
        let backend = OffloadedBackend::new(FailingModel, 1);
        let err = backend.embed_texts(&["x".to_string()]).await.unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
        assert_eq!(backend.idle_workers(), 1);
    }
}
