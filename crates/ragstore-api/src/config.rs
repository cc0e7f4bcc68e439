//! Service configuration from environment variables.

use std::str::FromStr;
use std::time::Duration;

use ragstore_core::{defaults, Error, GeneralCopyPolicy, Result};
use ragstore_db::{validate_schema_name, MirrorWriteMode, PoolConfig, StoreConfig, VectorIndex};
use ragstore_inference::worker_count;

/// Which embedding backend to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProvider {
    Ollama,
    /// Local hashing model on the bounded worker pool.
    Hash,
}

impl FromStr for EmbeddingProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(EmbeddingProvider::Ollama),
            "hash" | "local" => Ok(EmbeddingProvider::Hash),
            other => Err(Error::Config(format!(
                "Unknown EMBEDDINGS_PROVIDER '{}', expected 'ollama' or 'hash'",
                other
            ))),
        }
    }
}

/// Effective service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub schema: String,
    pub max_connections: u32,
    pub host: String,
    pub port: u16,
    pub embed_workers: usize,
    pub provider: EmbeddingProvider,
    pub ollama_url: String,
    pub embed_model: String,
    pub dimension: usize,
    pub general_copy: GeneralCopyPolicy,
    pub mirror_mode: MirrorWriteMode,
    pub vector_index: VectorIndex,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
}

impl AppConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`. Unset and blank values take
    /// defaults; malformed values are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let schema = get("DB_SCHEMA")
            .unwrap_or_else(|| defaults::DB_SCHEMA.to_string())
            .to_lowercase();
        validate_schema_name(&schema).map_err(|e| Error::Config(format!("DB_SCHEMA: {}", e)))?;

        let dimension: usize = parse(&get, "EMBEDDING_DIMENSION", defaults::EMBED_DIMENSION)?;
        if dimension == 0 {
            return Err(Error::Config(
                "EMBEDDING_DIMENSION must be positive".to_string(),
            ));
        }

        let configured_workers = match get("RAG_THREAD_POOL_SIZE") {
            Some(v) => Some(v.parse::<usize>().map_err(|_| {
                Error::Config(format!("RAG_THREAD_POOL_SIZE: invalid number '{}'", v))
            })?),
            None => None,
        };

        let general_copy = match get("GENERAL_COPY_EXEMPT") {
            Some(markers) => GeneralCopyPolicy::from_marker_list(defaults::GENERAL_NAMESPACE, &markers),
            None => GeneralCopyPolicy::default(),
        };

        Ok(Self {
            database_url: get("DATABASE_URL")
                .unwrap_or_else(|| "postgres://localhost/ragstore".to_string()),
            schema,
            max_connections: parse(&get, "DB_MAX_CONNECTIONS", defaults::POOL_MAX_CONNECTIONS)?,
            host: get("RAG_HOST").unwrap_or_else(|| defaults::SERVER_HOST.to_string()),
            port: parse(&get, "RAG_PORT", defaults::SERVER_PORT)?,
            embed_workers: worker_count(configured_workers),
            provider: parse(&get, "EMBEDDINGS_PROVIDER", EmbeddingProvider::Ollama)?,
            ollama_url: get("OLLAMA_BASE_URL").unwrap_or_else(|| defaults::OLLAMA_URL.to_string()),
            embed_model: get("EMBEDDINGS_MODEL")
                .unwrap_or_else(|| defaults::EMBED_MODEL.to_string()),
            dimension,
            general_copy,
            mirror_mode: parse(&get, "MIRROR_WRITE_MODE", MirrorWriteMode::Sequential)?,
            vector_index: parse(&get, "VECTOR_INDEX", VectorIndex::None)?,
            webhook_url: get("WEBHOOK_URL"),
            webhook_secret: get("WEBHOOK_SECRET"),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new()
            .max_connections(self.max_connections)
            .connect_timeout(Duration::from_secs(defaults::POOL_CONNECT_TIMEOUT_SECS))
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new()
            .schema(self.schema.clone())
            .dimension(self.dimension)
            .general_copy(self.general_copy.clone())
            .mirror_mode(self.mirror_mode)
            .vector_index(self.vector_index)
    }
}

fn parse<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(v) => v
            .parse::<T>()
            .map_err(|e| Error::Config(format!("{}: invalid value '{}': {}", key, v, e))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[]).unwrap();
        assert_eq!(c.database_url, "postgres://localhost/ragstore");
        assert_eq!(c.schema, "public");
        assert_eq!(c.max_connections, 10);
        assert_eq!(c.bind_addr(), "0.0.0.0:8000");
        assert_eq!(c.provider, EmbeddingProvider::Ollama);
        assert_eq!(c.embed_model, "nomic-embed-text");
        assert_eq!(c.dimension, 768);
        assert_eq!(c.general_copy.exempt_markers(), &["totalsoft"]);
        assert_eq!(c.mirror_mode, MirrorWriteMode::Sequential);
        assert_eq!(c.vector_index, VectorIndex::None);
        assert!(c.webhook_url.is_none());
        assert!((1..=8).contains(&c.embed_workers));
    }

    #[test]
    fn test_overrides() {
        let c = config(&[
            ("DB_SCHEMA", "RAG"),
            ("RAG_PORT", "9000"),
            ("RAG_THREAD_POOL_SIZE", "64"),
            ("EMBEDDINGS_PROVIDER", "hash"),
            ("EMBEDDING_DIMENSION", "384"),
            ("GENERAL_COPY_EXEMPT", "acme,internal"),
            ("MIRROR_WRITE_MODE", "atomic"),
            ("VECTOR_INDEX", "hnsw"),
            ("WEBHOOK_URL", "http://files:8080"),
        ])
        .unwrap();
        assert_eq!(c.schema, "rag");
        assert_eq!(c.port, 9000);
        assert_eq!(c.embed_workers, 8);
        assert_eq!(c.provider, EmbeddingProvider::Hash);
        assert_eq!(c.dimension, 384);
        assert_eq!(c.general_copy.exempt_markers(), &["acme", "internal"]);
        assert_eq!(c.mirror_mode, MirrorWriteMode::Atomic);
        assert_eq!(c.vector_index, VectorIndex::Hnsw);
        assert_eq!(c.webhook_url.as_deref(), Some("http://files:8080"));

        let store = c.store_config();
        assert_eq!(store.schema, "rag");
        assert_eq!(store.dimension, 384);
    }

    #[test]
    fn test_blank_values_take_defaults() {
        let c = config(&[("RAG_PORT", "  "), ("WEBHOOK_URL", "")]).unwrap();
        assert_eq!(c.port, 8000);
        assert!(c.webhook_url.is_none());
    }

    #[test]
    fn test_invalid_values_fail_fast() {
        assert!(matches!(config(&[("RAG_PORT", "eighty")]), Err(Error::Config(_))));
        assert!(matches!(
            config(&[("RAG_THREAD_POOL_SIZE", "-1")]),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            config(&[("EMBEDDING_DIMENSION", "0")]),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            config(&[("DB_SCHEMA", "bad-schema")]),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            config(&[("MIRROR_WRITE_MODE", "eventual")]),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            config(&[("EMBEDDINGS_PROVIDER", "openai")]),
            Err(Error::Config(_))
        ));
    }
}
