//! Core data models for ragstore.
//!
//! These types are shared across all ragstore crates and represent the
//! stored chunk and the shapes it takes on the way in and out of the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use pgvector::Vector;

// =============================================================================
// CHUNK TYPES
// =============================================================================

/// A chunk as supplied by a caller, before it has an embedding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkInput {
    /// Caller-supplied identity. `None` or empty means "generate one".
    #[serde(default)]
    pub chunk_id: Option<String>,
    /// Source document identifier; empty for legacy records.
    #[serde(default)]
    pub file_id: String,
    /// Legacy path-like identifier.
    #[serde(default)]
    pub source: String,
    /// Ordinal position within the source document. Defaults to the
    /// chunk's position in the upsert batch.
    #[serde(default)]
    pub chunk_index: Option<i32>,
    /// Text to embed and store.
    pub text: String,
}

impl ChunkInput {
    /// Create an input with only text; identity and metadata left unset.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_chunk_id(mut self, chunk_id: impl Into<String>) -> Self {
        self.chunk_id = Some(chunk_id.into());
        self
    }

    pub fn with_file_id(mut self, file_id: impl Into<String>) -> Self {
        self.file_id = file_id.into();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_chunk_index(mut self, chunk_index: i32) -> Self {
        self.chunk_index = Some(chunk_index);
        self
    }

    /// The caller-supplied chunk id, treating an empty string as absent.
    pub fn supplied_chunk_id(&self) -> Option<&str> {
        self.chunk_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// A chunk ready to be written: identity resolved and embedding attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub file_id: String,
    pub source: String,
    pub chunk_index: i32,
    pub text: String,
    pub embedding: Vector,
    pub namespace: String,
}

/// A chunk read back from the store (embedding omitted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChunk {
    pub chunk_id: String,
    pub file_id: String,
    pub source: String,
    pub chunk_index: i32,
    pub text: String,
    pub namespace: String,
}

/// A similarity search hit. Higher `similarity` means closer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    #[serde(flatten)]
    pub chunk: StoredChunk,
    /// `1 - cosine distance`.
    pub similarity: f32,
}

// =============================================================================
// OPERATION RESULTS
// =============================================================================

/// Result of a namespace upsert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpsertSummary {
    pub namespace: String,
    /// Chunk ids in input order, including generated ones.
    pub chunk_ids: Vec<String>,
    /// Schema-qualified tables written, in write order.
    pub tables: Vec<String>,
    /// Whether a copy was also written to the general namespace.
    pub copied_to_general: bool,
}

/// Rows removed by a delete, per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteSummary {
    pub global_rows: u64,
    pub namespace_rows: u64,
}

impl DeleteSummary {
    pub fn total(&self) -> u64 {
        self.global_rows + self.namespace_rows
    }
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// Outcome of a store operation, reported to a notification sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingNotification {
    pub file_id: String,
    /// Whether the operation succeeded.
    pub embedded: bool,
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub occurred_at: Option<DateTime<Utc>>,
}

impl EmbeddingNotification {
    pub fn success(file_id: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            embedded: true,
            namespace: namespace.into(),
            error: None,
            occurred_at: Some(Utc::now()),
        }
    }

    pub fn failure(
        file_id: impl Into<String>,
        namespace: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            file_id: file_id.into(),
            embedded: false,
            namespace: namespace.into(),
            error: Some(error.into()),
            occurred_at: Some(Utc::now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supplied_chunk_id_treats_empty_as_absent() {
        assert_eq!(ChunkInput::new("t").supplied_chunk_id(), None);
        assert_eq!(
            ChunkInput::new("t").with_chunk_id("").supplied_chunk_id(),
            None
        );
        assert_eq!(
            ChunkInput::new("t").with_chunk_id("c-1").supplied_chunk_id(),
            Some("c-1")
        );
    }

    #[test]
    fn test_chunk_input_deserializes_with_defaults() {
        let input: ChunkInput = serde_json::from_str(r#"{"text": "hello"}"#).unwrap();
        assert_eq!(input.text, "hello");
        assert_eq!(input.file_id, "");
        assert_eq!(input.source, "");
        assert!(input.chunk_id.is_none());
        assert!(input.chunk_index.is_none());
    }

    #[test]
    fn test_scored_chunk_flattens() {
        let hit = ScoredChunk {
            chunk: StoredChunk {
                chunk_id: "c1".to_string(),
                file_id: "f1".to_string(),
                source: "docs/a.md".to_string(),
                chunk_index: 0,
                text: "hello".to_string(),
                namespace: "alice".to_string(),
            },
            similarity: 0.5,
        };
        let json = serde_json::to_value(&hit).unwrap();
        assert_eq!(json["chunk_id"], "c1");
        assert_eq!(json["similarity"], 0.5);
    }

    #[test]
    fn test_notification_payload_omits_absent_error() {
        let ok = EmbeddingNotification::success("f1", "alice");
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"file_id": "f1", "embedded": true, "namespace": "alice"})
        );

        let failed = EmbeddingNotification::failure("f1", "alice", "boom");
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["embedded"], false);
        assert_eq!(json["error"], "boom");
    }

    #[test]
    fn test_delete_summary_total() {
        let summary = DeleteSummary {
            global_rows: 3,
            namespace_rows: 2,
        };
        assert_eq!(summary.total(), 5);
    }
}
