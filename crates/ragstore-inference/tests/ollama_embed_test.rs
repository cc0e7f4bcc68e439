//! HTTP-level tests for the Ollama embedding backend.

#![cfg(feature = "ollama")]

use ragstore_core::{EmbeddingBackend, Error};
use ragstore_inference::OllamaBackend;
use std::time::Duration;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_embed_texts_posts_model_and_inputs() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_json(serde_json::json!({
            "model": "nomic-embed-text",
            "input": ["first", "second"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "embeddings": [[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let backend =
        OllamaBackend::with_config(mock_server.uri(), "nomic-embed-text".to_string(), 3).unwrap();
    let vectors = backend
        .embed_texts(&["first".to_string(), "second".to_string()])
        .await
        .unwrap();

    assert_eq!(vectors.len(), 2);
    assert_eq!(vectors[1].as_slice(), &[0.4, 0.5, 0.6]);
}

#[tokio::test]
async fn test_embed_query_returns_single_vector() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "embeddings": [[1.0, 0.0]]
        })))
        .mount(&mock_server)
        .await;

    let backend = OllamaBackend::with_config(mock_server.uri(), "m".to_string(), 2).unwrap();
    let v = backend.embed_query("hello").await.unwrap();
    assert_eq!(v.as_slice(), &[1.0, 0.0]);
}

#[tokio::test]
async fn test_server_error_is_embedding_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model not found"))
        .mount(&mock_server)
        .await;

    let backend = OllamaBackend::with_config(mock_server.uri(), "missing".to_string(), 2).unwrap();
    match backend.embed_texts(&["x".to_string()]).await {
        Err(Error::Embedding(msg)) => {
            assert!(msg.contains("500"));
            assert!(msg.contains("model not found"));
        }
        other => panic!("Expected Embedding error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_response_is_embedding_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
        .mount(&mock_server)
        .await;

    let backend = OllamaBackend::with_config(mock_server.uri(), "m".to_string(), 2).unwrap();
    let err = backend.embed_texts(&["x".to_string()]).await.unwrap_err();
    assert!(err.to_string().contains("Failed to parse response"));
}

#[tokio::test]
async fn test_timeout_is_embedding_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"embeddings": [[1.0]]}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&mock_server)
        .await;

    let backend = OllamaBackend::with_timeout(
        mock_server.uri(),
        "m".to_string(),
        1,
        Duration::from_millis(200),
    )
    .unwrap();
    let err = backend.embed_texts(&["x".to_string()]).await.unwrap_err();
    assert!(matches!(err, Error::Embedding(_)));
}
