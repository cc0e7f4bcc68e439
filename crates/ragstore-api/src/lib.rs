//! # ragstore-api
//!
//! HTTP service for the ragstore document-embedding store: environment
//! configuration, the webhook notification sink, and the routes over the
//! namespace store. The `ragstore-api` binary wires them together.

pub mod config;
pub mod routes;
pub mod webhook;

pub use config::{AppConfig, EmbeddingProvider};
pub use routes::{router, ApiError, AppState};
pub use webhook::{normalize_webhook_url, notify_detached, WebhookNotifier};
