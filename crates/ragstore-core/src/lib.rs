//! # ragstore-core
//!
//! Core types, traits, and abstractions for the ragstore document-embedding
//! store.
//!
//! This crate provides the data model shared by the database layer, the
//! embedding backends, and the HTTP service.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod namespace;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use namespace::{sanitize_namespace, validate_namespace, GeneralCopyPolicy};
pub use traits::*;
