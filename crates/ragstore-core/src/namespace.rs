//! Namespace normalization and the general-copy policy.
//!
//! A namespace is both a logical partition (stored verbatim in the
//! `namespace` column) and, once sanitized, the name of its own table.

use crate::defaults;
use crate::error::{Error, Result};

/// Map a namespace to its table key.
///
/// Lowercases and replaces `-`, space, `.` and `@` with `_`. The mapping is
/// total and pure but not injective: `"Alice"` and `"alice"` share a table,
/// as do `"a-b"` and `"a_b"`.
pub fn sanitize_namespace(namespace: &str) -> String {
    namespace
        .to_lowercase()
        .chars()
        .map(|c| match c {
            '-' | ' ' | '.' | '@' => '_',
            other => other,
        })
        .collect()
}

/// Reject namespaces that cannot name a table of their own.
pub fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.trim().is_empty() {
        return Err(Error::InvalidInput("Namespace cannot be empty".to_string()));
    }
    let sanitized = sanitize_namespace(namespace);
    if sanitized == defaults::GLOBAL_TABLE {
        return Err(Error::InvalidInput(format!(
            "Namespace '{}' collides with the global table name",
            namespace
        )));
    }
    if let Some(prefix) = defaults::INDEX_NAME_PREFIXES
        .iter()
        .find(|p| sanitized.starts_with(**p))
    {
        return Err(Error::InvalidInput(format!(
            "Namespace '{}' uses the reserved index prefix '{}'",
            namespace, prefix
        )));
    }
    Ok(())
}

/// Decides whether an upsert with `copy_to_general` is mirrored into the
/// general namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneralCopyPolicy {
    general_namespace: String,
    /// Lowercased markers; a namespace containing any of them is exempt.
    exempt_markers: Vec<String>,
}

impl Default for GeneralCopyPolicy {
    fn default() -> Self {
        Self::new(
            defaults::GENERAL_NAMESPACE,
            defaults::GENERAL_COPY_EXEMPT.iter().copied(),
        )
    }
}

impl GeneralCopyPolicy {
    pub fn new<I, S>(general_namespace: impl Into<String>, exempt_markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            general_namespace: general_namespace.into(),
            exempt_markers: exempt_markers
                .into_iter()
                .map(|m| m.as_ref().trim().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    /// Parse a comma-separated marker list, e.g. from an environment variable.
    pub fn from_marker_list(general_namespace: impl Into<String>, markers: &str) -> Self {
        Self::new(general_namespace, markers.split(','))
    }

    pub fn general_namespace(&self) -> &str {
        &self.general_namespace
    }

    pub fn exempt_markers(&self) -> &[String] {
        &self.exempt_markers
    }

    /// Whether `namespace` is the general namespace itself, compared by
    /// table key so `"General"` counts.
    pub fn is_general(&self, namespace: &str) -> bool {
        sanitize_namespace(namespace) == sanitize_namespace(&self.general_namespace)
    }

    pub fn is_exempt(&self, namespace: &str) -> bool {
        let lowered = namespace.to_lowercase();
        self.exempt_markers.iter().any(|m| lowered.contains(m))
    }

    /// Whether chunks upserted into `namespace` with `copy_to_general` set
    /// are copied into the general namespace.
    pub fn should_copy(&self, namespace: &str) -> bool {
        !self.is_general(namespace) && !self.is_exempt(namespace)
    }

    /// Chunk id for the general-namespace copy of `chunk_id`.
    ///
    /// The global table is unique on `chunk_id`, so the copy needs an id of
    /// its own or it would overwrite the source namespace's row.
    pub fn copy_chunk_id(&self, chunk_id: &str) -> String {
        format!("{}::{}", chunk_id, self.general_namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_namespace() {
        assert_eq!(sanitize_namespace("general"), "general");
        assert_eq!(sanitize_namespace("Alice"), "alice");
        assert_eq!(
            sanitize_namespace("john.doe@example.com"),
            "john_doe_example_com"
        );
        assert_eq!(sanitize_namespace("team-a b"), "team_a_b");
    }

    #[test]
    fn test_sanitize_namespace_is_idempotent() {
        for ns in ["Alice", "a-b.c@d e", "already_clean", "ÄBC-1"] {
            let once = sanitize_namespace(ns);
            assert_eq!(sanitize_namespace(&once), once);
        }
    }

    #[test]
    fn test_sanitize_namespace_collisions_are_normalization_only() {
        assert_eq!(sanitize_namespace("a-b"), sanitize_namespace("A_B"));
        assert_ne!(sanitize_namespace("ab"), sanitize_namespace("a_b"));
    }

    #[test]
    fn test_validate_namespace() {
        assert!(validate_namespace("alice").is_ok());
        assert!(validate_namespace("").is_err());
        assert!(validate_namespace("   ").is_err());
        assert!(validate_namespace("Embeddings").is_err());
    }

    #[test]
    fn test_validate_namespace_rejects_index_prefixes() {
        assert!(matches!(
            validate_namespace("uniq_public_alice_chunk_id"),
            Err(Error::InvalidInput(_))
        ));
        assert!(validate_namespace("IDX-alice-file_id").is_err());
        assert!(validate_namespace("idx").is_ok());
        assert!(validate_namespace("unique_team").is_ok());
    }

    #[test]
    fn test_should_copy_regular_namespace() {
        let policy = GeneralCopyPolicy::default();
        assert!(policy.should_copy("alice"));
    }

    #[test]
    fn test_should_not_copy_general_itself() {
        let policy = GeneralCopyPolicy::default();
        assert!(!policy.should_copy("general"));
        assert!(!policy.should_copy("General"));
    }

    #[test]
    fn test_should_not_copy_exempt_namespace() {
        let policy = GeneralCopyPolicy::new("general", ["TotalSoft"]);
        assert!(!policy.should_copy("totalsoft"));
        assert!(!policy.should_copy("dept-TOTALSOFT-hr"));
        assert!(policy.should_copy("softtotal"));
    }

    #[test]
    fn test_marker_list_parsing() {
        let policy = GeneralCopyPolicy::from_marker_list("general", " acme, ,Internal ");
        assert_eq!(policy.exempt_markers(), &["acme", "internal"]);
        assert!(!policy.should_copy("acme-sales"));
        assert!(!policy.should_copy("INTERNAL"));

        let none = GeneralCopyPolicy::from_marker_list("general", "");
        assert!(none.exempt_markers().is_empty());
        assert!(none.should_copy("totalsoft"));
    }

    #[test]
    fn test_copy_chunk_id_is_deterministic() {
        let policy = GeneralCopyPolicy::default();
        assert_eq!(policy.copy_chunk_id("abc"), "abc::general");
        assert_eq!(policy.copy_chunk_id("abc"), policy.copy_chunk_id("abc"));
    }
}
