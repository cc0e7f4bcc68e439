//! Identifier validation and quoting for dynamically named schema objects.
//!
//! Table and index names are derived from caller-supplied namespaces, so
//! they never reach SQL unquoted.

use std::fmt;

use ragstore_core::defaults::MAX_IDENTIFIER_LEN;
use ragstore_core::{Error, Result};

/// Validate a PostgreSQL schema name for safety and correctness.
///
/// PostgreSQL schema names must:
/// - Not be empty
/// - Not exceed 63 characters (PostgreSQL identifier limit)
/// - Contain only alphanumeric characters and underscores
/// - Not start with a digit
/// - Not be a system schema
///
/// # Examples
///
/// ```
/// use ragstore_db::validate_schema_name;
///
/// assert!(validate_schema_name("public").is_ok());
/// assert!(validate_schema_name("rag_2026").is_ok());
/// assert!(validate_schema_name("123invalid").is_err());
/// assert!(validate_schema_name("").is_err());
/// ```
pub fn validate_schema_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidInput(
            "Schema name cannot be empty".to_string(),
        ));
    }

    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::InvalidInput(format!(
            "Schema name exceeds {} character limit: {} characters",
            MAX_IDENTIFIER_LEN,
            name.len()
        )));
    }

    if let Some(first) = name.chars().next() {
        if !first.is_ascii_alphabetic() && first != '_' {
            return Err(Error::InvalidInput(format!(
                "Schema name must start with a letter or underscore, found: '{}'",
                first
            )));
        }
    }

    for ch in name.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '_' {
            return Err(Error::InvalidInput(format!(
                "Schema name contains invalid character: '{}'. Only alphanumeric and underscore allowed",
                ch
            )));
        }
    }

    const RESERVED: &[&str] = &["pg_catalog", "information_schema", "pg_toast"];
    if RESERVED.contains(&name.to_lowercase().as_str()) {
        return Err(Error::InvalidInput(format!(
            "Schema name '{}' is a reserved system schema",
            name
        )));
    }

    Ok(())
}

/// Quote an identifier for interpolation into SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal for interpolation into DDL, where bind
/// parameters are not accepted (e.g. column defaults).
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Shorten `name` to fit PostgreSQL's identifier limit.
///
/// Names within the limit are returned unchanged. Longer names keep a
/// readable prefix and gain a hash of the full name, so two long names
/// that share a prefix never truncate onto the same identifier.
pub fn bounded_identifier(name: &str) -> String {
    if name.len() <= MAX_IDENTIFIER_LEN {
        return name.to_string();
    }
    let hash = blake3::hash(name.as_bytes()).to_hex();
    let suffix = &hash.as_str()[..8];
    let mut cut = MAX_IDENTIFIER_LEN - suffix.len() - 1;
    while !name.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}_{}", &name[..cut], suffix)
}

/// A schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedTable {
    schema: String,
    table: String,
}

impl QualifiedTable {
    /// `table` is bounded to the identifier limit; `schema` must already
    /// be validated.
    pub fn new(schema: impl Into<String>, table: &str) -> Self {
        Self {
            schema: schema.into(),
            table: bounded_identifier(table),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Quoted `"schema"."table"` for use in SQL text.
    pub fn sql(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }

    /// Quoted name of an index on this table, e.g. `idx_<table>_file_id`.
    /// Indexes live in the table's schema, so the name is bounded there too.
    pub fn index_name(&self, prefix: &str, column: &str) -> String {
        quote_ident(&bounded_identifier(&format!(
            "{}_{}_{}",
            prefix, self.table, column
        )))
    }

    /// Quoted name of the unique `chunk_id` index. Includes the schema so
    /// the name stays stable if a table is moved between schemas.
    pub fn unique_index_name(&self) -> String {
        quote_ident(&bounded_identifier(&format!(
            "uniq_{}_{}_chunk_id",
            self.schema, self.table
        )))
    }
}

impl fmt::Display for QualifiedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_schema_name_valid() {
        assert!(validate_schema_name("my_schema").is_ok());
        assert!(validate_schema_name("schema123").is_ok());
        assert!(validate_schema_name("_private").is_ok());
        assert!(validate_schema_name("public").is_ok());
        assert!(validate_schema_name("a").is_ok());
    }

    #[test]
    fn test_validate_schema_name_empty() {
        match validate_schema_name("") {
            Err(Error::InvalidInput(msg)) => assert!(msg.contains("empty")),
            _ => panic!("Expected InvalidInput error for empty name"),
        }
    }

    #[test]
    fn test_validate_schema_name_too_long() {
        let long_name = "a".repeat(64);
        match validate_schema_name(&long_name) {
            Err(Error::InvalidInput(msg)) => assert!(msg.contains("63 character limit")),
            _ => panic!("Expected InvalidInput error for long name"),
        }
    }

    #[test]
    fn test_validate_schema_name_rejects_injection() {
        assert!(validate_schema_name("schema'; DROP TABLE embeddings;--").is_err());
        assert!(validate_schema_name("my-schema").is_err());
        assert!(validate_schema_name("9lives").is_err());
        assert!(validate_schema_name("pg_catalog").is_err());
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("alice"), "\"alice\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_quote_literal_escapes_quotes() {
        assert_eq!(quote_literal("general"), "'general'");
        assert_eq!(quote_literal("o'brien"), "'o''brien'");
    }

    #[test]
    fn test_bounded_identifier_short_names_unchanged() {
        assert_eq!(bounded_identifier("alice"), "alice");
        let exact = "x".repeat(63);
        assert_eq!(bounded_identifier(&exact), exact);
    }

    #[test]
    fn test_bounded_identifier_long_names_distinct() {
        let base = "n".repeat(70);
        let a = bounded_identifier(&format!("{}_one", base));
        let b = bounded_identifier(&format!("{}_two", base));
        assert_eq!(a.len(), 63);
        assert_eq!(b.len(), 63);
        assert_ne!(a, b);
    }

    #[test]
    fn test_bounded_identifier_respects_char_boundaries() {
        let name = "é".repeat(40);
        let bounded = bounded_identifier(&name);
        assert!(bounded.len() <= 63);
    }

    #[test]
    fn test_qualified_table_sql_and_display() {
        let t = QualifiedTable::new("public", "alice");
        assert_eq!(t.sql(), "\"public\".\"alice\"");
        assert_eq!(t.to_string(), "public.alice");
        assert_eq!(t.index_name("idx", "file_id"), "\"idx_alice_file_id\"");
        assert_eq!(t.unique_index_name(), "\"uniq_public_alice_chunk_id\"");
    }
}
