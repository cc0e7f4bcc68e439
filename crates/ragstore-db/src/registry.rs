//! Registry of ensured tables, keyed by sanitized namespace.
//!
//! Each table is ensured at most once per process. Concurrent first use of
//! the same key waits on a single initialization; a failed initialization
//! leaves the entry empty so the next caller retries.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;
use tracing::warn;

use ragstore_core::{sanitize_namespace, validate_namespace, Error, Result};

use crate::schema::SchemaManager;
use crate::schema_validation::QualifiedTable;

#[derive(Default)]
struct Entry {
    table: OnceCell<QualifiedTable>,
    /// Every distinct namespace seen for this key.
    namespaces: Mutex<HashSet<String>>,
}

/// Lazily ensured table handles.
pub struct TableRegistry {
    schema: SchemaManager,
    global: OnceCell<QualifiedTable>,
    entries: Mutex<HashMap<String, Arc<Entry>>>,
}

impl TableRegistry {
    pub fn new(schema: SchemaManager) -> Self {
        Self {
            schema,
            global: OnceCell::new(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn schema_manager(&self) -> &SchemaManager {
        &self.schema
    }

    /// The global table, ensured on first call.
    pub async fn global_table(&self) -> Result<QualifiedTable> {
        self.global
            .get_or_try_init(|| async {
                self.schema
                    .ensure_global_table()
                    .await
                    .map(|report| report.table)
            })
            .await
            .cloned()
    }

    /// The table for `namespace`, ensured on first call for its key.
    pub async fn namespace_table(&self, namespace: &str) -> Result<QualifiedTable> {
        validate_namespace(namespace)?;
        let key = sanitize_namespace(namespace);
        let entry = self.entry(&key)?;
        self.note_namespace(&entry, &key, namespace);

        entry
            .table
            .get_or_try_init(|| async {
                self.schema
                    .ensure_namespace_table(namespace)
                    .await
                    .map(|report| report.table)
            })
            .await
            .cloned()
    }

    /// Whether the table for `namespace` has been ensured by this process.
    pub fn is_ensured(&self, namespace: &str) -> bool {
        let key = sanitize_namespace(namespace);
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(&key).map(|e| e.table.initialized()))
            .unwrap_or(false)
    }

    fn entry(&self, key: &str) -> Result<Arc<Entry>> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::Internal("Table registry lock poisoned".to_string()))?;
        Ok(entries.entry(key.to_string()).or_default().clone())
    }

    fn note_namespace(&self, entry: &Entry, key: &str, namespace: &str) {
        let Ok(mut seen) = entry.namespaces.lock() else {
            return;
        };
        if seen.contains(namespace) {
            return;
        }
        if !seen.is_empty() {
            let mut others: Vec<&str> = seen.iter().map(String::as_str).collect();
            others.sort_unstable();
            warn!(
                subsystem = "db",
                component = "registry",
                namespace,
                db_table = key,
                shared_with = ?others,
                "Distinct namespaces sanitize to the same table"
            );
        }
        seen.insert(namespace.to_string());
    }
}
