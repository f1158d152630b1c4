//! Plugin-namespaced storage.
//!
//! Plugins get logical tables; the broker maps them onto physical tables in
//! the shared backing store by prefixing a namespace derived from the plugin
//! *name*, so data survives reconnects and plugins cannot reach each other's
//! tables. Logical names are validated against a strict whitelist before any
//! name reaches the store.
//!
//! The backing store itself is behind [`TableStore`]: the broker assumes a
//! SQL-like API but mandates no dialect. `where_clause` strings pass through
//! verbatim with positional `?` arguments; their grammar belongs to the
//! backing store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use parking_lot::RwLock;
use regex_lite::Regex;
use tracing::debug;

use chadbot_core::error::{StorageError, StorageResult};
use chadbot_core::protocol::{ColumnSpec, Row, StorageOp};

static TABLE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[A-Za-z][A-Za-z0-9_]*$").unwrap());

// =============================================================================
// Backing-store seam
// =============================================================================

/// The backing store the broker writes through.
///
/// All identifiers arriving here are already namespaced and
/// whitelist-validated. `where_clause` is an opaque predicate string with
/// positional `?` placeholders bound from `args` in order; implementations
/// define (and should document) the accepted grammar.
#[async_trait]
pub trait TableStore: Send + Sync {
    async fn create_table(&self, table: &str, columns: &[ColumnSpec]) -> StorageResult<()>;

    async fn drop_table(&self, table: &str) -> StorageResult<()>;

    /// Returns the number of inserted rows (1 on success).
    async fn insert(&self, table: &str, values: &BTreeMap<String, String>) -> StorageResult<u64>;

    /// Returns the number of updated rows.
    async fn update(
        &self,
        table: &str,
        values: &BTreeMap<String, String>,
        where_clause: &str,
        args: &[String],
    ) -> StorageResult<u64>;

    /// Returns the number of deleted rows.
    async fn delete(&self, table: &str, where_clause: &str, args: &[String]) -> StorageResult<u64>;

    /// Returns matching rows as `column → stringified value`; `NULL` becomes
    /// the empty string.
    async fn query(
        &self,
        table: &str,
        where_clause: &str,
        args: &[String],
        limit: Option<u32>,
    ) -> StorageResult<Vec<Row>>;
}

// =============================================================================
// Namespacing
// =============================================================================

/// Derives the deterministic physical-table prefix for a plugin name:
/// lowercased, every non-alphanumeric folded to `_`, prefixed with `p_`
/// when the name does not start with a letter.
pub fn namespace_prefix(plugin_name: &str) -> String {
    let mut prefix: String = plugin_name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if !prefix.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
        prefix.insert_str(0, "p_");
    }
    prefix
}

/// The result of one storage operation, in wire shape.
#[derive(Debug, Clone, Default)]
pub struct StorageOutcome {
    pub rows: Vec<Row>,
    pub rows_affected: u64,
}

/// Per-plugin storage handler: validates logical names, applies the
/// namespace prefix, and forwards to the backing store.
pub struct NamespacedStorage {
    prefix: String,
    store: Arc<dyn TableStore>,
}

impl NamespacedStorage {
    pub fn new(plugin_name: &str, store: Arc<dyn TableStore>) -> Self {
        Self {
            prefix: namespace_prefix(plugin_name),
            store,
        }
    }

    /// The physical name for a logical table.
    ///
    /// # Errors
    ///
    /// [`StorageError::InvalidTableName`] when the logical name fails the
    /// `^[A-Za-z][A-Za-z0-9_]*$` whitelist.
    pub fn physical_name(&self, logical: &str) -> StorageResult<String> {
        if !TABLE_NAME.is_match(logical) {
            return Err(StorageError::InvalidTableName(logical.to_string()));
        }
        Ok(format!("{}_{}", self.prefix, logical))
    }

    /// Executes one wire-level storage operation.
    pub async fn execute(&self, op: &StorageOp) -> StorageResult<StorageOutcome> {
        let table = self.physical_name(op.table())?;
        debug!(table = %table, "Storage operation");

        match op {
            StorageOp::CreateTable { columns, .. } => {
                self.store.create_table(&table, columns).await?;
                Ok(StorageOutcome::default())
            }
            StorageOp::DropTable { .. } => {
                self.store.drop_table(&table).await?;
                Ok(StorageOutcome::default())
            }
            StorageOp::Insert { values, .. } => {
                let rows_affected = self.store.insert(&table, values).await?;
                Ok(StorageOutcome {
                    rows: Vec::new(),
                    rows_affected,
                })
            }
            StorageOp::Update {
                values,
                where_clause,
                args,
                ..
            } => {
                let rows_affected = self.store.update(&table, values, where_clause, args).await?;
                Ok(StorageOutcome {
                    rows: Vec::new(),
                    rows_affected,
                })
            }
            StorageOp::Delete {
                where_clause, args, ..
            } => {
                let rows_affected = self.store.delete(&table, where_clause, args).await?;
                Ok(StorageOutcome {
                    rows: Vec::new(),
                    rows_affected,
                })
            }
            StorageOp::Query {
                where_clause,
                args,
                limit,
                ..
            } => {
                let rows = self.store.query(&table, where_clause, args, *limit).await?;
                let rows_affected = rows.len() as u64;
                Ok(StorageOutcome {
                    rows,
                    rows_affected,
                })
            }
        }
    }
}

// =============================================================================
// Handler cache
// =============================================================================

/// Caches one [`NamespacedStorage`] per plugin *name*, so a reconnecting
/// plugin resolves to the same namespace and sees its data again.
pub struct StorageHandlerCache {
    store: Arc<dyn TableStore>,
    handlers: RwLock<HashMap<String, Arc<NamespacedStorage>>>,
}

impl StorageHandlerCache {
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self {
            store,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn handler_for(&self, plugin_name: &str) -> Arc<NamespacedStorage> {
        if let Some(handler) = self.handlers.read().get(plugin_name) {
            return Arc::clone(handler);
        }
        let handler = Arc::new(NamespacedStorage::new(plugin_name, Arc::clone(&self.store)));
        self.handlers
            .write()
            .entry(plugin_name.to_string())
            .or_insert(handler)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTableStore;

    fn storage(plugin: &str) -> NamespacedStorage {
        NamespacedStorage::new(plugin, Arc::new(MemoryTableStore::new()))
    }

    #[test]
    fn prefix_is_deterministic_and_sanitized() {
        assert_eq!(namespace_prefix("weather"), "weather");
        assert_eq!(namespace_prefix("Weather-Bot"), "weather_bot");
        assert_eq!(namespace_prefix("2fast"), "p_2fast");
    }

    #[test]
    fn physical_name_enforces_whitelist() {
        let storage = storage("weather");
        assert_eq!(storage.physical_name("cities").unwrap(), "weather_cities");
        assert!(matches!(
            storage.physical_name("drop table"),
            Err(StorageError::InvalidTableName(_))
        ));
        assert!(storage.physical_name("1abc").is_err());
        assert!(storage.physical_name("").is_err());
        assert!(storage.physical_name("a;b").is_err());
    }

    #[tokio::test]
    async fn plugins_cannot_see_each_others_tables() {
        let store: Arc<dyn TableStore> = Arc::new(MemoryTableStore::new());
        let a = NamespacedStorage::new("alpha", Arc::clone(&store));
        let b = NamespacedStorage::new("beta", Arc::clone(&store));

        a.execute(&StorageOp::CreateTable {
            table: "notes".into(),
            columns: vec![ColumnSpec {
                name: "body".into(),
                kind: "text".into(),
            }],
        })
        .await
        .unwrap();

        // Same logical name, different physical table.
        let err = b
            .execute(&StorageOp::Insert {
                table: "notes".into(),
                values: BTreeMap::from([("body".to_string(), "hi".to_string())]),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::TableNotFound(_)));
    }

    #[tokio::test]
    async fn handler_cache_survives_reconnect() {
        let cache = StorageHandlerCache::new(Arc::new(MemoryTableStore::new()));
        let first = cache.handler_for("alpha");

        first
            .execute(&StorageOp::CreateTable {
                table: "kv".into(),
                columns: vec![ColumnSpec {
                    name: "k".into(),
                    kind: "text".into(),
                }],
            })
            .await
            .unwrap();
        first
            .execute(&StorageOp::Insert {
                table: "kv".into(),
                values: BTreeMap::from([("k".to_string(), "v1".to_string())]),
            })
            .await
            .unwrap();

        // A "reconnected" plugin with the same name reads its old rows.
        let second = cache.handler_for("alpha");
        let outcome = second
            .execute(&StorageOp::Query {
                table: "kv".into(),
                where_clause: String::new(),
                args: Vec::new(),
                limit: None,
            })
            .await
            .unwrap();
        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.rows[0]["k"], "v1");
    }
}
