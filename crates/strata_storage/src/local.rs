//! Local file backend.
//!
//! A single-file catalog on redb. Every materialized view becomes a record
//! keyed by its physical reference; schemas are tracked in a second table.
//! With a scope the catalog file gets a `_<scope>` suffix, so each user
//! builds into their own file.

use crate::backend::{Backend, StorageError, TableInfo};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strata_core::{CoreError, CoreResult, ViewKey};
use strata_plan::{View, ViewKind};
use tracing::{debug, info};

const TABLES: TableDefinition<&str, &[u8]> = TableDefinition::new("tables");
const SCHEMAS: TableDefinition<&str, i64> = TableDefinition::new("schemas");

/// Local backend configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalBackendConfig {
    /// Catalog file path, before scoping
    pub path: PathBuf,
    /// Environment scope
    pub scope: Option<String>,
}

impl Default for LocalBackendConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("strata.redb"),
            scope: None,
        }
    }
}

impl LocalBackendConfig {
    /// Create with a catalog path
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            scope: None,
        }
    }

    /// Set the scope
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Path of the catalog file with the scope applied
    #[must_use]
    pub fn scoped_path(&self) -> PathBuf {
        let Some(scope) = &self.scope else {
            return self.path.clone();
        };
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = match self.path.extension() {
            Some(ext) => format!("{}_{}.{}", stem, scope, ext.to_string_lossy()),
            None => format!("{}_{}", stem, scope),
        };
        self.path.with_file_name(name)
    }
}

/// A stored table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRecord {
    /// Rendered definition
    pub definition: String,
    /// Kind of view it came from
    pub kind: ViewKind,
    /// Row estimate
    pub n_rows: u64,
    /// Byte estimate
    pub n_bytes: u64,
    /// When the table was last built
    pub materialized_at: DateTime<Utc>,
}

/// Local redb-backed backend
pub struct LocalBackend {
    config: LocalBackendConfig,
    path: PathBuf,
    db: Arc<Database>,
}

impl std::fmt::Debug for LocalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBackend")
            .field("path", &self.path)
            .field("scope", &self.config.scope)
            .finish()
    }
}

impl LocalBackend {
    /// Open (or create) the catalog
    ///
    /// # Errors
    ///
    /// Returns error if the catalog cannot be opened
    pub fn open(config: LocalBackendConfig) -> CoreResult<Self> {
        let path = config.scoped_path();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(&path).map_err(catalog_err)?;

        let txn = db.begin_write().map_err(catalog_err)?;
        txn.open_table(TABLES).map_err(catalog_err)?;
        txn.open_table(SCHEMAS).map_err(catalog_err)?;
        txn.commit().map_err(catalog_err)?;

        info!(path = %path.display(), scope = ?config.scope, "Opened local catalog");
        Ok(Self {
            config,
            path,
            db: Arc::new(db),
        })
    }

    /// Path of the catalog file in use
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored record for a key
    ///
    /// # Errors
    ///
    /// Returns error if the catalog read fails
    pub async fn record(&self, key: &ViewKey) -> CoreResult<Option<TableRecord>> {
        let reference = self.table_reference(key, true);
        self.blocking(move |db| {
            let txn = db.begin_read().map_err(catalog_err)?;
            let table = txn.open_table(TABLES).map_err(catalog_err)?;
            let record = match table.get(reference.as_str()).map_err(catalog_err)? {
                Some(bytes) => Some(postcard::from_bytes(bytes.value())?),
                None => None,
            };
            Ok(record)
        })
        .await
    }

    /// Remove the catalog file of this scope
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be removed
    pub fn teardown(self) -> CoreResult<()> {
        let path = self.path.clone();
        drop(self);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), "Removed local catalog");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn blocking<T, F>(&self, f: F) -> CoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> CoreResult<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| CoreError::Internal {
                message: format!("catalog task failed: {}", e),
            })?
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn list_tables(&self) -> CoreResult<Vec<TableInfo>> {
        self.blocking(|db| {
            let txn = db.begin_read().map_err(catalog_err)?;
            let table = txn.open_table(TABLES).map_err(catalog_err)?;
            let mut tables = Vec::new();
            for entry in table.iter().map_err(catalog_err)? {
                let (reference, bytes) = entry.map_err(catalog_err)?;
                let record: TableRecord = postcard::from_bytes(bytes.value())?;
                tables.push(TableInfo {
                    reference: reference.value().to_string(),
                    n_rows: record.n_rows,
                    n_bytes: record.n_bytes,
                });
            }
            Ok(tables)
        })
        .await
    }

    async fn create_schema(&self, schema: &str) -> CoreResult<()> {
        let schema = match &self.config.scope {
            Some(scope) => format!("{}_{}", schema, scope),
            None => schema.to_string(),
        };
        self.blocking(move |db| {
            let txn = db.begin_write().map_err(catalog_err)?;
            {
                let mut table = txn.open_table(SCHEMAS).map_err(catalog_err)?;
                if table.get(schema.as_str()).map_err(catalog_err)?.is_none() {
                    table
                        .insert(schema.as_str(), Utc::now().timestamp())
                        .map_err(catalog_err)?;
                    debug!(schema = %schema, "Created schema");
                }
            }
            txn.commit().map_err(catalog_err)
        })
        .await
    }

    async fn materialize(&self, view: &View) -> CoreResult<()> {
        let reference = self.table_reference(view.key(), true);
        let record = TableRecord {
            definition: view.source().to_string(),
            kind: view.kind(),
            n_rows: 0,
            n_bytes: view.source().len() as u64,
            materialized_at: Utc::now(),
        };
        let bytes = postcard::to_allocvec(&record)?;
        self.blocking(move |db| {
            let txn = db.begin_write().map_err(catalog_err)?;
            {
                let mut table = txn.open_table(TABLES).map_err(catalog_err)?;
                table
                    .insert(reference.as_str(), bytes.as_slice())
                    .map_err(catalog_err)?;
            }
            txn.commit().map_err(catalog_err)?;
            debug!(reference = %reference, "Materialized table");
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &ViewKey) -> CoreResult<()> {
        let reference = self.table_reference(key, true);
        self.blocking(move |db| {
            let txn = db.begin_write().map_err(catalog_err)?;
            {
                let mut table = txn.open_table(TABLES).map_err(catalog_err)?;
                table.remove(reference.as_str()).map_err(catalog_err)?;
            }
            txn.commit().map_err(catalog_err)
        })
        .await
    }

    fn scope(&self) -> Option<&str> {
        self.config.scope.as_deref()
    }
}

fn catalog_err(err: impl Into<redb::Error>) -> CoreError {
    StorageError::Catalog(err.into().to_string()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(s: &str) -> ViewKey {
        ViewKey::parse(s).unwrap()
    }

    #[test]
    fn test_scoped_path() {
        let config = LocalBackendConfig::new("/tmp/warehouse.redb").with_scope("max");
        assert_eq!(config.scoped_path(), PathBuf::from("/tmp/warehouse_max.redb"));
        let config = LocalBackendConfig::new("warehouse");
        assert_eq!(config.scoped_path(), PathBuf::from("warehouse"));
    }

    #[tokio::test]
    async fn test_materialize_list_delete() {
        let dir = TempDir::new().unwrap();
        let config = LocalBackendConfig::new(dir.path().join("wh.redb")).with_scope("max");
        let backend = LocalBackend::open(config).unwrap();
        assert!(backend.path().ends_with("wh_max.redb"));

        let view = View::query(key("core.orders"), "core/orders.sql", "SELECT 1");
        backend.create_schema("core").await.unwrap();
        backend.materialize(&view).await.unwrap();

        let tables = backend.list_tables().await.unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].reference, "core_max.orders");
        assert_eq!(backend.view_key(&tables[0].reference).unwrap(), key("core.orders"));

        let record = backend.record(&key("core.orders")).await.unwrap().unwrap();
        assert_eq!(record.definition, "SELECT 1");
        assert_eq!(record.kind, ViewKind::Query);

        backend.delete(&key("core.orders")).await.unwrap();
        assert!(backend.list_tables().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reopen_keeps_tables() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wh.redb");
        {
            let backend = LocalBackend::open(LocalBackendConfig::new(&path)).unwrap();
            let view = View::query(key("core.orders"), "o.sql", "SELECT 1");
            backend.materialize(&view).await.unwrap();
        }
        let backend = LocalBackend::open(LocalBackendConfig::new(&path)).unwrap();
        assert_eq!(backend.list_tables().await.unwrap().len(), 1);

        backend.teardown().unwrap();
        assert!(!path.exists());
    }
}
