//! In-memory backend.
//!
//! Keeps a catalog of materialized tables in process memory. Used by tests
//! and for trying out a project without a warehouse; supports failure
//! injection and artificial latency.

use crate::backend::{Backend, StorageError, TableInfo};
use async_trait::async_trait;
use indexmap::{IndexMap, IndexSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use strata_core::{CoreResult, ViewKey};
use strata_plan::View;

/// One stored table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryTable {
    /// Rendered definition the table was built from
    pub definition: String,
    /// Number of times the table has been (re)built
    pub builds: u32,
}

/// In-memory backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    scope: Option<String>,
    tables: RwLock<IndexMap<String, MemoryTable>>,
    schemas: RwLock<IndexSet<String>>,
    failures: RwLock<IndexMap<ViewKey, String>>,
    materialized: Mutex<Vec<ViewKey>>,
    deleted: Mutex<Vec<ViewKey>>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryBackend {
    /// Create an unscoped backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the environment scope
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Sleep this long inside every materialization
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Pre-populate a physical table
    #[must_use]
    pub fn with_table(self, reference: impl Into<String>) -> Self {
        write(&self.tables).insert(
            reference.into(),
            MemoryTable {
                definition: String::new(),
                builds: 0,
            },
        );
        self
    }

    /// Make materializing `key` fail with `reason`
    pub fn fail_on(&self, key: ViewKey, reason: impl Into<String>) {
        write(&self.failures).insert(key, reason.into());
    }

    /// Stop failing `key`
    pub fn heal(&self, key: &ViewKey) {
        write(&self.failures).shift_remove(key);
    }

    /// Keys materialized so far, in completion order
    #[must_use]
    pub fn materialized(&self) -> Vec<ViewKey> {
        lock(&self.materialized).clone()
    }

    /// Keys deleted so far
    #[must_use]
    pub fn deleted(&self) -> Vec<ViewKey> {
        lock(&self.deleted).clone()
    }

    /// Physical references currently stored, sorted
    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.tables).keys().cloned().collect();
        names.sort();
        names
    }

    /// A stored table by physical reference
    #[must_use]
    pub fn table(&self, reference: &str) -> Option<MemoryTable> {
        read(&self.tables).get(reference).cloned()
    }

    /// Schemas created so far
    #[must_use]
    pub fn schemas(&self) -> Vec<String> {
        read(&self.schemas).iter().cloned().collect()
    }

    /// Highest number of concurrent materializations observed
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn list_tables(&self) -> CoreResult<Vec<TableInfo>> {
        Ok(read(&self.tables)
            .iter()
            .map(|(reference, table)| TableInfo {
                reference: reference.clone(),
                n_rows: 0,
                n_bytes: table.definition.len() as u64,
            })
            .collect())
    }

    async fn create_schema(&self, schema: &str) -> CoreResult<()> {
        let schema = match &self.scope {
            Some(scope) => format!("{}_{}", schema, scope),
            None => schema.to_string(),
        };
        write(&self.schemas).insert(schema);
        Ok(())
    }

    async fn materialize(&self, view: &View) -> CoreResult<()> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let key = view.key();
        if let Some(reason) = read(&self.failures).get(key) {
            return Err(StorageError::Materialize {
                key: key.to_string(),
                reason: reason.clone(),
            }
            .into());
        }

        let reference = self.table_reference(key, true);
        {
            let mut tables = write(&self.tables);
            let builds = tables.get(&reference).map_or(0, |t| t.builds);
            tables.insert(
                reference,
                MemoryTable {
                    definition: view.source().to_string(),
                    builds: builds + 1,
                },
            );
        }
        lock(&self.materialized).push(key.clone());
        Ok(())
    }

    async fn delete(&self, key: &ViewKey) -> CoreResult<()> {
        let reference = self.table_reference(key, true);
        write(&self.tables).shift_remove(&reference);
        lock(&self.deleted).push(key.clone());
        Ok(())
    }

    fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> ViewKey {
        ViewKey::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_materialize_and_list() {
        let backend = MemoryBackend::new().with_scope("max");
        let view = View::query(key("core.orders"), "o.sql", "SELECT 1");
        backend.materialize(&view).await.unwrap();
        backend.materialize(&view).await.unwrap();

        assert_eq!(backend.table_names(), vec!["core_max.orders"]);
        assert_eq!(backend.table("core_max.orders").unwrap().builds, 2);
        let tables = backend.list_tables().await.unwrap();
        assert_eq!(backend.view_key(&tables[0].reference).unwrap(), key("core.orders"));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let backend = MemoryBackend::new();
        let view = View::query(key("core.orders"), "o.sql", "SELECT 1");
        backend.fail_on(key("core.orders"), "division by zero");
        let err = backend.materialize(&view).await.unwrap_err();
        assert!(err.to_string().contains("division by zero"));
        assert!(backend.materialized().is_empty());

        backend.heal(&key("core.orders"));
        backend.materialize(&view).await.unwrap();
        assert_eq!(backend.materialized(), vec![key("core.orders")]);
    }

    #[tokio::test]
    async fn test_delete_and_schemas() {
        let backend = MemoryBackend::new().with_table("old.gone");
        backend.delete(&key("old.gone")).await.unwrap();
        assert!(backend.table_names().is_empty());
        assert_eq!(backend.deleted(), vec![key("old.gone")]);

        backend.create_schema("core").await.unwrap();
        backend.create_schema("core").await.unwrap();
        assert_eq!(backend.schemas(), vec!["core"]);
    }
}
