//! The storage backend contract.
//!
//! The build engine never talks to an analytical engine directly. It
//! consumes this trait: open the views, list and delete physical tables,
//! create schemas, materialize rendered views, and translate between
//! [`ViewKey`]s and physical table references.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use strata_core::{CoreError, CoreResult, NAME_SEPARATOR, ViewKey};
use strata_plan::View;

/// A physical table known to the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    /// Physical table reference
    pub reference: String,
    /// Estimated row count
    pub n_rows: u64,
    /// Estimated size in bytes
    pub n_bytes: u64,
}

/// Storage errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// The catalog database failed
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// A reference does not belong to this backend's namespace
    #[error("Reference {reference} is outside scope {scope:?}")]
    OutOfScope {
        /// Physical table reference
        reference: String,
        /// Scope of the backend
        scope: Option<String>,
    },

    /// The cache artifact was written by an incompatible version
    #[error("Cache format version {found} is not supported (expected {expected})")]
    CacheVersion {
        /// Version in the file
        found: u32,
        /// Version this build writes
        expected: u32,
    },

    /// A materialization was rejected
    #[error("Materialization of {key} failed: {reason}")]
    Materialize {
        /// View being materialized
        key: String,
        /// Backend message
        reason: String,
    },
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::CacheVersion { .. } => CoreError::InvalidEncoding {
                reason: err.to_string(),
            },
            other => CoreError::Backend {
                reason: other.to_string(),
            },
        }
    }
}

/// Storage and execution backend
#[async_trait]
pub trait Backend: Send + Sync {
    /// Load the managed views from a source directory
    ///
    /// # Errors
    ///
    /// Returns error if discovery fails
    async fn open_views(&self, dir: &Path) -> CoreResult<Vec<View>> {
        strata_plan::discover(dir)
    }

    /// Physical tables in this backend's namespace
    async fn list_tables(&self) -> CoreResult<Vec<TableInfo>>;

    /// Create a schema if it does not exist yet
    async fn create_schema(&self, schema: &str) -> CoreResult<()>;

    /// Materialize a rendered view, replacing any existing table
    async fn materialize(&self, view: &View) -> CoreResult<()>;

    /// Delete the table of a key
    async fn delete(&self, key: &ViewKey) -> CoreResult<()>;

    /// Environment scope (usually a user name), if any
    fn scope(&self) -> Option<&str>;

    /// Physical reference of a key; `scoped` applies the environment scope
    fn table_reference(&self, key: &ViewKey, scoped: bool) -> String {
        naming::table_reference(key, if scoped { self.scope() } else { None })
    }

    /// Key of a physical reference, stripping the environment scope
    ///
    /// # Errors
    ///
    /// Returns error if the reference is malformed
    fn view_key(&self, reference: &str) -> CoreResult<ViewKey> {
        naming::view_key(reference, self.scope())
    }
}

/// The default physical naming convention.
///
/// `core.sales__orders` becomes `core_<scope>.sales__orders` when scoped;
/// the scope is a schema suffix so scoped and production tables never share
/// a namespace.
pub mod naming {
    use super::*;

    /// Physical reference of `key` under an optional scope
    #[must_use]
    pub fn table_reference(key: &ViewKey, scope: Option<&str>) -> String {
        match scope {
            Some(scope) => format!("{}_{}.{}", key.schema(), scope, key.name()),
            None => key.table_reference(),
        }
    }

    /// Key of a physical reference under an optional scope
    ///
    /// # Errors
    ///
    /// Returns error if the reference is malformed
    pub fn view_key(reference: &str, scope: Option<&str>) -> CoreResult<ViewKey> {
        let Some((schema, name)) = reference.split_once('.') else {
            return Err(CoreError::InvalidKey {
                reason: format!("unqualified table reference {:?}", reference),
            });
        };
        let schema = match scope {
            Some(scope) => schema
                .strip_suffix(&format!("_{}", scope))
                .ok_or_else(|| StorageError::OutOfScope {
                    reference: reference.to_string(),
                    scope: Some(scope.to_string()),
                })?,
            None => schema,
        };
        let mut parts = vec![schema.to_string()];
        parts.extend(name.split(NAME_SEPARATOR).map(str::to_string));
        ViewKey::new(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::naming;
    use super::*;

    fn key(s: &str) -> ViewKey {
        ViewKey::parse(s).unwrap()
    }

    #[test]
    fn test_unscoped_naming() {
        let k = key("core.sales.orders");
        assert_eq!(naming::table_reference(&k, None), "core.sales__orders");
        assert_eq!(naming::view_key("core.sales__orders", None).unwrap(), k);
    }

    #[test]
    fn test_scoped_naming() {
        let k = key("core.sales.orders");
        let reference = naming::table_reference(&k, Some("max"));
        assert_eq!(reference, "core_max.sales__orders");
        assert_eq!(naming::view_key(&reference, Some("max")).unwrap(), k);
    }

    #[test]
    fn test_out_of_scope() {
        let err = naming::view_key("core.orders", Some("max")).unwrap_err();
        assert!(matches!(err, CoreError::Backend { .. }));
        assert!(naming::view_key("orders", None).is_err());
    }

    #[test]
    fn test_storage_error_conversion() {
        let err: CoreError = StorageError::CacheVersion { found: 9, expected: 1 }.into();
        assert!(matches!(err, CoreError::InvalidEncoding { .. }));
    }
}
