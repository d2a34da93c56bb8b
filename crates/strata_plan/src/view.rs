//! Views: the materializable units of a STRATA project.
//!
//! A view is either query-defined (SQL) or script-defined. Both variants
//! expose the same three operations: dependencies, rendering against a
//! table reference mapping, and a description.

use crate::extract::{DependencyExtractor, ScriptExtractor, SqlExtractor};
use indexmap::IndexSet;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strata_core::{CoreError, CoreResult, TableReferenceMapping, ViewKey};

/// View variant tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViewKind {
    /// Declarative SQL query
    Query,
    /// Executable script
    Script,
}

impl std::fmt::Display for ViewKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Query => write!(f, "query"),
            Self::Script => write!(f, "script"),
        }
    }
}

/// A query-defined view
#[derive(Debug, Clone)]
pub struct QueryView {
    key: ViewKey,
    path: PathBuf,
    query: String,
    dependencies: OnceCell<IndexSet<ViewKey>>,
}

impl QueryView {
    /// Create a query view; trailing whitespace and semicolons are dropped
    #[must_use]
    pub fn new(key: ViewKey, path: impl Into<PathBuf>, query: impl AsRef<str>) -> Self {
        Self {
            key,
            path: path.into(),
            query: query.as_ref().trim_end().trim_end_matches(';').to_string(),
            dependencies: OnceCell::new(),
        }
    }

    /// The query text
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }
}

/// A script-defined view
#[derive(Debug, Clone)]
pub struct ScriptView {
    key: ViewKey,
    path: PathBuf,
    source: String,
    dependencies: OnceCell<IndexSet<ViewKey>>,
}

impl ScriptView {
    /// Create a script view
    #[must_use]
    pub fn new(key: ViewKey, path: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        Self {
            key,
            path: path.into(),
            source: source.into(),
            dependencies: OnceCell::new(),
        }
    }
}

/// A materializable view
#[derive(Debug, Clone)]
pub enum View {
    /// Query-defined view
    Query(QueryView),
    /// Script-defined view
    Script(ScriptView),
}

impl View {
    /// Shorthand for a query view
    #[must_use]
    pub fn query(key: ViewKey, path: impl Into<PathBuf>, query: impl AsRef<str>) -> Self {
        Self::Query(QueryView::new(key, path, query))
    }

    /// Shorthand for a script view
    #[must_use]
    pub fn script(key: ViewKey, path: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        Self::Script(ScriptView::new(key, path, source))
    }

    /// The view's key
    #[must_use]
    pub fn key(&self) -> &ViewKey {
        match self {
            Self::Query(v) => &v.key,
            Self::Script(v) => &v.key,
        }
    }

    /// Declared schema
    #[must_use]
    pub fn schema(&self) -> &str {
        self.key().schema()
    }

    /// Where the view was loaded from
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Query(v) => &v.path,
            Self::Script(v) => &v.path,
        }
    }

    /// Raw source text
    #[must_use]
    pub fn source(&self) -> &str {
        match self {
            Self::Query(v) => &v.query,
            Self::Script(v) => &v.source,
        }
    }

    /// Variant tag
    #[must_use]
    pub fn kind(&self) -> ViewKind {
        match self {
            Self::Query(_) => ViewKind::Query,
            Self::Script(_) => ViewKind::Script,
        }
    }

    /// Keys of the tables this view reads, computed once.
    ///
    /// # Errors
    ///
    /// Query views fail with [`CoreError::ParseError`] on a malformed table
    /// reference. Script extraction never fails.
    pub fn dependencies(&self) -> CoreResult<&IndexSet<ViewKey>> {
        match self {
            Self::Query(v) => v
                .dependencies
                .get_or_try_init(|| SqlExtractor.extract(&v.query))
                .map_err(|err| self.locate(err)),
            Self::Script(v) => v
                .dependencies
                .get_or_try_init(|| ScriptExtractor.extract(&v.source)),
        }
    }

    /// Extract dependencies with a custom policy (not cached)
    ///
    /// # Errors
    ///
    /// Propagates the extractor's error
    pub fn dependencies_with(&self, extractor: &dyn DependencyExtractor) -> CoreResult<IndexSet<ViewKey>> {
        extractor.extract(self.source()).map_err(|err| self.locate(err))
    }

    /// A copy with table references rewritten through `mapping`.
    ///
    /// Script views cannot be rewritten safely and are returned unchanged.
    #[must_use]
    pub fn render(&self, mapping: &TableReferenceMapping) -> View {
        match self {
            Self::Query(v) => Self::Query(QueryView {
                key: v.key.clone(),
                path: v.path.clone(),
                query: mapping.rewrite(&v.query),
                dependencies: OnceCell::new(),
            }),
            Self::Script(_) => self.clone(),
        }
    }

    /// Leading documentation of the source, if any
    #[must_use]
    pub fn description(&self) -> Option<String> {
        let text = match self {
            Self::Query(v) => sql_description(&v.query),
            Self::Script(v) => script_description(&v.source),
        };
        (!text.is_empty()).then_some(text)
    }

    fn locate(&self, err: CoreError) -> CoreError {
        match err {
            CoreError::ParseError { location, message } => CoreError::ParseError {
                location: format!("{} ({}, {})", self.key(), self.path().display(), location),
                message,
            },
            other => other,
        }
    }
}

impl std::fmt::Display for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

fn sql_description(query: &str) -> String {
    query
        .trim()
        .lines()
        .take_while(|line| line.starts_with("--"))
        .map(|line| line.trim_start_matches('-').trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn script_description(source: &str) -> String {
    let body = source.trim_start();
    for quote in ["\"\"\"", "'''"] {
        if let Some(rest) = body.strip_prefix(quote) {
            return rest
                .split(quote)
                .next()
                .unwrap_or_default()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
        }
    }
    body.lines()
        .take_while(|line| line.starts_with('#'))
        .filter(|line| !line.starts_with("#!"))
        .map(|line| line.trim_start_matches('#').trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> ViewKey {
        ViewKey::parse(s).unwrap()
    }

    fn mapping(pairs: &[(&str, &str)]) -> TableReferenceMapping {
        pairs
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect()
    }

    #[test]
    fn test_query_view_dependencies() {
        let view = View::query(
            key("marts.revenue"),
            "views/marts/revenue.sql",
            "SELECT SUM(amount) FROM staging.orders;\n",
        );
        let deps = view.dependencies().unwrap();
        assert_eq!(deps.len(), 1);
        assert!(deps.contains(&key("staging.orders")));
        assert_eq!(view.source(), "SELECT SUM(amount) FROM staging.orders");
    }

    #[test]
    fn test_query_view_parse_error_names_view() {
        let view = View::query(key("marts.bad"), "views/marts/bad.sql", "SELECT * FROM a..b");
        let err = view.dependencies().unwrap_err();
        match err {
            CoreError::ParseError { location, .. } => assert!(location.contains("marts.bad")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_render_rewrites_query() {
        let view = View::query(key("marts.revenue"), "r.sql", "SELECT * FROM staging.orders");
        let rendered = view.render(&mapping(&[("staging.orders", "staging_max.orders")]));
        assert_eq!(rendered.source(), "SELECT * FROM staging_max.orders");
        assert_eq!(rendered.key(), view.key());
        assert_eq!(rendered.kind(), ViewKind::Query);
    }

    #[test]
    fn test_render_script_passthrough() {
        let src = "df = load_table(\"staging.orders\")";
        let view = View::script(key("marts.py_view"), "p.py", src);
        let rendered = view.render(&mapping(&[("staging.orders", "staging_max.orders")]));
        assert_eq!(rendered.source(), src);
    }

    #[test]
    fn test_sql_description() {
        let view = View::query(
            key("core.orders"),
            "o.sql",
            "-- All orders.\n-- One row per order.\nSELECT 1",
        );
        assert_eq!(view.description().as_deref(), Some("All orders. One row per order."));

        let bare = View::query(key("core.bare"), "b.sql", "SELECT 1");
        assert!(bare.description().is_none());
    }

    #[test]
    fn test_script_description() {
        let doc = View::script(key("core.a"), "a.py", "\"\"\"Daily\n   exchange rates.\"\"\"\nimport x");
        assert_eq!(doc.description().as_deref(), Some("Daily exchange rates."));

        let hashed = View::script(key("core.b"), "b.py", "#!/usr/bin/env python\n# Fx rates\nimport x");
        assert_eq!(hashed.description().as_deref(), Some("Fx rates"));
    }
}
