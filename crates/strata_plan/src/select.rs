//! Selection patterns.
//!
//! Grammar, applied per pattern and unioned:
//!
//! | pattern            | selects                                        |
//! |--------------------|------------------------------------------------|
//! | `core.orders`      | exactly that key                               |
//! | `core.*`, `core.s*`| keys whose dotted form starts with the prefix  |
//! | `core/`, `core/sales/` | every key under that schema / sub path     |
//! | `+core.orders`     | the match plus all its ancestors               |
//! | `core.orders+`     | the match plus all its descendants             |
//!
//! An empty pattern list selects everything. A pattern matching nothing is
//! an error.

use crate::dag::Dag;
use indexmap::IndexSet;
use strata_core::{CoreError, CoreResult, ViewKey};

/// What a pattern matches before closure operators apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// One key
    Exact(ViewKey),
    /// Keys whose canonical form starts with this prefix
    Prefix(String),
}

/// A parsed selection pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    /// Base match
    pub target: Target,
    /// Include ancestors of each match
    pub ancestors: bool,
    /// Include descendants of each match
    pub descendants: bool,
}

impl Pattern {
    /// Parse a pattern string
    ///
    /// # Errors
    ///
    /// Returns error if the pattern is empty or not a valid key
    pub fn parse(raw: &str) -> CoreResult<Self> {
        let mut body = raw.trim();
        let ancestors = body.starts_with('+');
        if ancestors {
            body = &body[1..];
        }
        let descendants = body.ends_with('+');
        if descendants {
            body = &body[..body.len() - 1];
        }
        if body.is_empty() {
            return Err(CoreError::Validation {
                field: "select".to_string(),
                reason: format!("empty pattern {:?}", raw),
            });
        }

        let target = if let Some(dir) = body.strip_suffix('/') {
            Target::Prefix(format!("{}.", dir.replace('/', ".")))
        } else if let Some(prefix) = body.strip_suffix('*') {
            Target::Prefix(prefix.to_string())
        } else {
            Target::Exact(ViewKey::parse(body)?)
        };

        Ok(Self {
            target,
            ancestors,
            descendants,
        })
    }

    /// Resolve against a graph
    #[must_use]
    pub fn resolve(&self, dag: &Dag) -> IndexSet<ViewKey> {
        let base: Vec<ViewKey> = match &self.target {
            Target::Exact(key) if dag.contains(key) => vec![key.clone()],
            Target::Exact(_) => Vec::new(),
            Target::Prefix(prefix) => dag
                .keys()
                .filter(|k| k.to_string().starts_with(prefix.as_str()))
                .cloned()
                .collect(),
        };

        let mut selected = IndexSet::new();
        for key in base {
            if self.ancestors {
                selected.extend(dag.ancestors(&key));
            }
            if self.descendants {
                selected.extend(dag.descendants(&key));
            }
            selected.insert(key);
        }
        selected
    }
}

impl Dag {
    /// Resolve selection patterns to a set of keys, in graph order
    ///
    /// # Errors
    ///
    /// Returns error if a pattern is malformed or matches nothing
    pub fn select<S: AsRef<str>>(&self, patterns: &[S]) -> CoreResult<IndexSet<ViewKey>> {
        if patterns.is_empty() {
            return Ok(self.keys().cloned().collect());
        }

        let mut matched = IndexSet::new();
        for raw in patterns {
            let pattern = Pattern::parse(raw.as_ref())?;
            let found = pattern.resolve(self);
            if found.is_empty() {
                return Err(CoreError::NotFound {
                    kind: "Views matching".to_string(),
                    id: raw.as_ref().to_string(),
                });
            }
            matched.extend(found);
        }

        Ok(self.keys().filter(|k| matched.contains(*k)).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::View;

    fn key(s: &str) -> ViewKey {
        ViewKey::parse(s).unwrap()
    }

    fn dag() -> Dag {
        let v = |name: &str, sql: &str| View::query(key(name), format!("{name}.sql"), sql);
        Dag::from_views(vec![
            v("raw.orders", "SELECT 1"),
            v("staging.orders", "SELECT * FROM raw.orders"),
            v("core.sales.eu", "SELECT * FROM staging.orders"),
            v("core.sales.us", "SELECT * FROM staging.orders"),
            v("core.customers", "SELECT 1"),
        ])
        .unwrap()
    }

    fn names(set: IndexSet<ViewKey>) -> Vec<String> {
        set.into_iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_select_all() {
        let dag = dag();
        assert_eq!(dag.select::<&str>(&[]).unwrap().len(), 5);
    }

    #[test]
    fn test_select_exact() {
        let dag = dag();
        assert_eq!(names(dag.select(&["staging.orders"]).unwrap()), vec!["staging.orders"]);
    }

    #[test]
    fn test_select_wildcard_and_dir() {
        let dag = dag();
        assert_eq!(
            names(dag.select(&["core.sales.*"]).unwrap()),
            vec!["core.sales.eu", "core.sales.us"]
        );
        assert_eq!(names(dag.select(&["core/"]).unwrap()).len(), 3);
        assert_eq!(names(dag.select(&["core/sales/"]).unwrap()).len(), 2);
    }

    #[test]
    fn test_select_closures() {
        let dag = dag();
        assert_eq!(
            names(dag.select(&["+core.sales.eu"]).unwrap()),
            vec!["raw.orders", "staging.orders", "core.sales.eu"]
        );
        assert_eq!(
            names(dag.select(&["staging.orders+"]).unwrap()),
            vec!["staging.orders", "core.sales.eu", "core.sales.us"]
        );
    }

    #[test]
    fn test_select_union_in_graph_order() {
        let dag = dag();
        assert_eq!(
            names(dag.select(&["core.customers", "raw.orders"]).unwrap()),
            vec!["raw.orders", "core.customers"]
        );
    }

    #[test]
    fn test_select_unknown() {
        let dag = dag();
        assert!(matches!(dag.select(&["core.nope"]), Err(CoreError::NotFound { .. })));
        assert!(dag.select(&["+"]).is_err());
    }

    #[test]
    fn test_pattern_parse() {
        let p = Pattern::parse("+core.orders+").unwrap();
        assert!(p.ancestors && p.descendants);
        assert_eq!(p.target, Target::Exact(key("core.orders")));
        assert_eq!(Pattern::parse("core/").unwrap().target, Target::Prefix("core.".to_string()));
    }
}
