//! Logical to physical table reference mapping.

use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use regex::{Captures, Regex};

/// Immutable mapping from logical table references to physical ones.
///
/// Built once per run before any view is dispatched. References absent
/// from the mapping keep their logical (production) name.
#[derive(Debug, Clone, Default)]
pub struct TableReferenceMapping {
    entries: IndexMap<String, String>,
    pattern: OnceCell<Option<Regex>>,
}

impl TableReferenceMapping {
    /// Create an empty mapping
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Physical reference for a logical one, if remapped
    #[must_use]
    pub fn get(&self, logical: &str) -> Option<&str> {
        self.entries.get(logical).map(String::as_str)
    }

    /// Whether a logical reference is remapped
    #[must_use]
    pub fn contains(&self, logical: &str) -> bool {
        self.entries.contains_key(logical)
    }

    /// Number of remapped references
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is remapped
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(logical, physical)` pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Rewrite every whole-word occurrence of a logical reference in `text`.
    ///
    /// Longer references win over shorter ones sharing a prefix and the
    /// text is scanned once, so a replacement is never rewritten again.
    #[must_use]
    pub fn rewrite(&self, text: &str) -> String {
        match self.pattern() {
            Some(pattern) => pattern
                .replace_all(text, |caps: &Captures<'_>| {
                    let logical = &caps[0];
                    self.get(logical).unwrap_or(logical).to_string()
                })
                .into_owned(),
            None => text.to_string(),
        }
    }

    fn pattern(&self) -> Option<&Regex> {
        self.pattern
            .get_or_init(|| {
                if self.entries.is_empty() {
                    return None;
                }
                let mut logical: Vec<&str> = self.entries.keys().map(String::as_str).collect();
                logical.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
                let alternation = logical
                    .iter()
                    .map(|r| regex::escape(r))
                    .collect::<Vec<_>>()
                    .join("|");
                Regex::new(&format!(r"\b(?:{})\b", alternation)).ok()
            })
            .as_ref()
    }
}

impl FromIterator<(String, String)> for TableReferenceMapping {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            entries: iter
                .into_iter()
                .filter(|(logical, physical)| logical != physical)
                .collect(),
            pattern: OnceCell::new(),
        }
    }
}

impl PartialEq for TableReferenceMapping {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for TableReferenceMapping {}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(pairs: &[(&str, &str)]) -> TableReferenceMapping {
        pairs
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect()
    }

    #[test]
    fn test_rewrite_whole_words() {
        let m = mapping(&[("staging.orders", "staging_max.orders")]);
        let out = m.rewrite("SELECT * FROM staging.orders JOIN staging.orders_v2 USING (id)");
        assert_eq!(
            out,
            "SELECT * FROM staging_max.orders JOIN staging.orders_v2 USING (id)"
        );
    }

    #[test]
    fn test_rewrite_single_pass() {
        let m = mapping(&[("a.b", "a_x.b"), ("a_x.b", "never.used")]);
        assert_eq!(m.rewrite("FROM a.b"), "FROM a_x.b");
    }

    #[test]
    fn test_longest_reference_wins() {
        let m = mapping(&[("core.sales", "core_x.sales"), ("core.sales__eu", "core_x.sales__eu")]);
        assert_eq!(m.rewrite("FROM core.sales__eu"), "FROM core_x.sales__eu");
    }

    #[test]
    fn test_identity_entries_dropped() {
        let m = mapping(&[("a.b", "a.b"), ("c.d", "c_x.d")]);
        assert_eq!(m.len(), 1);
        assert!(!m.contains("a.b"));
    }

    #[test]
    fn test_empty_mapping_passthrough() {
        let m = TableReferenceMapping::new();
        assert!(m.is_empty());
        assert_eq!(m.rewrite("SELECT 1"), "SELECT 1");
    }
}
