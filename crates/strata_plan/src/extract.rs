//! Dependency extraction from view sources.
//!
//! Extraction is a policy: the planner only relies on the
//! [`DependencyExtractor`] contract (source text in, referenced keys out).
//! The default heuristics are regex based and deliberately conservative.

use indexmap::IndexSet;
use once_cell::sync::Lazy;
use regex::Regex;
use strata_core::{CoreError, CoreResult, ViewKey};

/// Comments and string literals, blanked before scanning SQL
static SQL_NOISE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)--[^\n]*|/\*.*?\*/|'(?:[^']|'')*'").expect("valid regex")
});

/// A table position: the token after FROM or JOIN, and whether a call follows
static SQL_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(?:from|join)\s+([\w.`"\[\]]+)(\s*\()?"#).expect("valid regex")
});

/// Script calls that load a table or run a query with a literal argument
static SCRIPT_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?s)\b(load_table|read_table|read_gbq|read_sql\w*|query\w*)\s*\(\s*([rRbBuUfF]{0,2})("""(.*?)"""|'''(.*?)'''|"((?:[^"\\\n]|\\.)*)"|'((?:[^'\\\n]|\\.)*)')"#,
    )
    .expect("valid regex")
});

/// Words that may precede a parenthesized subquery or join group
const NON_CALL_WORDS: &[&str] = &[
    "all", "and", "any", "as", "exists", "from", "in", "join", "lateral", "not", "on", "or",
    "select", "some", "union", "using", "where", "with",
];

/// Whether the parenthesis at `open` starts a function's argument list
/// rather than a subquery or a grouping
fn opens_call(sql: &str, open: usize) -> bool {
    let body = sql[open + 1..].trim_start();
    let first = body
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .next()
        .unwrap_or_default();
    if first.eq_ignore_ascii_case("select") || first.eq_ignore_ascii_case("with") {
        return false;
    }

    let before = sql[..open].trim_end();
    let start = before
        .char_indices()
        .rev()
        .find(|(_, c)| !(c.is_alphanumeric() || *c == '_'))
        .map_or(0, |(i, c)| i + c.len_utf8());
    let word = &before[start..];
    !word.is_empty() && !NON_CALL_WORDS.iter().any(|w| word.eq_ignore_ascii_case(w))
}

/// For each byte of `sql`, whether the innermost enclosing parenthesis is
/// a function call
fn call_context(sql: &str) -> Vec<bool> {
    let mut stack: Vec<bool> = Vec::new();
    let mut context = Vec::with_capacity(sql.len());
    for (i, byte) in sql.bytes().enumerate() {
        match byte {
            b'(' => stack.push(opens_call(sql, i)),
            b')' => {
                stack.pop();
            }
            _ => {}
        }
        context.push(stack.last().copied().unwrap_or(false));
    }
    context
}

/// Extracts the keys of the tables a source reads from
pub trait DependencyExtractor: Send + Sync {
    /// Extract referenced keys from `source`
    ///
    /// # Errors
    ///
    /// Returns error if the source is malformed in a way the extractor
    /// cannot recover from
    fn extract(&self, source: &str) -> CoreResult<IndexSet<ViewKey>>;
}

/// Qualified table references following `FROM` / `JOIN`.
///
/// Unqualified names (CTE aliases, table functions, bare columns) are not
/// dependencies. A qualified name with an empty or invalid segment is a
/// parse error.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlExtractor;

impl DependencyExtractor for SqlExtractor {
    fn extract(&self, source: &str) -> CoreResult<IndexSet<ViewKey>> {
        let cleaned = SQL_NOISE.replace_all(source, " ");
        let in_call = call_context(&cleaned);
        let mut keys = IndexSet::new();

        for caps in SQL_TABLE.captures_iter(&cleaned) {
            // `EXTRACT(x FROM y)`, `TRIM(... FROM y)` and table functions
            let keyword = caps.get(0).map_or(0, |m| m.start());
            if caps.get(2).is_some() || in_call.get(keyword).copied().unwrap_or(false) {
                continue;
            }
            let raw = &caps[1];
            let reference: String = raw
                .chars()
                .filter(|c| !matches!(c, '`' | '"' | '[' | ']'))
                .collect();
            if !reference.contains('.') {
                continue;
            }
            let key = ViewKey::from_table_reference(&reference).map_err(|err| {
                CoreError::ParseError {
                    location: format!("table reference {:?}", raw),
                    message: err.to_string(),
                }
            })?;
            keys.insert(key);
        }

        Ok(keys)
    }
}

/// Best-effort scan of script sources.
///
/// Recognizes `load_table("schema.name")`-style loads and
/// `query("SELECT ...")`-style query strings. Calls whose argument is not a
/// plain literal (variables, f-strings) cannot be resolved statically and
/// are skipped, as are literals that fail to parse.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptExtractor;

impl DependencyExtractor for ScriptExtractor {
    fn extract(&self, source: &str) -> CoreResult<IndexSet<ViewKey>> {
        let mut keys = IndexSet::new();

        for caps in SCRIPT_CALL.captures_iter(source) {
            if caps[2].contains(|c: char| c.eq_ignore_ascii_case(&'f')) {
                continue;
            }
            let literal = (4..=7)
                .find_map(|i| caps.get(i))
                .map(|m| m.as_str())
                .unwrap_or_default();

            match &caps[1] {
                "load_table" | "read_table" => {
                    if let Ok(key) = ViewKey::from_table_reference(literal.trim()) {
                        keys.insert(key);
                    }
                }
                _ => {
                    if let Ok(found) = SqlExtractor.extract(literal) {
                        keys.extend(found);
                    }
                }
            }
        }

        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> ViewKey {
        ViewKey::parse(s).unwrap()
    }

    #[test]
    fn test_sql_simple() {
        let deps = SqlExtractor
            .extract("SELECT * FROM staging.orders o JOIN core.sales__customers c ON o.id = c.id")
            .unwrap();
        assert_eq!(deps.len(), 2);
        assert!(deps.contains(&key("staging.orders")));
        assert!(deps.contains(&key("core.sales.customers")));
    }

    #[test]
    fn test_sql_ignores_ctes_and_functions() {
        let sql = "WITH recent AS (SELECT * FROM raw.events)\n\
                   SELECT * FROM recent, read_csv('x.csv') JOIN (SELECT 1) s ON true";
        let deps = SqlExtractor.extract(sql).unwrap();
        assert_eq!(deps.into_iter().collect::<Vec<_>>(), vec![key("raw.events")]);
    }

    #[test]
    fn test_sql_from_inside_function_arguments() {
        let sql = "SELECT EXTRACT(year FROM o.created_at::date) AS y FROM raw.orders o";
        let deps = SqlExtractor.extract(sql).unwrap();
        assert_eq!(deps.into_iter().collect::<Vec<_>>(), vec![key("raw.orders")]);

        let sql = "SELECT EXTRACT(year FROM o.created_at) AS y,\n\
                   TRIM(BOTH ' ' FROM c.name) AS n,\n\
                   SUBSTRING(c.code FROM 1 FOR 3) AS p\n\
                   FROM raw.orders o JOIN raw.customers c ON o.customer_id = c.id";
        let deps = SqlExtractor.extract(sql).unwrap();
        assert_eq!(
            deps.into_iter().collect::<Vec<_>>(),
            vec![key("raw.orders"), key("raw.customers")]
        );
    }

    #[test]
    fn test_sql_subqueries_still_scanned() {
        let sql = "SELECT * FROM (SELECT * FROM raw.orders) o\n\
                   WHERE o.id IN (SELECT order_id FROM raw.refunds)\n\
                   AND EXISTS (SELECT 1 FROM raw.customers c WHERE COALESCE((SELECT 1 FROM raw.fx), 0) = 1)";
        let deps = SqlExtractor.extract(sql).unwrap();
        assert_eq!(
            deps.into_iter().collect::<Vec<_>>(),
            vec![key("raw.orders"), key("raw.refunds"), key("raw.customers"), key("raw.fx")]
        );
    }

    #[test]
    fn test_sql_ignores_comments_and_strings() {
        let sql = "-- FROM docs.readme\nSELECT 'FROM fake.table' AS s /* JOIN no.pe */ FROM a.b";
        let deps = SqlExtractor.extract(sql).unwrap();
        assert_eq!(deps.into_iter().collect::<Vec<_>>(), vec![key("a.b")]);
    }

    #[test]
    fn test_sql_quoted_identifiers() {
        let deps = SqlExtractor.extract("SELECT * FROM `core`.`orders`").unwrap();
        assert!(deps.contains(&key("core.orders")));
    }

    #[test]
    fn test_sql_malformed_reference() {
        let err = SqlExtractor.extract("SELECT * FROM core..orders").unwrap_err();
        assert!(matches!(err, CoreError::ParseError { .. }));
    }

    #[test]
    fn test_script_load_and_query() {
        let script = r#"
"""Monthly revenue."""
import pandas as pd

orders = load_table("staging.orders")
fx = con.query("SELECT * FROM core.fx_rates")
other = client.query_and_wait('''
    SELECT * FROM core.customers
''')
"#;
        let deps = ScriptExtractor.extract(script).unwrap();
        assert!(deps.contains(&key("staging.orders")));
        assert!(deps.contains(&key("core.fx_rates")));
        assert!(deps.contains(&key("core.customers")));
        assert_eq!(deps.len(), 3);
    }

    #[test]
    fn test_script_dynamic_calls_skipped() {
        let script = r#"
name = "staging.orders"
a = load_table(name)
b = con.query(f"SELECT * FROM {name}")
c = con.query("SELECT * FROM broken..ref")
"#;
        let deps = ScriptExtractor.extract(script).unwrap();
        assert!(deps.is_empty());
    }
}
