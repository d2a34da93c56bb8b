//! View discovery on disk.
//!
//! Layout: `<views_dir>/<schema>/[<sub>/...]<name>.<ext>`. The top-level
//! directory names the schema, nested directories are folded into the
//! view name. `.sql` files are query views, `.py` files are script views.

use crate::view::View;
use std::fs;
use std::path::{Path, PathBuf};
use strata_core::{CoreError, CoreResult, ViewKey};
use tracing::debug;

/// Schemas that hold assertions and shared helpers, never materialized
pub const RESERVED_SCHEMAS: [&str; 2] = ["tests", "funcs"];

/// Load every view under `dir`, in a deterministic order
///
/// # Errors
///
/// Returns error if the directory cannot be read or a file name does not
/// form a valid key
pub fn discover(dir: &Path) -> CoreResult<Vec<View>> {
    if !dir.is_dir() {
        return Err(CoreError::NotFound {
            kind: "Views directory".to_string(),
            id: dir.display().to_string(),
        });
    }

    let mut files = Vec::new();
    collect_files(dir, &mut files)?;
    files.sort();

    let mut views = Vec::new();
    for path in files {
        let Some(kind) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if kind != "sql" && kind != "py" {
            continue;
        }
        let relative = path.strip_prefix(dir).map_err(|err| CoreError::Internal {
            message: err.to_string(),
        })?;
        let key = key_for(relative)?;
        let text = fs::read_to_string(&path)?;
        debug!(view = %key, path = %path.display(), "discovered view");
        views.push(match kind {
            "sql" => View::query(key, path, text),
            _ => View::script(key, path, text),
        });
    }

    Ok(views)
}

/// Drop views living in a reserved schema
#[must_use]
pub fn without_reserved(views: Vec<View>) -> Vec<View> {
    views
        .into_iter()
        .filter(|view| !RESERVED_SCHEMAS.contains(&view.schema()))
        .collect()
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> CoreResult<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.') || n.starts_with('_'));
        if hidden {
            continue;
        }
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

fn key_for(relative: &Path) -> CoreResult<ViewKey> {
    let mut parts: Vec<String> = relative
        .parent()
        .into_iter()
        .flat_map(Path::components)
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    let stem = relative
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    parts.push(stem);
    ViewKey::new(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::ViewKind;

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn test_discover_layout() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "staging/orders.sql", "SELECT * FROM raw.orders");
        write(dir.path(), "core/sales/eu.sql", "SELECT * FROM staging.orders");
        write(dir.path(), "core/fx.py", "df = load_table(\"staging.orders\")");
        write(dir.path(), "core/README.md", "docs");
        write(dir.path(), "core/.hidden.sql", "SELECT 1");

        let views = discover(dir.path()).unwrap();
        let keys: Vec<String> = views.iter().map(|v| v.key().to_string()).collect();
        assert_eq!(keys, vec!["core.fx", "core.sales.eu", "staging.orders"]);
        assert_eq!(views[0].kind(), ViewKind::Script);
        assert_eq!(views[1].kind(), ViewKind::Query);
    }

    #[test]
    fn test_top_level_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "orphan.sql", "SELECT 1");
        assert!(discover(dir.path()).is_err());
    }

    #[test]
    fn test_missing_dir() {
        let err = discover(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[test]
    fn test_without_reserved() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "tests/check_orders.sql", "SELECT 1");
        write(dir.path(), "funcs/helpers.sql", "SELECT 1");
        write(dir.path(), "core/orders.sql", "SELECT 1");

        let views = without_reserved(discover(dir.path()).unwrap());
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].schema(), "core");
    }
}
