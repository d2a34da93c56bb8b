//! Table reference mapping for a run.

use indexmap::IndexSet;
use strata_core::{TableReferenceMapping, ViewKey};
use strata_plan::Dag;
use strata_storage::Backend;
use tracing::debug;

/// Compute the logical to physical reference rewrites for a run.
///
/// By default every managed view is redirected into the backend's scoped
/// namespace. With `freeze_unselected` only the selected views are; the
/// rest keep their production reference so a partial rebuild reads
/// unselected inputs from the shared store.
#[must_use]
pub fn make_table_reference_mapping(
    dag: &Dag,
    backend: &dyn Backend,
    selected: &IndexSet<ViewKey>,
    freeze_unselected: bool,
) -> TableReferenceMapping {
    let keys: Box<dyn Iterator<Item = &ViewKey>> = if freeze_unselected {
        Box::new(selected.iter())
    } else {
        Box::new(dag.keys())
    };
    let mapping: TableReferenceMapping = keys
        .map(|key| (key.table_reference(), backend.table_reference(key, true)))
        .collect();

    debug!(entries = mapping.len(), freeze_unselected, "Built table reference mapping");
    mapping
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_plan::View;
    use strata_storage::MemoryBackend;

    fn key(s: &str) -> ViewKey {
        ViewKey::parse(s).unwrap()
    }

    fn dag() -> Dag {
        Dag::from_views(vec![
            View::query(key("raw.orders"), "raw/orders.sql", "SELECT 1"),
            View::query(key("staging.orders"), "staging/orders.sql", "SELECT * FROM raw.orders"),
            View::query(key("core.sales.eu"), "core/sales/eu.sql", "SELECT * FROM staging.orders"),
        ])
        .unwrap()
    }

    #[test]
    fn test_default_maps_every_key() {
        let dag = dag();
        let backend = MemoryBackend::new().with_scope("max");
        let selected: IndexSet<ViewKey> = [key("staging.orders")].into_iter().collect();
        let mapping = make_table_reference_mapping(&dag, &backend, &selected, false);

        assert_eq!(mapping.len(), 3);
        assert_eq!(mapping.get("raw.orders"), Some("raw_max.orders"));
        assert_eq!(mapping.get("core.sales__eu"), Some("core_max.sales__eu"));
    }

    #[test]
    fn test_freeze_maps_only_selected() {
        let dag = dag();
        let backend = MemoryBackend::new().with_scope("max");
        let selected: IndexSet<ViewKey> = [key("staging.orders")].into_iter().collect();
        let mapping = make_table_reference_mapping(&dag, &backend, &selected, true);

        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.get("staging.orders"), Some("staging_max.orders"));
        assert!(!mapping.contains("raw.orders"));

        let rendered = dag.get(&key("staging.orders")).unwrap().render(&mapping);
        assert_eq!(rendered.source(), "SELECT * FROM raw.orders");
    }

    #[test]
    fn test_freeze_without_patterns_maps_everything() {
        let dag = dag();
        let backend = MemoryBackend::new().with_scope("max");
        let selected = dag.select::<&str>(&[]).unwrap();
        let mapping = make_table_reference_mapping(&dag, &backend, &selected, true);
        assert_eq!(mapping.len(), 3);
    }

    #[test]
    fn test_unscoped_backend_maps_nothing() {
        let dag = dag();
        let backend = MemoryBackend::new();
        let selected = dag.select::<&str>(&[]).unwrap();
        assert!(make_table_reference_mapping(&dag, &backend, &selected, false).is_empty());
    }
}
