//! Structural checks on the view graph.

use indexmap::{IndexMap, IndexSet};
use strata_core::ViewKey;

/// Find a dependency cycle, if any.
///
/// Depth-first search with a recursion stack, visiting keys in insertion
/// order so the reported cycle is deterministic. The returned path starts
/// and ends with the same key.
#[must_use]
pub fn find_cycle(dependencies: &IndexMap<ViewKey, IndexSet<ViewKey>>) -> Option<Vec<ViewKey>> {
    let mut visited = IndexSet::new();
    let mut rec_stack = IndexSet::new();

    for key in dependencies.keys() {
        if let Some(cycle) = dfs_cycle(key, dependencies, &mut visited, &mut rec_stack) {
            return Some(cycle);
        }
    }

    None
}

fn dfs_cycle<'a>(
    key: &'a ViewKey,
    dependencies: &'a IndexMap<ViewKey, IndexSet<ViewKey>>,
    visited: &mut IndexSet<&'a ViewKey>,
    rec_stack: &mut IndexSet<&'a ViewKey>,
) -> Option<Vec<ViewKey>> {
    if let Some(start) = rec_stack.get_index_of(key) {
        let mut cycle: Vec<ViewKey> = rec_stack
            .iter()
            .skip(start)
            .map(|k| (*k).clone())
            .collect();
        cycle.push(key.clone());
        return Some(cycle);
    }
    if !visited.insert(key) {
        return None;
    }

    rec_stack.insert(key);
    if let Some(deps) = dependencies.get(key) {
        for dep in deps {
            if let Some(cycle) = dfs_cycle(dep, dependencies, visited, rec_stack) {
                return Some(cycle);
            }
        }
    }
    rec_stack.pop();

    None
}
