//! The view dependency graph.
//!
//! The DAG owns every managed view keyed by [`ViewKey`] and doubles as a
//! pull-based topological iterator: after [`Dag::prepare`], the caller
//! repeatedly takes [`Dag::get_ready`] keys and reports them with
//! [`Dag::done`], which unlocks their dependents. Nothing blocks, so a
//! controller can interleave graph progress with asynchronous jobs.

use crate::validate::find_cycle;
use crate::view::View;
use indexmap::{IndexMap, IndexSet};
use std::collections::VecDeque;
use strata_core::{CoreError, CoreResult, ViewKey};

/// A directed acyclic graph of views
#[derive(Debug, Clone)]
pub struct Dag {
    /// Views in insertion order
    views: IndexMap<ViewKey, View>,
    /// Internal dependencies: key -> keys it reads
    dependencies: IndexMap<ViewKey, IndexSet<ViewKey>>,
    /// Reverse edges: key -> keys that read it
    dependents: IndexMap<ViewKey, IndexSet<ViewKey>>,
    /// Remaining unfinished dependencies per key
    in_degree: IndexMap<ViewKey, usize>,
    /// Unlocked and not yet handed out
    ready: IndexSet<ViewKey>,
    /// Handed out by `get_ready`
    returned: IndexSet<ViewKey>,
    /// Reported done
    done: IndexSet<ViewKey>,
}

impl Dag {
    /// Build the graph from a set of views.
    ///
    /// Dependencies on keys outside the set are external leaves: they add
    /// no edge and are not validated.
    ///
    /// # Errors
    ///
    /// Returns error on a duplicate key, an unparseable view, or a cycle
    pub fn from_views(views: impl IntoIterator<Item = View>) -> CoreResult<Self> {
        let mut by_key = IndexMap::new();
        for view in views {
            let key = view.key().clone();
            if by_key.contains_key(&key) {
                return Err(CoreError::AlreadyExists {
                    kind: "View".to_string(),
                    id: key.to_string(),
                });
            }
            by_key.insert(key, view);
        }

        let mut dependencies = IndexMap::with_capacity(by_key.len());
        let mut dependents: IndexMap<ViewKey, IndexSet<ViewKey>> = by_key
            .keys()
            .map(|k| (k.clone(), IndexSet::new()))
            .collect();

        for (key, view) in &by_key {
            let internal: IndexSet<ViewKey> = view
                .dependencies()?
                .iter()
                .filter(|dep| by_key.contains_key(*dep))
                .cloned()
                .collect();
            for dep in &internal {
                if let Some(rev) = dependents.get_mut(dep) {
                    rev.insert(key.clone());
                }
            }
            dependencies.insert(key.clone(), internal);
        }

        if let Some(path) = find_cycle(&dependencies) {
            return Err(CoreError::Cycle { path });
        }

        let mut dag = Self {
            views: by_key,
            dependencies,
            dependents,
            in_degree: IndexMap::new(),
            ready: IndexSet::new(),
            returned: IndexSet::new(),
            done: IndexSet::new(),
        };
        dag.prepare();
        Ok(dag)
    }

    /// Reset the scheduling state for a new pass
    pub fn prepare(&mut self) {
        self.in_degree = self
            .dependencies
            .iter()
            .map(|(k, deps)| (k.clone(), deps.len()))
            .collect();
        self.ready = self
            .in_degree
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(k, _)| k.clone())
            .collect();
        self.returned.clear();
        self.done.clear();
    }

    /// Whether some key is not done yet
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.done.len() < self.views.len()
    }

    /// Take the keys unlocked since the last call
    pub fn get_ready(&mut self) -> Vec<ViewKey> {
        let ready: Vec<ViewKey> = self.ready.drain(..).collect();
        self.returned.extend(ready.iter().cloned());
        ready
    }

    /// Mark a key as done, unlocking dependents whose dependencies are all done
    ///
    /// # Errors
    ///
    /// Returns error if the key is not managed by this graph
    pub fn done(&mut self, key: &ViewKey) -> CoreResult<()> {
        if !self.views.contains_key(key) {
            return Err(CoreError::NotFound {
                kind: "View".to_string(),
                id: key.to_string(),
            });
        }
        if !self.done.insert(key.clone()) {
            return Ok(());
        }
        self.ready.shift_remove(key);

        if let Some(dependents) = self.dependents.get(key) {
            for dependent in dependents {
                if let Some(n) = self.in_degree.get_mut(dependent) {
                    *n = n.saturating_sub(1);
                    if *n == 0 && !self.returned.contains(dependent) && !self.done.contains(dependent) {
                        self.ready.insert(dependent.clone());
                    }
                }
            }
        }

        Ok(())
    }

    /// Whether a key is done in the current pass
    #[must_use]
    pub fn is_done(&self, key: &ViewKey) -> bool {
        self.done.contains(key)
    }

    /// Get a view by key
    #[must_use]
    pub fn get(&self, key: &ViewKey) -> Option<&View> {
        self.views.get(key)
    }

    /// Whether the key is managed
    #[must_use]
    pub fn contains(&self, key: &ViewKey) -> bool {
        self.views.contains_key(key)
    }

    /// Managed keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &ViewKey> {
        self.views.keys()
    }

    /// Managed views in insertion order
    pub fn views(&self) -> impl Iterator<Item = &View> {
        self.views.values()
    }

    /// Number of views
    #[must_use]
    pub fn len(&self) -> usize {
        self.views.len()
    }

    /// Whether the graph has no views
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Internal dependencies of a key
    #[must_use]
    pub fn dependencies_of(&self, key: &ViewKey) -> Option<&IndexSet<ViewKey>> {
        self.dependencies.get(key)
    }

    /// Keys that directly read `key`
    #[must_use]
    pub fn dependents_of(&self, key: &ViewKey) -> Option<&IndexSet<ViewKey>> {
        self.dependents.get(key)
    }

    /// Every transitive dependency of `key`
    #[must_use]
    pub fn ancestors(&self, key: &ViewKey) -> IndexSet<ViewKey> {
        closure(key, &self.dependencies)
    }

    /// Every transitive dependent of `key`
    #[must_use]
    pub fn descendants(&self, key: &ViewKey) -> IndexSet<ViewKey> {
        closure(key, &self.dependents)
    }

    /// A full topological order, ties broken by insertion order.
    ///
    /// Independent of the scheduling state.
    #[must_use]
    pub fn topological_order(&self) -> Vec<ViewKey> {
        let mut in_degree: IndexMap<&ViewKey, usize> = self
            .dependencies
            .iter()
            .map(|(k, deps)| (k, deps.len()))
            .collect();
        let mut queue: VecDeque<&ViewKey> = in_degree
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(k, _)| *k)
            .collect();
        let mut order = Vec::with_capacity(self.views.len());

        while let Some(key) = queue.pop_front() {
            order.push(key.clone());
            for dependent in self.dependents.get(key).into_iter().flatten() {
                if let Some(n) = in_degree.get_mut(dependent) {
                    *n -= 1;
                    if *n == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        order
    }
}

fn closure(start: &ViewKey, edges: &IndexMap<ViewKey, IndexSet<ViewKey>>) -> IndexSet<ViewKey> {
    let mut seen = IndexSet::new();
    let mut stack: Vec<&ViewKey> = edges.get(start).into_iter().flatten().collect();

    while let Some(current) = stack.pop() {
        if seen.insert(current.clone()) {
            stack.extend(edges.get(current).into_iter().flatten());
        }
    }

    seen
}
