//! Name-keyed index over every enumerated dataset, with the transitive
//! dependency traversal the resolver is built on.

use crate::dataset::Dataset;
use std::collections::BTreeMap;
use std::sync::Arc;

/// All datasets of the current pool view, keyed by name.
#[derive(Debug, Default)]
pub struct DatasetPool {
    datasets: BTreeMap<String, Arc<Dataset>>,
}

impl DatasetPool {
    pub fn new(datasets: Vec<Dataset>) -> Self {
        Self {
            datasets: datasets
                .into_iter()
                .map(|d| (d.name.clone(), Arc::new(d)))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Dataset>> {
        self.datasets.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Dataset>> {
        self.datasets.values()
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    /// Direct children of `name`: its snapshots first, then sub-filesystems
    /// one level down. Snapshots go first so the clones hanging off them
    /// surface before any descendant snapshot maps back to the same state.
    fn children_of<'a>(&'a self, name: &str) -> Vec<&'a Arc<Dataset>> {
        let fs_prefix = format!("{name}/");
        let snap_prefix = format!("{name}@");

        let mut children: Vec<&Arc<Dataset>> = self
            .datasets
            .values()
            .filter(|d| d.name.strip_prefix(&snap_prefix).is_some())
            .collect();
        children.extend(self.datasets.values().filter(|d| {
            d.name
                .strip_prefix(&fs_prefix)
                .is_some_and(|rest| !rest.contains('/') && !rest.contains('@'))
        }));
        children
    }

    /// Filesystems cloned from the snapshot `name`.
    pub fn clones_of<'a>(&'a self, name: &str) -> Vec<&'a Arc<Dataset>> {
        self.datasets
            .values()
            .filter(|d| d.origin.as_deref() == Some(name))
            .collect()
    }

    /// Transitive set of datasets depending on `name`: its descendants,
    /// its snapshots, and the clones hanging off those snapshots. Within
    /// the result every dependent comes before what it depends on, so a
    /// clone always precedes its origin snapshot.
    pub fn dependencies(&self, name: &str) -> Vec<Arc<Dataset>> {
        let mut deps = Vec::new();
        self.collect_dependencies(name, &mut deps);
        deps
    }

    fn collect_dependencies(&self, name: &str, out: &mut Vec<Arc<Dataset>>) {
        for child in self.children_of(name) {
            self.collect_dependencies(&child.name, out);
            out.push(Arc::clone(child));
        }
        if name.contains('@') {
            for clone in self.clones_of(name) {
                self.collect_dependencies(&clone.name, out);
                out.push(Arc::clone(clone));
            }
        }
    }
}
