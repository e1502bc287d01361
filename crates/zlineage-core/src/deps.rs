//! Transitive closure of the states and datasets tied to a given state.

use crate::binding::ZfsBinding;
use crate::dataset::Dataset;
use crate::state::{Machines, State};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

impl State {
    /// Ordered closure of everything that must be processed together with
    /// this state to keep the on-disk graph consistent.
    ///
    /// Returns the dependent states, the input state itself last, and the
    /// datasets that belong to no managed state (manually cloned ones the
    /// operator has to destroy out of band). A system state lists its
    /// associated user states, but listing a user state never pulls in the
    /// system states claiming it.
    ///
    /// Walking the sequence in order and handling each element only after
    /// everything before it guarantees clones are destroyed before their
    /// origins and user datasets are untagged before their owning system
    /// state disappears.
    pub fn dependencies<B: ZfsBinding>(
        &self,
        ms: &Machines<B>,
    ) -> (Vec<State>, Vec<Arc<Dataset>>) {
        let index = ms.dataset_to_state();
        let mut state_deps = Vec::new();
        let mut dataset_deps = Vec::new();
        self.collect_closure(ms, &index, &mut state_deps, &mut dataset_deps);

        let mut seen = HashSet::new();
        let state_deps = state_deps
            .into_iter()
            .filter(|s| seen.insert(s.id.clone()))
            .collect();

        let mut seen = HashSet::new();
        let dataset_deps = dataset_deps
            .into_iter()
            .filter(|d| seen.insert(d.name.clone()))
            .collect();

        (state_deps, dataset_deps)
    }

    fn collect_closure<B: ZfsBinding>(
        &self,
        ms: &Machines<B>,
        index: &HashMap<&str, &State>,
        state_deps: &mut Vec<State>,
        dataset_deps: &mut Vec<Arc<Dataset>>,
    ) {
        for ds in self.datasets.values() {
            // The dependency walk is transitive, so the route root covers
            // the children carried with it.
            let Some(root) = ds.first() else {
                continue;
            };

            for dep in ms.pool().dependencies(&root.name) {
                match index.get(dep.name.as_str()) {
                    // The input state is appended last; discard it when a
                    // child dataset brings it back in.
                    Some(owner) if owner.id == self.id => continue,
                    Some(owner) => {
                        for us in owner.users.values() {
                            us.collect_closure(ms, index, state_deps, dataset_deps);
                        }
                        state_deps.push((*owner).clone());
                    }
                    None => dataset_deps.push(dep),
                }
            }
        }

        for us in self.users.values() {
            us.collect_closure(ms, index, state_deps, dataset_deps);
        }

        state_deps.push(self.clone());
    }
}
