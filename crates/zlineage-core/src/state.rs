//! In-memory graph of machines, states, and the datasets they carry.

use crate::binding::{CancellationToken, ZfsBinding};
use crate::config::LineageConfig;
use crate::dataset::{split_snapshot_name, Dataset};
use crate::discovery;
use crate::error::LineageResult;
use crate::pool::DatasetPool;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Whether a state is backed by a filesystem or by a snapshot of one.
///
/// Computed once at construction from the id: a snapshot id always contains
/// `@`, a filesystem id never does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateKind {
    Filesystem,
    Snapshot { parent: String, tag: String },
}

/// One bootable system state, or one per-user home state.
#[derive(Debug, Clone)]
pub struct State {
    /// Canonical identifier; the route-root dataset name.
    pub id: String,

    pub kind: StateKind,

    /// Used only for disambiguation messages.
    pub last_used: DateTime<Utc>,

    /// Datasets grouped by route; the first element of each route is the
    /// route root, the rest are children carried with it.
    pub datasets: BTreeMap<String, Vec<Arc<Dataset>>>,

    /// For system states, the currently associated user state per user
    /// name. Empty on user states.
    pub users: BTreeMap<String, State>,
}

impl State {
    pub fn new(id: impl Into<String>, last_used: DateTime<Utc>) -> Self {
        let id = id.into();
        let kind = match split_snapshot_name(&id) {
            (parent, Some(tag)) => StateKind::Snapshot {
                parent: parent.to_string(),
                tag: tag.to_string(),
            },
            (_, None) => StateKind::Filesystem,
        };
        Self {
            id,
            kind,
            last_used,
            datasets: BTreeMap::new(),
            users: BTreeMap::new(),
        }
    }

    pub fn is_snapshot(&self) -> bool {
        matches!(self.kind, StateKind::Snapshot { .. })
    }

    /// All datasets of this state, every route flattened.
    pub fn all_datasets(&self) -> Vec<Arc<Dataset>> {
        self.datasets.values().flatten().cloned().collect()
    }

    /// All user datasets attached to this particular state.
    pub fn users_datasets(&self) -> Vec<Arc<Dataset>> {
        self.users
            .values()
            .flat_map(|us| us.all_datasets())
            .collect()
    }

    /// Root dataset of the given route, when the route exists.
    pub fn route_root(&self, route: &str) -> Option<&Arc<Dataset>> {
        self.datasets.get(route).and_then(|ds| ds.first())
    }
}

/// A family of related states: the primary, its history, and the full
/// per-user state history.
#[derive(Debug, Clone)]
pub struct Machine {
    /// The machine's primary state; its id is the machine id.
    pub state: State,

    /// Past states by id: system history snapshots and past clones.
    pub history: BTreeMap<String, State>,

    /// Full per-user history: user name to id to state.
    pub all_users_states: BTreeMap<String, BTreeMap<String, State>>,
}

impl Machine {
    pub fn id(&self) -> &str {
        &self.state.id
    }
}

/// The process-wide collection of machines plus the pool-wide dataset view.
///
/// One logical request at a time: callers serialize mutating operations
/// externally. Reads are pure computation over this snapshot; the snapshot
/// goes stale as soon as a destroy or property write succeeds, at which
/// point the removers refresh it through the binding.
pub struct Machines<B: ZfsBinding> {
    pub(crate) all: BTreeMap<String, Machine>,
    pub(crate) current: Option<String>,
    pub(crate) pool: DatasetPool,
    pub(crate) all_persistent_datasets: Vec<Arc<Dataset>>,
    pub(crate) unmanaged_datasets: Vec<Arc<Dataset>>,
    pub(crate) binding: B,
    pub(crate) config: LineageConfig,
}

impl<B: ZfsBinding> Machines<B> {
    /// Enumerate the pool through `binding` and build the machine graph.
    ///
    /// `current_id` names the running system state when known; it is kept
    /// only if it resolves to a machine primary.
    pub fn new(
        binding: B,
        config: LineageConfig,
        current_id: Option<&str>,
    ) -> LineageResult<Self> {
        let datasets = binding.enumerate()?;
        let layout = discovery::scan(datasets, &config, current_id);
        Ok(Self {
            all: layout.machines,
            current: layout.current,
            pool: layout.pool,
            all_persistent_datasets: layout.persistent,
            unmanaged_datasets: layout.unmanaged,
            binding,
            config,
        })
    }

    /// Re-enumerate the pool and rebuild the graph in place, preserving the
    /// current pointer when its machine still exists.
    pub fn refresh(&mut self, cancel: &CancellationToken) -> LineageResult<()> {
        cancel.checkpoint()?;
        let datasets = self.binding.enumerate()?;
        let layout = discovery::scan(datasets, &self.config, self.current.as_deref());
        self.all = layout.machines;
        self.current = layout.current;
        self.pool = layout.pool;
        self.all_persistent_datasets = layout.persistent;
        self.unmanaged_datasets = layout.unmanaged;
        Ok(())
    }

    pub fn machines(&self) -> impl Iterator<Item = &Machine> {
        self.all.values()
    }

    pub fn machine(&self, id: &str) -> Option<&Machine> {
        self.all.get(id)
    }

    /// The running system state, when known.
    pub fn current_state(&self) -> Option<&State> {
        self.current
            .as_deref()
            .and_then(|id| self.all.get(id))
            .map(|m| &m.state)
    }

    pub fn pool(&self) -> &DatasetPool {
        &self.pool
    }

    pub fn config(&self) -> &LineageConfig {
        &self.config
    }

    pub fn binding(&self) -> &B {
        &self.binding
    }

    /// Datasets outside any managed machine: the persistent area plus
    /// whatever could not be attached during discovery.
    pub(crate) fn external_datasets(&self) -> impl Iterator<Item = &Arc<Dataset>> {
        self.all_persistent_datasets
            .iter()
            .chain(self.unmanaged_datasets.iter())
    }

    /// Origin-to-clones index over the external datasets, used to detect
    /// manually cloned blockers.
    pub(crate) fn external_origins_index(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut index: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for d in self.external_datasets() {
            if let Some(origin) = d.origin.as_deref() {
                index.entry(origin).or_default().push(d.name.as_str());
            }
        }
        index
    }

    /// Flat enumeration of every state: each machine's primary, every
    /// history entry, and every per-user state.
    pub(crate) fn all_states(&self) -> Vec<&State> {
        let mut states = Vec::new();
        for m in self.all.values() {
            states.push(&m.state);
            states.extend(m.history.values());
            for user_states in m.all_users_states.values() {
                states.extend(user_states.values());
            }
        }
        states
    }

    /// Reverse index from dataset name to the state that carries it.
    pub(crate) fn dataset_to_state<'a>(&'a self) -> HashMap<&'a str, &'a State> {
        let mut index = HashMap::new();
        for state in self.all_states() {
            for ds in state.datasets.values() {
                for d in ds {
                    index.insert(d.name.as_str(), state);
                }
            }
        }
        index
    }
}
