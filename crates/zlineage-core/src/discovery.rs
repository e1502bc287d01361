//! Rebuilds the machine graph from an enumerated dataset list.
//!
//! The pool layout is conventional: bootable system datasets live directly
//! under `<pool>/<system_container>`, per-user home datasets directly under
//! `<pool>/<user_container>` with a `<user><sep><suffix>` basename, and the
//! bootfs-datasets tag ties user datasets to the system states claiming
//! them. Everything else is persistent, or unmanaged when it sits inside a
//! managed container without resolving to a machine.

use crate::config::LineageConfig;
use crate::dataset::{basename, split_snapshot_name, Dataset};
use crate::pool::DatasetPool;
use crate::state::{Machine, State, StateKind};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

pub(crate) struct PoolLayout {
    pub machines: BTreeMap<String, Machine>,
    pub pool: DatasetPool,
    pub persistent: Vec<Arc<Dataset>>,
    pub unmanaged: Vec<Arc<Dataset>>,
    pub current: Option<String>,
}

pub(crate) fn scan(
    datasets: Vec<Dataset>,
    config: &LineageConfig,
    current_id: Option<&str>,
) -> PoolLayout {
    let pool = DatasetPool::new(datasets);
    let layout = &config.layout;

    let mut primaries = Vec::new();
    let mut clones = Vec::new();
    for d in pool.iter() {
        if d.is_snapshot() || !is_directly_under(&d.name, &layout.system_container) {
            continue;
        }
        if d.origin.is_none() {
            primaries.push(Arc::clone(d));
        } else {
            clones.push(Arc::clone(d));
        }
    }

    // Membership: system filesystem name to the machine owning it, clones
    // resolved by walking their origin chain back to a primary.
    let mut membership: HashMap<String, String> = primaries
        .iter()
        .map(|p| (p.name.clone(), p.name.clone()))
        .collect();
    for c in &clones {
        let root = origin_root(&pool, &c.name);
        if primaries.iter().any(|p| p.name == root) {
            membership.insert(c.name.clone(), root);
        }
    }

    let mut machines: BTreeMap<String, Machine> = BTreeMap::new();
    for p in &primaries {
        machines.insert(
            p.name.clone(),
            Machine {
                state: filesystem_state(&pool, p),
                history: BTreeMap::new(),
                all_users_states: BTreeMap::new(),
            },
        );
    }
    for c in &clones {
        let Some(machine) = membership.get(&c.name).and_then(|id| machines.get_mut(id)) else {
            continue;
        };
        machine
            .history
            .insert(c.name.clone(), filesystem_state(&pool, c));
    }
    for (fs, machine_id) in &membership {
        let Some(machine) = machines.get_mut(machine_id) else {
            continue;
        };
        for snap in snapshots_of(&pool, fs) {
            let state = snapshot_state(&pool, fs, &snap);
            machine.history.insert(state.id.clone(), state);
        }
    }

    // User states, attached to every machine one of their tags resolves to.
    for d in pool.iter() {
        if d.is_snapshot() || !is_directly_under(&d.name, &layout.user_container) {
            continue;
        }
        let leaf = basename(&d.name);
        let user = leaf
            .rsplit_once(&layout.user_separator)
            .map_or(leaf, |(user, _)| user)
            .to_string();

        let fs_state = filesystem_state(&pool, d);
        let snap_states: Vec<State> = snapshots_of(&pool, &d.name)
            .iter()
            .map(|snap| snapshot_state(&pool, &d.name, snap))
            .collect();

        let owners: BTreeSet<&String> = d
            .tags(&layout.tag_separator)
            .iter()
            .filter_map(|tag| membership.get(*tag))
            .collect();

        for owner in owners {
            let Some(machine) = machines.get_mut(owner) else {
                continue;
            };
            let per_user = machine.all_users_states.entry(user.clone()).or_default();
            per_user.insert(fs_state.id.clone(), fs_state.clone());
            for s in &snap_states {
                per_user.insert(s.id.clone(), s.clone());
            }
        }
    }

    // Current association per system state.
    for machine in machines.values_mut() {
        let users_states = machine.all_users_states.clone();
        associate_users(&mut machine.state, &users_states, &layout.tag_separator);
        for state in machine.history.values_mut() {
            associate_users(state, &users_states, &layout.tag_separator);
        }
    }

    // Whatever no state claims is persistent, or unmanaged when it sits
    // inside a managed container.
    let mut claimed: BTreeSet<String> = BTreeSet::new();
    for machine in machines.values() {
        for state in std::iter::once(&machine.state).chain(machine.history.values()) {
            claimed.extend(state.all_datasets().iter().map(|d| d.name.clone()));
        }
        for user_states in machine.all_users_states.values() {
            for state in user_states.values() {
                claimed.extend(state.all_datasets().iter().map(|d| d.name.clone()));
            }
        }
    }

    let mut persistent = Vec::new();
    let mut unmanaged = Vec::new();
    for d in pool.iter() {
        if claimed.contains(&d.name) {
            continue;
        }
        if is_under(&d.name, &layout.system_container) || is_under(&d.name, &layout.user_container)
        {
            unmanaged.push(Arc::clone(d));
        } else {
            persistent.push(Arc::clone(d));
        }
    }

    let current = current_id
        .filter(|id| machines.contains_key(*id))
        .map(str::to_string);

    PoolLayout {
        machines,
        pool,
        persistent,
        unmanaged,
        current,
    }
}

/// A filesystem-backed state: the root dataset plus its descendants on a
/// single route keyed by the state id.
fn filesystem_state(pool: &DatasetPool, root: &Arc<Dataset>) -> State {
    let mut state = State::new(root.name.clone(), timestamp(root.last_used));
    let mut members = vec![Arc::clone(root)];
    let prefix = format!("{}/", root.name);
    members.extend(
        pool.iter()
            .filter(|d| !d.is_snapshot() && d.name.starts_with(&prefix))
            .cloned(),
    );
    state.datasets.insert(root.name.clone(), members);
    state
}

/// A snapshot-backed state: the snapshot plus the descendant snapshots
/// carrying the same tag.
fn snapshot_state(pool: &DatasetPool, fs: &str, snap: &Arc<Dataset>) -> State {
    let mut state = State::new(snap.name.clone(), timestamp(snap.last_used));
    let mut members = vec![Arc::clone(snap)];
    if let (_, Some(tag)) = split_snapshot_name(&snap.name) {
        let prefix = format!("{fs}/");
        let suffix = format!("@{tag}");
        members.extend(
            pool.iter()
                .filter(|d| d.name.starts_with(&prefix) && d.name.ends_with(&suffix))
                .cloned(),
        );
    }
    state.datasets.insert(snap.name.clone(), members);
    state
}

/// Fill the `users` map of a system state with the currently associated
/// user state per user.
fn associate_users(
    state: &mut State,
    users_states: &BTreeMap<String, BTreeMap<String, State>>,
    separator: &str,
) {
    for (user, states) in users_states {
        let associated = match &state.kind {
            StateKind::Filesystem => states.values().find(|us| {
                !us.is_snapshot()
                    && us
                        .route_root(&us.id)
                        .is_some_and(|d| d.tags(separator).iter().any(|t| *t == state.id))
            }),
            StateKind::Snapshot { parent, tag } => states.values().find(|us| {
                let StateKind::Snapshot {
                    parent: user_parent,
                    tag: user_tag,
                } = &us.kind
                else {
                    return false;
                };
                user_tag == tag
                    && states
                        .get(user_parent)
                        .and_then(|ufs| ufs.route_root(user_parent))
                        .is_some_and(|d| d.tags(separator).iter().any(|t| t == parent))
            }),
        };
        if let Some(us) = associated {
            state.users.insert(user.clone(), us.clone());
        }
    }
}

/// Walk the origin chain of `name` back to the filesystem it ultimately
/// descends from. Bounded by the pool size; the clone relation is a DAG.
fn origin_root(pool: &DatasetPool, name: &str) -> String {
    let mut current = name.to_string();
    for _ in 0..pool.len() {
        match pool.get(&current).and_then(|d| d.origin.clone()) {
            Some(origin) => current = split_snapshot_name(&origin).0.to_string(),
            None => break,
        }
    }
    current
}

fn snapshots_of(pool: &DatasetPool, fs: &str) -> Vec<Arc<Dataset>> {
    let prefix = format!("{fs}@");
    pool.iter()
        .filter(|d| d.name.starts_with(&prefix))
        .cloned()
        .collect()
}

/// `<pool>/<container>/<leaf>` exactly, no snapshot suffix.
fn is_directly_under(name: &str, container: &str) -> bool {
    let parts: Vec<&str> = name.split('/').collect();
    parts.len() == 3 && parts[1] == container && !name.contains('@')
}

/// Anywhere inside `<pool>/<container>`, the container dataset included.
fn is_under(name: &str, container: &str) -> bool {
    let parts: Vec<&str> = name.split('/').collect();
    parts.len() >= 2 && parts[1] == container
}

fn timestamp(epoch: Option<i64>) -> DateTime<Utc> {
    epoch
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or(DateTime::UNIX_EPOCH)
}
