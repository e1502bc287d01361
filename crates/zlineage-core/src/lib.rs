//! Dependency and lifecycle engine of a ZFS-backed system-state manager.
//!
//! A machine on disk is a tree of datasets whose clone relationships encode
//! a branching history of bootable system states and per-user home states.
//! This crate models that graph, resolves operator-supplied identifiers to
//! states plus the transitive closure of what must go with them, and
//! destroys or untags those states in an order respecting the
//! clone/snapshot dependency DAG. The concrete ZFS surface is abstracted
//! behind [`ZfsBinding`]; `zlineage-zfs` provides the system-backed one.

pub mod binding;
pub mod config;
pub mod dataset;
mod deps;
mod discovery;
pub mod error;
pub mod logging;
mod lookup;
pub mod pool;
mod remove;
pub mod state;

#[cfg(test)]
pub(crate) mod testutil;

pub use binding::{
    CancellationToken, ZfsBinding, ZfsTransaction, BOOTFS_DATASETS_PROP, LAST_USED_PROP,
};
pub use config::LineageConfig;
pub use dataset::Dataset;
pub use error::{LineageError, LineageResult};
pub use state::{Machine, Machines, State, StateKind};
