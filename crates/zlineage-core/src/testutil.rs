//! In-memory binding and pool fixtures shared by the engine tests.

use crate::binding::{ZfsBinding, ZfsTransaction, BOOTFS_DATASETS_PROP};
use crate::config::LineageConfig;
use crate::dataset::Dataset;
use crate::error::{LineageError, LineageResult};
use crate::state::Machines;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Well-known names of the canonical fixture pool.
pub(crate) struct Fixture;

impl Fixture {
    pub const MACHINE_A: &'static str = "rpool/ROOT/ubuntu_a";
    pub const SNAP_A: &'static str = "rpool/ROOT/ubuntu_a@snap1";
    pub const CLONE_B: &'static str = "rpool/ROOT/ubuntu_b";
    pub const USER_ALICE: &'static str = "rpool/USERDATA/alice_x1";
    pub const USER_ALICE_SNAP: &'static str = "rpool/USERDATA/alice_x1@snap1";
}

pub(crate) fn fs(name: &str) -> Dataset {
    Dataset::new(name)
}

pub(crate) fn clone_of(name: &str, origin: &str) -> Dataset {
    Dataset {
        origin: Some(origin.to_string()),
        ..Dataset::new(name)
    }
}

pub(crate) fn user_fs(name: &str, tags: &str) -> Dataset {
    Dataset {
        bootfs_datasets: tags.to_string(),
        ..Dataset::new(name)
    }
}

pub(crate) fn set_tags(datasets: &mut [Dataset], name: &str, tags: &str) {
    for d in datasets.iter_mut() {
        if d.name == name {
            d.bootfs_datasets = tags.to_string();
        }
    }
}

/// One machine with a snapshot, a clone of that snapshot, and one attached
/// user with a matching user snapshot.
pub(crate) fn sample_pool() -> Vec<Dataset> {
    vec![
        fs("rpool"),
        fs("rpool/ROOT"),
        fs(Fixture::MACHINE_A),
        fs("rpool/ROOT/ubuntu_a/var"),
        fs(Fixture::SNAP_A),
        fs("rpool/ROOT/ubuntu_a/var@snap1"),
        clone_of(Fixture::CLONE_B, Fixture::SNAP_A),
        fs("rpool/USERDATA"),
        user_fs(Fixture::USER_ALICE, Fixture::MACHINE_A),
        fs(Fixture::USER_ALICE_SNAP),
    ]
}

pub(crate) fn machines_with(
    datasets: Vec<Dataset>,
    current: Option<&str>,
) -> Machines<MockBinding> {
    machines_with_config(datasets, LineageConfig::default(), current)
}

pub(crate) fn machines_with_config(
    datasets: Vec<Dataset>,
    config: LineageConfig,
    current: Option<&str>,
) -> Machines<MockBinding> {
    Machines::new(MockBinding::new(datasets), config, current).expect("mock enumerate never fails")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PropertyWrite {
    pub dataset: String,
    pub property: String,
    pub value: String,
}

/// Binding over an in-memory dataset map, recording destroys and committed
/// property writes in call order.
pub(crate) struct MockBinding {
    datasets: Mutex<BTreeMap<String, Dataset>>,
    destroy_log: Mutex<Vec<String>>,
    write_log: Mutex<Vec<PropertyWrite>>,
    fail_destroy: Mutex<Vec<String>>,
}

impl MockBinding {
    pub fn new(datasets: Vec<Dataset>) -> Self {
        Self {
            datasets: Mutex::new(datasets.into_iter().map(|d| (d.name.clone(), d)).collect()),
            destroy_log: Mutex::new(Vec::new()),
            write_log: Mutex::new(Vec::new()),
            fail_destroy: Mutex::new(Vec::new()),
        }
    }

    /// Make subsequent destroys of `name` fail, as a busy dataset would.
    pub fn fail_destroy_of(&self, name: &str) {
        self.fail_destroy.lock().unwrap().push(name.to_string());
    }

    pub fn dataset(&self, name: &str) -> Option<Dataset> {
        self.datasets.lock().unwrap().get(name).cloned()
    }

    pub fn destroy_log(&self) -> Vec<String> {
        self.destroy_log.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<PropertyWrite> {
        self.write_log.lock().unwrap().clone()
    }
}

impl ZfsBinding for MockBinding {
    fn enumerate(&self) -> LineageResult<Vec<Dataset>> {
        Ok(self.datasets.lock().unwrap().values().cloned().collect())
    }

    fn destroy(&self, name: &str) -> LineageResult<()> {
        if self.fail_destroy.lock().unwrap().iter().any(|n| n == name) {
            return Err(LineageError::Binding(format!(
                "cannot destroy '{name}': dataset is busy"
            )));
        }

        let mut datasets = self.datasets.lock().unwrap();
        if !datasets.contains_key(name) {
            return Err(LineageError::Binding(format!(
                "cannot open '{name}': dataset does not exist"
            )));
        }

        let child_prefix = format!("{name}/");
        let snap_prefix = format!("{name}@");
        datasets.retain(|n, _| {
            n != name && !n.starts_with(&child_prefix) && !n.starts_with(&snap_prefix)
        });

        self.destroy_log.lock().unwrap().push(name.to_string());
        Ok(())
    }

    fn transaction(&self) -> LineageResult<Box<dyn ZfsTransaction + '_>> {
        Ok(Box::new(MockTransaction {
            binding: self,
            reverts: Vec::new(),
            pending: Vec::new(),
            committed: false,
        }))
    }
}

struct MockTransaction<'a> {
    binding: &'a MockBinding,
    reverts: Vec<(String, String)>,
    pending: Vec<PropertyWrite>,
    committed: bool,
}

impl ZfsTransaction for MockTransaction<'_> {
    fn set_property(
        &mut self,
        property: &str,
        value: &str,
        dataset: &str,
        _recursive: bool,
    ) -> LineageResult<()> {
        if property != BOOTFS_DATASETS_PROP {
            return Err(LineageError::Binding(format!(
                "unsupported property {property}"
            )));
        }

        let mut datasets = self.binding.datasets.lock().unwrap();
        let Some(d) = datasets.get_mut(dataset) else {
            return Err(LineageError::Binding(format!(
                "cannot open '{dataset}': dataset does not exist"
            )));
        };

        self.reverts
            .push((dataset.to_string(), d.bootfs_datasets.clone()));
        d.bootfs_datasets = value.to_string();
        self.pending.push(PropertyWrite {
            dataset: dataset.to_string(),
            property: property.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> LineageResult<()> {
        self.committed = true;
        self.binding
            .write_log
            .lock()
            .unwrap()
            .extend(self.pending.drain(..));
        Ok(())
    }
}

impl Drop for MockTransaction<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut datasets = self.binding.datasets.lock().unwrap();
        for (name, previous) in self.reverts.drain(..).rev() {
            if let Some(d) = datasets.get_mut(&name) {
                d.bootfs_datasets = previous;
            }
        }
    }
}
