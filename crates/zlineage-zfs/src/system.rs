//! System-backed `ZfsBinding` implementation. It shells out to the platform
//! `zfs` binary for enumeration, recursive destroys, and property updates,
//! and keeps property transactions revertible until committed.

use crate::command::{CommandRunner, Output};
use crate::parse::{column_value, parse_dataset_list};
use log::warn;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zlineage_core::{
    Dataset, LineageConfig, LineageError, LineageResult, ZfsBinding, ZfsTransaction,
    BOOTFS_DATASETS_PROP, LAST_USED_PROP,
};

/// Default locations we probe when looking for a `zfs` binary on the host.
pub const DEFAULT_ZFS_PATHS: &[&str] = &[
    "/sbin/zfs",
    "/usr/sbin/zfs",
    "/usr/local/sbin/zfs",
    "/bin/zfs",
];

/// `ZfsBinding` talking to the native `zfs` CLI.
#[derive(Clone, Debug)]
pub struct SystemZfsBinding {
    runner: CommandRunner,
}

impl SystemZfsBinding {
    /// Build a binding from the engine configuration, falling back to
    /// path discovery when no binary is pinned.
    pub fn from_config(config: &LineageConfig) -> LineageResult<Self> {
        let timeout = config.zfs_timeout();
        match config.zfs_binary_path() {
            Some(path) => Self::with_path(path, timeout),
            None => Self::discover(timeout),
        }
    }

    /// Construct a binding with an explicit `zfs` path.
    pub fn with_path(path: PathBuf, timeout: Duration) -> LineageResult<Self> {
        if !path.exists() {
            return Err(LineageError::InvalidConfig(format!(
                "zfs binary not found at {}",
                path.display()
            )));
        }
        Ok(Self {
            runner: CommandRunner::new(path, timeout),
        })
    }

    /// Walk through `DEFAULT_ZFS_PATHS` until a workable binary is found.
    pub fn discover(timeout: Duration) -> LineageResult<Self> {
        for candidate in DEFAULT_ZFS_PATHS {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::with_path(path.to_path_buf(), timeout);
            }
        }
        Err(LineageError::InvalidConfig(format!(
            "unable to locate zfs binary; tried {:?}",
            DEFAULT_ZFS_PATHS
        )))
    }

    /// Run `zfs` and turn non-zero exits into binding errors that keep
    /// the part of the diagnostic an operator can act on.
    fn run_checked(&self, args: &[&str]) -> LineageResult<Output> {
        let out = self.runner.run(args)?;
        if out.status != 0 {
            return Err(Self::describe_failure(args, &out));
        }
        Ok(out)
    }

    /// Build a `Binding` error for a failed CLI run.
    ///
    /// The hint covers the failure modes this binding actually produces:
    /// destroys racing a stale pool view, destroys blocked by a live clone
    /// or mount, and property writes without zfs delegation.
    fn describe_failure(args: &[&str], output: &Output) -> LineageError {
        let stderr = output.stderr.trim();
        let diagnostic = if stderr.is_empty() {
            output.stdout.trim()
        } else {
            stderr
        };

        let mut message = format!(
            "zfs {} failed with status {}",
            args.first().copied().unwrap_or("command"),
            output.status
        );
        if !diagnostic.is_empty() {
            message.push_str(": ");
            message.push_str(diagnostic);
        }

        let lower = diagnostic.to_ascii_lowercase();
        let hint = if lower.contains("does not exist") || lower.contains("cannot open") {
            Some("the pool view may be stale; refresh and retry")
        } else if lower.contains("dependent clones") || lower.contains("busy") {
            Some("a clone or mount still depends on this dataset")
        } else if lower.contains("permission denied") {
            Some("zfs allow delegation or root privileges are required")
        } else {
            None
        };
        if let Some(hint) = hint {
            message.push_str(" (");
            message.push_str(hint);
            message.push(')');
        }

        LineageError::Binding(message)
    }

    /// Fetch a single property value; `None` when unset.
    fn get_property(&self, dataset: &str, property: &str) -> LineageResult<Option<String>> {
        let out = self.run_checked(&["get", "-H", "-o", "value", property, dataset])?;
        Ok(column_value(&out.stdout).map(str::to_string))
    }

    fn set_property(&self, property: &str, value: &str, dataset: &str) -> LineageResult<()> {
        let assignment = format!("{property}={value}");
        self.run_checked(&["set", assignment.as_str(), dataset])?;
        Ok(())
    }

    fn clear_property(&self, property: &str, dataset: &str, recursive: bool) -> LineageResult<()> {
        if recursive {
            self.run_checked(&["inherit", "-r", property, dataset])?;
        } else {
            self.run_checked(&["inherit", property, dataset])?;
        }
        Ok(())
    }
}

impl ZfsBinding for SystemZfsBinding {
    fn enumerate(&self) -> LineageResult<Vec<Dataset>> {
        let columns = format!("name,origin,{BOOTFS_DATASETS_PROP},{LAST_USED_PROP}");
        let out = self.run_checked(&[
            "list",
            "-Hp",
            "-t",
            "filesystem,snapshot",
            "-o",
            columns.as_str(),
        ])?;
        Ok(parse_dataset_list(&out.stdout))
    }

    fn destroy(&self, name: &str) -> LineageResult<()> {
        self.run_checked(&["destroy", "-r", name])?;
        Ok(())
    }

    fn transaction(&self) -> LineageResult<Box<dyn ZfsTransaction + '_>> {
        Ok(Box::new(SystemTransaction {
            binding: self,
            reverts: Vec::new(),
            committed: false,
        }))
    }
}

/// Recorded previous value of one property write, for revert on drop.
struct Revert {
    dataset: String,
    property: String,
    previous: Option<String>,
}

/// Property transaction over the CLI: each write snapshots the previous
/// value first, and dropping the transaction uncommitted restores them in
/// reverse order, best effort.
struct SystemTransaction<'a> {
    binding: &'a SystemZfsBinding,
    reverts: Vec<Revert>,
    committed: bool,
}

impl ZfsTransaction for SystemTransaction<'_> {
    fn set_property(
        &mut self,
        property: &str,
        value: &str,
        dataset: &str,
        recursive: bool,
    ) -> LineageResult<()> {
        if recursive && !value.is_empty() {
            return Err(LineageError::Binding(
                "recursive property writes are only supported when clearing".into(),
            ));
        }

        let previous = self.binding.get_property(dataset, property)?;

        if value.is_empty() {
            self.binding.clear_property(property, dataset, recursive)?;
        } else {
            self.binding.set_property(property, value, dataset)?;
        }

        self.reverts.push(Revert {
            dataset: dataset.to_string(),
            property: property.to_string(),
            previous,
        });
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> LineageResult<()> {
        self.committed = true;
        Ok(())
    }
}

impl Drop for SystemTransaction<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for revert in self.reverts.drain(..).rev() {
            let result = match revert.previous.as_deref() {
                Some(value) => self
                    .binding
                    .set_property(&revert.property, value, &revert.dataset),
                None => self
                    .binding
                    .clear_property(&revert.property, &revert.dataset, false),
            };
            if let Err(err) = result {
                warn!(
                    "couldn't restore the {} property of {}: {err}",
                    revert.property, revert.dataset
                );
            }
        }
    }
}
