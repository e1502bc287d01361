use crate::dataset::Dataset;
use crate::error::{LineageError, LineageResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// User property tagging a user dataset with the system-state ids that
/// claim it, delimited by the configured separator.
pub const BOOTFS_DATASETS_PROP: &str = "org.zlineage:bootfs-datasets";

/// User property carrying the last-used marker, seconds since the epoch.
pub const LAST_USED_PROP: &str = "org.zlineage:last-used";

/// Abstraction over the ZFS operations the engine consumes.
///
/// Implementations provide a thin, testable surface over the underlying
/// system interface, so the graph and the removers can be exercised without
/// a real pool.
pub trait ZfsBinding {
    /// Every filesystem and snapshot in scope, with its origin and the
    /// engine's user properties.
    fn enumerate(&self) -> LineageResult<Vec<Dataset>>;

    /// Recursively destroy `name` and everything under it. This is the
    /// best-effort, no-transaction path.
    fn destroy(&self, name: &str) -> LineageResult<()>;

    /// Open a scoped property-update transaction. Dropping the returned
    /// handle without calling [`ZfsTransaction::commit`] reverts every
    /// property it wrote.
    fn transaction(&self) -> LineageResult<Box<dyn ZfsTransaction + '_>>;
}

/// Scoped handle for property updates that must not be left half-applied.
pub trait ZfsTransaction {
    /// Set `property` to `value` on `dataset`; an empty value clears the
    /// property back to inherited.
    fn set_property(
        &mut self,
        property: &str,
        value: &str,
        dataset: &str,
        recursive: bool,
    ) -> LineageResult<()>;

    /// Finalize the transaction, keeping all writes.
    fn commit(self: Box<Self>) -> LineageResult<()>;
}

/// Cooperative cancellation flag checked at every binding-call boundary.
///
/// Clones share the flag; cancelling any clone makes the next boundary in
/// the removers return [`LineageError::Cancelled`] before further mutation.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Error out when the token has been cancelled.
    pub fn checkpoint(&self) -> LineageResult<()> {
        if self.is_cancelled() {
            return Err(LineageError::Cancelled);
        }
        Ok(())
    }
}
