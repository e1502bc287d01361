//! Dataset records and the name/tag helpers shared by the graph and the
//! bindings.

/// A ZFS filesystem or snapshot as the engine sees it.
///
/// Shared as `Arc<Dataset>` between the states that carry it and the
/// pool-wide listings; the in-memory record is immutable, mutations go
/// through the binding followed by a refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    /// Full pool-relative name, e.g. `rpool/ROOT/ubuntu_k3x9`.
    pub name: String,

    /// Snapshot this dataset was cloned from, when any.
    pub origin: Option<String>,

    /// Delimited list of system-state ids claiming this dataset. Empty for
    /// datasets that no system state claims (snapshots in particular).
    pub bootfs_datasets: String,

    /// Last-used marker, seconds since the Unix epoch.
    pub last_used: Option<i64>,
}

impl Dataset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            origin: None,
            bootfs_datasets: String::new(),
            last_used: None,
        }
    }

    pub fn is_snapshot(&self) -> bool {
        self.name.contains('@')
    }

    /// Ordered tag entries of the bootfs-datasets property.
    pub fn tags<'a>(&'a self, separator: &str) -> Vec<&'a str> {
        split_tags(&self.bootfs_datasets, separator)
    }
}

/// Split `name` into its filesystem part and, for snapshots, the tag after
/// the `@`.
pub fn split_snapshot_name(name: &str) -> (&str, Option<&str>) {
    match name.split_once('@') {
        Some((base, tag)) => (base, Some(tag)),
        None => (name, None),
    }
}

/// Final path component of a dataset id (keeps any snapshot suffix).
pub fn basename(id: &str) -> &str {
    id.rsplit('/').next().unwrap_or(id)
}

/// Parse a delimited tag value into its ordered entries, dropping empties.
pub fn split_tags<'a>(value: &'a str, separator: &str) -> Vec<&'a str> {
    value
        .split(separator)
        .filter(|entry| !entry.is_empty())
        .collect()
}

/// Rejoin tag entries, preserving their relative order.
pub fn join_tags(tags: &[&str], separator: &str) -> String {
    tags.join(separator)
}
