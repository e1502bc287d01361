//! Turns `zfs list`/`zfs get` tabular output into the engine's records.

use zlineage_core::Dataset;

/// Parse `zfs list -Hp -o name,origin,<bootfs>,<last-used>` output.
///
/// The CLI prints one tab-separated line per dataset and `-` for unset
/// values. Lines that don't carry at least the four columns are dropped.
pub(crate) fn parse_dataset_list(output: &str) -> Vec<Dataset> {
    output.lines().filter_map(parse_dataset_line).collect()
}

fn parse_dataset_line(line: &str) -> Option<Dataset> {
    let mut columns = line.trim_end().split('\t');
    let name = columns.next().filter(|n| !n.is_empty())?;
    let origin = columns.next()?;
    let bootfs_datasets = columns.next()?;
    let last_used = columns.next()?;

    Some(Dataset {
        name: name.to_string(),
        origin: column_value(origin).map(str::to_string),
        bootfs_datasets: column_value(bootfs_datasets).unwrap_or_default().to_string(),
        last_used: column_value(last_used).and_then(|v| v.parse().ok()),
    })
}

/// `-` means unset in `-H` output.
pub(crate) fn column_value(column: &str) -> Option<&str> {
    let trimmed = column.trim();
    if trimmed.is_empty() || trimmed == "-" {
        None
    } else {
        Some(trimmed)
    }
}
