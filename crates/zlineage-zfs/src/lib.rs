//! Glue layer that exposes the system-backed ZFS binding to the rest of the
//! zlineage stack. The heavy lifting lives in `system`, while `command` and
//! `parse` cover shell integration details.

mod command;
mod parse;
mod system;

pub use system::{SystemZfsBinding, DEFAULT_ZFS_PATHS};
