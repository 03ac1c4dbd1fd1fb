use std::path::Path;

use anyhow::{Context, Error};

use crate::dependencies::{Dependency, DependencyError};

/// Reports whether something is mounted at `path`.
///
/// `mountpoint` exits non-zero both for a plain directory and for a path that
/// does not exist yet; the mount target of a fresh volume is usually the
/// latter, so both count as "not mounted".
pub fn check_is_mountpoint(path: impl AsRef<Path>) -> Result<bool, Error> {
    match Dependency::Mountpoint
        .cmd()
        .arg("--quiet")
        .arg(path.as_ref())
        .run_and_check()
    {
        Ok(()) => Ok(true),
        Err(e) if matches!(*e, DependencyError::ExecutionFailed { .. }) => Ok(false),
        Err(e) => Err(e).with_context(|| {
            format!(
                "Failed to check whether the volume target '{}' is already mounted",
                path.as_ref().display()
            )
        }),
    }
}
