use std::path::Path;

use anyhow::{Context, Error};
use log::info;

use crate::dependencies::Dependency;

/// Discards every block of `device_path`.
pub fn discard(device_path: impl AsRef<Path>) -> Result<(), Error> {
    info!("Discarding blocks on '{}'", device_path.as_ref().display());

    Dependency::Blkdiscard
        .cmd()
        .arg(device_path.as_ref())
        .run_and_check()
        .with_context(|| {
            format!(
                "Failed to discard blocks on '{}'",
                device_path.as_ref().display()
            )
        })
}
