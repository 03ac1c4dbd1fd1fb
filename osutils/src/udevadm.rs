use anyhow::{Context, Error};

use crate::dependencies::Dependency;

/// Blocks until udev has processed every queued event, so device nodes for
/// freshly wiped disks or a new array exist before they are used.
pub fn settle() -> Result<(), Error> {
    Dependency::Udevadm
        .cmd()
        .arg("settle")
        .run_and_check()
        .context("Failed to wait for udev to create the device nodes")
}
