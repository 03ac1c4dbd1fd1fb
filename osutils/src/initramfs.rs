use anyhow::{Context, Error};
use log::info;

use crate::dependencies::Dependency;

/// Regenerates the initramfs of every installed kernel so that newly created
/// arrays are assembled at early boot.
pub fn update() -> Result<(), Error> {
    info!("Updating initramfs");
    Dependency::UpdateInitramfs
        .cmd()
        .arg("-u")
        .run_and_check()
        .context("Failed to update initramfs")
}
