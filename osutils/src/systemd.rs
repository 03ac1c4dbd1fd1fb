use std::path::Path;

use anyhow::{Context, Error};
use log::debug;

use crate::dependencies::Dependency;

pub const MOUNT_UNIT_SUFFIX: &str = "mount";

/// Takes in a path and a suffix, and returns a systemd-escaped unit name.
///
/// Example:
///
/// - /mnt, mount -> mnt.mount
/// - /var/lib/my-db, mount -> var-lib-my\x2ddb.mount
pub fn escape_unit_name(path: impl AsRef<Path>, suffix: &str) -> Result<String, Error> {
    Ok(Dependency::SystemdEscape
        .cmd()
        .arg("-p")
        .arg(format!("--suffix={suffix}"))
        .arg(path.as_ref())
        .output_and_check()
        .context("Failed to escape unit name")?
        .trim()
        .into())
}

/// Makes the service manager re-read unit files.
pub fn daemon_reload() -> Result<(), Error> {
    debug!("Reloading systemd units");
    Dependency::Systemctl
        .cmd()
        .arg("daemon-reload")
        .run_and_check()
        .context("Failed to reload systemd units")
}

pub fn start(unit: &str) -> Result<(), Error> {
    debug!("Starting unit '{unit}'");
    Dependency::Systemctl
        .cmd()
        .arg("start")
        .arg(unit)
        .run_and_check()
        .with_context(|| format!("Failed to start unit '{unit}'"))
}

pub fn enable(unit: &str) -> Result<(), Error> {
    debug!("Enabling unit '{unit}'");
    Dependency::Systemctl
        .cmd()
        .arg("enable")
        .arg(unit)
        .run_and_check()
        .with_context(|| format!("Failed to enable unit '{unit}'"))
}
