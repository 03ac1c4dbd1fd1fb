use std::{
    fs::{self, OpenOptions},
    io::ErrorKind,
    os::unix::fs::{FileTypeExt, OpenOptionsExt},
    path::{Path, PathBuf},
};

use anyhow::{Context, Error};
use log::{debug, trace};
use nix::{errno::Errno, fcntl::OFlag};

use diskprov_api::constants::{ARRAY_STATE_RELATIVE_PATH, DISCARD_GRANULARITY_RELATIVE_PATH};

use crate::{files, path::join_relative};

/// What a candidate path turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Missing,
    NotBlockDevice,
    BlockDevice,
}

/// Classifies `path` without following it any further than the kernel does
/// when opening it.
pub fn device_kind(path: impl AsRef<Path>) -> Result<DeviceKind, Error> {
    match fs::metadata(path.as_ref()) {
        Ok(metadata) if metadata.file_type().is_block_device() => Ok(DeviceKind::BlockDevice),
        Ok(_) => Ok(DeviceKind::NotBlockDevice),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(DeviceKind::Missing),
        Err(e) => Err(e).with_context(|| {
            format!("Failed to get metadata for '{}'", path.as_ref().display())
        }),
    }
}

/// Resolves links such as /dev/disk/by-id entries to the device node they
/// point to.
pub fn resolve(path: impl AsRef<Path>) -> Result<PathBuf, Error> {
    path.as_ref()
        .canonicalize()
        .with_context(|| format!("Failed to lookup device '{}'", path.as_ref().display()))
}

/// Returns the kernel name of a device node (sdb for /dev/sdb), resolving
/// links first.
pub fn kernel_name(path: impl AsRef<Path>) -> Result<String, Error> {
    let canonical = resolve(path)?;
    canonical
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_owned)
        .with_context(|| format!("Device path '{}' has no name", canonical.display()))
}

/// Path of a block device's directory in sysfs.
fn sysfs_block_dir(sysfs_root: &Path, kernel_name: &str) -> PathBuf {
    join_relative(sysfs_root, "class/block").join(kernel_name)
}

/// Returns the kernel names of the devices stacked on top of `kernel_name`
/// (array members list their array, LVM physical volumes their mappings).
pub fn holders(sysfs_root: impl AsRef<Path>, kernel_name: &str) -> Result<Vec<String>, Error> {
    let holders_dir = sysfs_block_dir(sysfs_root.as_ref(), kernel_name).join("holders");
    let entries = match fs::read_dir(&holders_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            trace!("No holders directory at '{}'", holders_dir.display());
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to read '{}'", holders_dir.display()))
        }
    };

    entries
        .map(|entry| {
            entry
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .with_context(|| format!("Failed to read entry of '{}'", holders_dir.display()))
        })
        .collect()
}

/// Finds the discard granularity attribute of a device. Partitions have no
/// request queue of their own and use the one of the disk they sit on, which
/// is their parent in the sysfs device tree.
fn discard_granularity_attribute(
    sysfs_root: &Path,
    kernel_name: &str,
) -> Result<Option<PathBuf>, Error> {
    let device_dir = sysfs_block_dir(sysfs_root, kernel_name);
    let attribute = device_dir.join(DISCARD_GRANULARITY_RELATIVE_PATH);
    if attribute.exists() {
        return Ok(Some(attribute));
    }

    if !device_dir.join("partition").exists() {
        return Ok(None);
    }
    let device_dir = device_dir
        .canonicalize()
        .with_context(|| format!("Failed to resolve '{}'", device_dir.display()))?;
    Ok(device_dir
        .parent()
        .map(|disk_dir| disk_dir.join(DISCARD_GRANULARITY_RELATIVE_PATH))
        .filter(|attribute| attribute.exists()))
}

/// Returns the discard granularity of a block device in bytes. Zero means
/// the device does not support discard, which is also assumed when the
/// kernel exposes no granularity at all.
pub fn discard_granularity(
    sysfs_root: impl AsRef<Path>,
    kernel_name: &str,
) -> Result<u64, Error> {
    let Some(attribute) = discard_granularity_attribute(sysfs_root.as_ref(), kernel_name)? else {
        debug!("No discard granularity reported for '{kernel_name}'");
        return Ok(0);
    };

    let value = files::read_file_trim(&attribute)?;
    value.parse().with_context(|| {
        format!(
            "Failed to parse discard granularity '{value}' from '{}'",
            attribute.display()
        )
    })
}

/// Reads the allocation marker of an array slot. `None` means the slot has
/// never been allocated.
pub fn array_state(
    sysfs_root: impl AsRef<Path>,
    kernel_name: &str,
) -> Result<Option<String>, Error> {
    let attribute = join_relative(sysfs_root.as_ref(), "block")
        .join(kernel_name)
        .join(ARRAY_STATE_RELATIVE_PATH);
    match fs::read_to_string(&attribute) {
        Ok(state) => Ok(Some(state.trim().to_owned())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read '{}'", attribute.display())),
    }
}

/// Tries to open the device exclusively. The kernel refuses with EBUSY while
/// anything else (a mount, an array, a device mapping) claims the device.
pub fn is_claimed(path: impl AsRef<Path>) -> Result<bool, Error> {
    match OpenOptions::new()
        .read(true)
        .custom_flags(OFlag::O_EXCL.bits())
        .open(path.as_ref())
    {
        Ok(_) => Ok(false),
        Err(e) if e.raw_os_error() == Some(Errno::EBUSY as i32) => Ok(true),
        Err(e) => Err(e)
            .with_context(|| format!("Failed to open '{}'", path.as_ref().display())),
    }
}
