//! The boundary between the provisioning pipeline and the machine it runs on.
//!
//! Every query or mutation of devices, the service manager, packages or the
//! account database goes through [`Host`]. Files the pipeline writes itself
//! (unit files, the array configuration, the directory layout) are written
//! directly to the paths in the configuration.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use anyhow::Error;
use nix::unistd::{geteuid, Gid, Uid};
use uuid::Uuid;

use diskprov_api::config::{ArrayDevice, SystemPaths};
use osutils::{
    blkdiscard, blkid,
    block_devices::{self, DeviceKind},
    dependencies::Dependency,
    initramfs, lsblk, mdadm, mkfs, mountpoint,
    packages::PackageManager,
    systemd, udevadm, users,
};

/// Why a disk cannot be handed to the formatter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskUsage {
    /// The disk or one of its partitions is mounted.
    Mounted(PathBuf),
    /// Other block devices are stacked on the disk (array, device mapper).
    Held(Vec<String>),
    /// The disk carries a filesystem, partition table or array signature.
    Signature(String),
    /// Someone else holds the device open exclusively.
    Claimed,
}

impl fmt::Display for DiskUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mounted(path) => write!(f, "mounted at '{}'", path.display()),
            Self::Held(holders) => write!(f, "held by {}", holders.join(", ")),
            Self::Signature(signature) => write!(f, "carries a '{signature}' signature"),
            Self::Claimed => write!(f, "opened exclusively by another process"),
        }
    }
}

/// Decides whether a disk is in use. Mounts (of the disk or any partition)
/// come first, then stacked devices, then content signatures; the
/// exclusive-open attempt only runs when none of those hit.
pub fn classify_usage<F>(
    device: &lsblk::BlockDevice,
    holders: Vec<String>,
    is_claimed: F,
) -> Result<Option<DiskUsage>, Error>
where
    F: FnOnce() -> Result<bool, Error>,
{
    if let Some(mount_point) = device.find_mountpoint() {
        return Ok(Some(DiskUsage::Mounted(mount_point.to_path_buf())));
    }

    if !holders.is_empty() {
        return Ok(Some(DiskUsage::Held(holders)));
    }

    if let Some(signature) = device.signature() {
        return Ok(Some(DiskUsage::Signature(signature.into())));
    }

    if is_claimed()? {
        return Ok(Some(DiskUsage::Claimed));
    }

    Ok(None)
}

pub trait Host: Sync {
    /// Whether the process runs with an effective UID of 0.
    fn is_root(&self) -> bool;

    /// Whether a runtime dependency can be found on the host.
    fn is_available(&self, dependency: Dependency) -> bool;

    fn install_packages(&self, manager: PackageManager, packages: &[&str]) -> Result<(), Error>;

    fn device_kind(&self, disk: &Path) -> Result<DeviceKind, Error>;

    /// Device node behind `disk`, after resolving links such as
    /// /dev/disk/by-id entries.
    fn resolve_disk(&self, disk: &Path) -> Result<PathBuf, Error>;

    /// Returns the first reason the disk is in use, if any.
    fn disk_usage(&self, disk: &Path) -> Result<Option<DiskUsage>, Error>;

    fn is_mountpoint(&self, path: &Path) -> Result<bool, Error>;

    /// Allocation marker of an array slot; `None` when never allocated.
    fn array_state(&self, device: &ArrayDevice) -> Result<Option<String>, Error>;

    fn discard_granularity(&self, disk: &Path) -> Result<u64, Error>;

    fn discard(&self, disk: &Path) -> Result<(), Error>;

    fn settle(&self) -> Result<(), Error>;

    fn create_array(&self, device: &ArrayDevice, members: &[PathBuf]) -> Result<(), Error>;

    fn make_filesystem(&self, device: &Path, block_size: u32) -> Result<(), Error>;

    /// Scan output describing every active array, in configuration file
    /// syntax.
    fn scan_arrays(&self) -> Result<String, Error>;

    fn filesystem_uuid(&self, device: &Path) -> Result<Uuid, Error>;

    /// Name of the mount unit for `mount_point` (var-lib-scylla.mount).
    fn mount_unit_name(&self, mount_point: &Path) -> Result<String, Error>;

    fn reload_units(&self) -> Result<(), Error>;

    fn start_unit(&self, unit: &str) -> Result<(), Error>;

    fn enable_unit(&self, unit: &str) -> Result<(), Error>;

    fn resolve_owner(&self, user: &str, group: &str) -> Result<(Uid, Gid), Error>;

    fn change_owner(&self, path: &Path, uid: Uid, gid: Gid) -> Result<(), Error>;

    fn refresh_boot_image(&self) -> Result<(), Error>;
}

/// The machine diskprov runs on.
pub struct SystemHost {
    sysfs_root: PathBuf,
}

impl SystemHost {
    pub fn new(paths: &SystemPaths) -> Self {
        Self {
            sysfs_root: paths.sysfs_root.clone(),
        }
    }
}

impl Host for SystemHost {
    fn is_root(&self) -> bool {
        geteuid().is_root()
    }

    fn is_available(&self, dependency: Dependency) -> bool {
        dependency.exists()
    }

    fn install_packages(&self, manager: PackageManager, packages: &[&str]) -> Result<(), Error> {
        manager.install(packages)
    }

    fn device_kind(&self, disk: &Path) -> Result<DeviceKind, Error> {
        block_devices::device_kind(disk)
    }

    fn resolve_disk(&self, disk: &Path) -> Result<PathBuf, Error> {
        block_devices::resolve(disk)
    }

    fn disk_usage(&self, disk: &Path) -> Result<Option<DiskUsage>, Error> {
        let device = lsblk::get(disk)?;
        let holders = block_devices::holders(&self.sysfs_root, &block_devices::kernel_name(disk)?)?;
        classify_usage(&device, holders, || block_devices::is_claimed(disk))
    }

    fn is_mountpoint(&self, path: &Path) -> Result<bool, Error> {
        mountpoint::check_is_mountpoint(path)
    }

    fn array_state(&self, device: &ArrayDevice) -> Result<Option<String>, Error> {
        block_devices::array_state(&self.sysfs_root, device.kernel_name())
    }

    fn discard_granularity(&self, disk: &Path) -> Result<u64, Error> {
        block_devices::discard_granularity(&self.sysfs_root, &block_devices::kernel_name(disk)?)
    }

    fn discard(&self, disk: &Path) -> Result<(), Error> {
        blkdiscard::discard(disk)
    }

    fn settle(&self) -> Result<(), Error> {
        udevadm::settle()
    }

    fn create_array(&self, device: &ArrayDevice, members: &[PathBuf]) -> Result<(), Error> {
        mdadm::create_striped(
            device.path(),
            members,
            diskprov_api::constants::ARRAY_CHUNK_SIZE_KIB,
            diskprov_api::constants::ARRAY_METADATA_VERSION,
        )
    }

    fn make_filesystem(&self, device: &Path, block_size: u32) -> Result<(), Error> {
        mkfs::run_xfs(device, block_size)
    }

    fn scan_arrays(&self) -> Result<String, Error> {
        mdadm::detail_scan()
    }

    fn filesystem_uuid(&self, device: &Path) -> Result<Uuid, Error> {
        blkid::get_filesystem_uuid(device)
    }

    fn mount_unit_name(&self, mount_point: &Path) -> Result<String, Error> {
        systemd::escape_unit_name(mount_point, systemd::MOUNT_UNIT_SUFFIX)
    }

    fn reload_units(&self) -> Result<(), Error> {
        systemd::daemon_reload()
    }

    fn start_unit(&self, unit: &str) -> Result<(), Error> {
        systemd::start(unit)
    }

    fn enable_unit(&self, unit: &str) -> Result<(), Error> {
        systemd::enable(unit)
    }

    fn resolve_owner(&self, user: &str, group: &str) -> Result<(Uid, Gid), Error> {
        Ok((users::uid_of(user)?, users::gid_of(group)?))
    }

    fn change_owner(&self, path: &Path, uid: Uid, gid: Gid) -> Result<(), Error> {
        users::chown_recursive(path, uid, gid)
    }

    fn refresh_boot_image(&self) -> Result<(), Error> {
        initramfs::update()
    }
}
