#![allow(dead_code)]
//! Test utilities for the engine. `MockHost` answers queries from canned
//! state and records every mutating call, so whole pipeline runs can be
//! checked without touching devices.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::{bail, Error};
use nix::unistd::{Gid, Uid};
use uuid::Uuid;

use diskprov_api::config::{
    ArrayDevice, OsFamily, ProvisionConfig, ServiceIdentity, SystemPaths, VolumeRole,
};
use osutils::{block_devices::DeviceKind, dependencies::Dependency, packages::PackageManager};

use super::host::{DiskUsage, Host};

/// UUID reported for every filesystem created through the mock.
pub(crate) const MOCK_UUID: &str = "1a2b3c4d-0000-4000-8000-00000000beef";

/// A mutating call made against the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HostCall {
    InstallPackages {
        manager: PackageManager,
        packages: Vec<String>,
    },
    Discard(PathBuf),
    Settle,
    CreateArray {
        device: ArrayDevice,
        members: Vec<PathBuf>,
    },
    MakeFilesystem {
        device: PathBuf,
        block_size: u32,
    },
    ReloadUnits,
    StartUnit(String),
    EnableUnit(String),
    ChangeOwner(PathBuf),
    RefreshBootImage,
}

pub(crate) struct MockHost {
    root: bool,
    missing: Mutex<HashSet<Dependency>>,
    block_devices: HashSet<PathBuf>,
    other_files: HashSet<PathBuf>,
    links: HashMap<PathBuf, PathBuf>,
    usage: HashMap<PathBuf, DiskUsage>,
    mounted: HashSet<PathBuf>,
    array_states: HashMap<String, String>,
    granularity: HashMap<PathBuf, u64>,
    failing: HashSet<&'static str>,
    scan_output: String,
    calls: Mutex<Vec<HostCall>>,
}

impl Default for MockHost {
    fn default() -> Self {
        Self {
            root: true,
            missing: Mutex::new(HashSet::new()),
            block_devices: HashSet::new(),
            other_files: HashSet::new(),
            links: HashMap::new(),
            usage: HashMap::new(),
            mounted: HashSet::new(),
            array_states: HashMap::new(),
            granularity: HashMap::new(),
            failing: HashSet::new(),
            scan_output: String::new(),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockHost {
    /// Adds unused block devices that support discard.
    pub(crate) fn with_disks<P: Into<PathBuf>>(mut self, disks: impl IntoIterator<Item = P>) -> Self {
        for disk in disks {
            let disk = disk.into();
            self.granularity.insert(disk.clone(), 512);
            self.block_devices.insert(disk);
        }
        self
    }

    /// Adds a path that exists but is not a block device.
    pub(crate) fn with_regular_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.other_files.insert(path.into());
        self
    }

    /// Adds a link, such as a /dev/disk/by-id entry, to a device node.
    pub(crate) fn with_link(mut self, link: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        self.links.insert(link.into(), target.into());
        self
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.links
            .get(path)
            .cloned()
            .unwrap_or_else(|| path.to_path_buf())
    }

    pub(crate) fn with_usage(mut self, disk: impl Into<PathBuf>, usage: DiskUsage) -> Self {
        self.usage.insert(disk.into(), usage);
        self
    }

    pub(crate) fn with_granularity(mut self, disk: impl Into<PathBuf>, granularity: u64) -> Self {
        self.granularity.insert(disk.into(), granularity);
        self
    }

    pub(crate) fn with_mounted(mut self, path: impl Into<PathBuf>) -> Self {
        self.mounted.insert(path.into());
        self
    }

    /// Sets the allocation marker of an array slot, e.g. ("md0", "active").
    pub(crate) fn with_array_state(mut self, kernel_name: &str, state: &str) -> Self {
        self.array_states.insert(kernel_name.into(), state.into());
        self
    }

    pub(crate) fn with_missing(self, dependency: Dependency) -> Self {
        self.missing.lock().unwrap().insert(dependency);
        self
    }

    pub(crate) fn with_scan_output(mut self, scan_output: &str) -> Self {
        self.scan_output = scan_output.into();
        self
    }

    pub(crate) fn without_root(mut self) -> Self {
        self.root = false;
        self
    }

    /// Makes the named host operation fail, e.g. "discard" or "start_unit".
    pub(crate) fn failing(mut self, operation: &'static str) -> Self {
        self.failing.insert(operation);
        self
    }

    /// Every mutating call made so far, in order.
    pub(crate) fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, operation: &'static str, call: HostCall) -> Result<(), Error> {
        if self.failing.contains(operation) {
            bail!("Mock failure of '{operation}'");
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }

    fn check(&self, operation: &'static str) -> Result<(), Error> {
        if self.failing.contains(operation) {
            bail!("Mock failure of '{operation}'");
        }
        Ok(())
    }
}

impl Host for MockHost {
    fn is_root(&self) -> bool {
        self.root
    }

    fn is_available(&self, dependency: Dependency) -> bool {
        !self.missing.lock().unwrap().contains(&dependency)
    }

    fn install_packages(&self, manager: PackageManager, packages: &[&str]) -> Result<(), Error> {
        self.record(
            "install_packages",
            HostCall::InstallPackages {
                manager,
                packages: packages.iter().map(|p| p.to_string()).collect(),
            },
        )?;
        self.missing
            .lock()
            .unwrap()
            .retain(|d| !d.package().is_some_and(|p| packages.contains(&p)));
        Ok(())
    }

    fn device_kind(&self, disk: &Path) -> Result<DeviceKind, Error> {
        self.check("device_kind")?;
        let disk = self.resolve(disk);
        Ok(if self.block_devices.contains(&disk) {
            DeviceKind::BlockDevice
        } else if self.other_files.contains(&disk) {
            DeviceKind::NotBlockDevice
        } else {
            DeviceKind::Missing
        })
    }

    fn resolve_disk(&self, disk: &Path) -> Result<PathBuf, Error> {
        self.check("resolve_disk")?;
        Ok(self.resolve(disk))
    }

    fn disk_usage(&self, disk: &Path) -> Result<Option<DiskUsage>, Error> {
        self.check("disk_usage")?;
        Ok(self.usage.get(disk).cloned())
    }

    fn is_mountpoint(&self, path: &Path) -> Result<bool, Error> {
        self.check("is_mountpoint")?;
        Ok(self.mounted.contains(path))
    }

    fn array_state(&self, device: &ArrayDevice) -> Result<Option<String>, Error> {
        self.check("array_state")?;
        Ok(self.array_states.get(device.kernel_name()).cloned())
    }

    fn discard_granularity(&self, disk: &Path) -> Result<u64, Error> {
        Ok(self.granularity.get(disk).copied().unwrap_or_default())
    }

    fn discard(&self, disk: &Path) -> Result<(), Error> {
        self.record("discard", HostCall::Discard(disk.into()))
    }

    fn settle(&self) -> Result<(), Error> {
        self.record("settle", HostCall::Settle)
    }

    fn create_array(&self, device: &ArrayDevice, members: &[PathBuf]) -> Result<(), Error> {
        self.record(
            "create_array",
            HostCall::CreateArray {
                device: device.clone(),
                members: members.to_vec(),
            },
        )
    }

    fn make_filesystem(&self, device: &Path, block_size: u32) -> Result<(), Error> {
        self.record(
            "make_filesystem",
            HostCall::MakeFilesystem {
                device: device.into(),
                block_size,
            },
        )
    }

    fn scan_arrays(&self) -> Result<String, Error> {
        self.check("scan_arrays")?;
        Ok(self.scan_output.clone())
    }

    fn filesystem_uuid(&self, _device: &Path) -> Result<Uuid, Error> {
        self.check("filesystem_uuid")?;
        Ok(Uuid::parse_str(MOCK_UUID)?)
    }

    fn mount_unit_name(&self, mount_point: &Path) -> Result<String, Error> {
        self.check("mount_unit_name")?;
        let escaped = mount_point
            .to_string_lossy()
            .trim_matches('/')
            .split('/')
            .map(|component| component.replace('-', "\\x2d"))
            .collect::<Vec<_>>()
            .join("-");
        Ok(if escaped.is_empty() {
            "-.mount".into()
        } else {
            format!("{escaped}.mount")
        })
    }

    fn reload_units(&self) -> Result<(), Error> {
        self.record("reload_units", HostCall::ReloadUnits)
    }

    fn start_unit(&self, unit: &str) -> Result<(), Error> {
        self.record("start_unit", HostCall::StartUnit(unit.into()))
    }

    fn enable_unit(&self, unit: &str) -> Result<(), Error> {
        self.record("enable_unit", HostCall::EnableUnit(unit.into()))
    }

    fn resolve_owner(&self, _user: &str, _group: &str) -> Result<(Uid, Gid), Error> {
        self.check("resolve_owner")?;
        Ok((Uid::from_raw(112), Gid::from_raw(118)))
    }

    fn change_owner(&self, path: &Path, _uid: Uid, _gid: Gid) -> Result<(), Error> {
        self.record("change_owner", HostCall::ChangeOwner(path.into()))
    }

    fn refresh_boot_image(&self) -> Result<(), Error> {
        self.record("refresh_boot_image", HostCall::RefreshBootImage)
    }
}

/// Builds a configuration whose root and system paths all live below `dir`.
pub(crate) fn test_config<P: Into<PathBuf>>(
    dir: &Path,
    disks: impl IntoIterator<Item = P>,
) -> ProvisionConfig {
    ProvisionConfig {
        disks: disks.into_iter().map(Into::into).collect(),
        root: dir.join("var/lib/scylla"),
        role: VolumeRole::All,
        raid_device: None,
        force_array: false,
        enable_on_boot: false,
        online_discard: false,
        block_size: 4096,
        os_family: OsFamily::RedHat,
        service: ServiceIdentity::default(),
        paths: SystemPaths {
            unit_dir: dir.join("etc/systemd/system"),
            sysfs_root: dir.join("sys"),
            raid_config: Some(dir.join("etc/mdadm.conf")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_mount_unit_name() {
        let host = MockHost::default();
        assert_eq!(
            host.mount_unit_name(Path::new("/var/lib/scylla")).unwrap(),
            "var-lib-scylla.mount"
        );
        assert_eq!(
            host.mount_unit_name(Path::new("/var/lib/my-db/data")).unwrap(),
            "var-lib-my\\x2ddb-data.mount"
        );
        assert_eq!(host.mount_unit_name(Path::new("/")).unwrap(), "-.mount");
    }

    #[test]
    fn test_mock_records_and_fails() {
        let host = MockHost::default().failing("discard");
        host.settle().unwrap();
        host.discard(Path::new("/dev/sdb")).unwrap_err();
        assert_eq!(host.calls(), vec![HostCall::Settle]);
    }

    #[test]
    fn test_mock_install_makes_available() {
        let host = MockHost::default().with_missing(Dependency::Mdadm);
        assert!(!host.is_available(Dependency::Mdadm));
        host.install_packages(PackageManager::Dnf, &["mdadm"]).unwrap();
        assert!(host.is_available(Dependency::Mdadm));
    }
}
