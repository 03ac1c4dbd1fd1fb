use std::{
    collections::HashSet,
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString, IntoStaticStr};

use crate::{
    constants::{
        ARRAY_DEVICE_DIR, ARRAY_DEVICE_PREFIX, DEFAULT_BLOCK_SIZE, DEFAULT_ROOT,
        DEFAULT_SERVICE_GROUP, DEFAULT_SERVICE_NAME, DEFAULT_SERVICE_USER, MDADM_CONF_PATH_DEBIAN,
        MDADM_CONF_PATH_DEFAULT, MOUNTS_DROPIN_NAME, SYSFS_ROOT, SYSTEMD_UNIT_DIR,
    },
    error::{InvalidInputError, ProvisionError},
};

/// Which part of the database's storage the volume holds. Determines the
/// mount point below the configured root.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VolumeRole {
    /// Everything lives on the volume, mounted at the root itself.
    #[default]
    All,
    /// Data files only, mounted at `<root>/data`.
    Data,
    /// Commit log only, mounted at `<root>/commitlog`.
    Commitlog,
}

impl VolumeRole {
    /// Returns the mount point of the volume below `root`.
    pub fn mount_point(&self, root: impl AsRef<Path>) -> PathBuf {
        match self {
            Self::All => root.as_ref().to_path_buf(),
            Self::Data => root.as_ref().join("data"),
            Self::Commitlog => root.as_ref().join("commitlog"),
        }
    }
}

/// Packaging family of the host. Selects the array configuration path, the
/// package manager and whether a boot image refresh is needed.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum OsFamily {
    Debian,
    #[serde(rename = "redhat")]
    #[strum(serialize = "redhat")]
    RedHat,
    #[default]
    Other,
}

impl OsFamily {
    /// Path of the array configuration file for this family.
    pub fn raid_config_path(&self) -> &'static Path {
        match self {
            Self::Debian => Path::new(MDADM_CONF_PATH_DEBIAN),
            Self::RedHat | Self::Other => Path::new(MDADM_CONF_PATH_DEFAULT),
        }
    }

    /// Whether the boot image has to be regenerated for a new array to be
    /// assembled at early boot.
    pub fn needs_boot_image_refresh(&self) -> bool {
        matches!(self, Self::Debian)
    }
}

/// Name of an array device, always stored as an absolute path under /dev.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArrayDevice(PathBuf);

impl ArrayDevice {
    /// Returns the conventional device in slot `index` (/dev/md<index>).
    pub fn slot(index: usize) -> Self {
        Self(Path::new(ARRAY_DEVICE_DIR).join(format!("{ARRAY_DEVICE_PREFIX}{index}")))
    }

    /// Returns the ordered pool of conventional device names.
    pub fn pool(size: usize) -> Vec<Self> {
        (0..size).map(Self::slot).collect()
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Kernel name of the device (md3 for /dev/md3).
    pub fn kernel_name(&self) -> &str {
        self.0
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
    }
}

impl FromStr for ArrayDevice {
    type Err = ProvisionError;

    /// Accepts either a bare kernel name (`md3`) or a path (`/dev/md3`).
    /// Anything that is not an md device, such as `sda`, is rejected: it
    /// has no allocation marker and would look like a free slot.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            ProvisionError::new(InvalidInputError::InvalidArrayDeviceName { name: s.into() })
        };
        let name = match s.strip_prefix(ARRAY_DEVICE_DIR) {
            Some(rest) => rest.strip_prefix('/').ok_or_else(invalid)?,
            None => s,
        };
        let index = name.strip_prefix(ARRAY_DEVICE_PREFIX).ok_or_else(invalid)?;
        if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        Ok(Self(Path::new(ARRAY_DEVICE_DIR).join(name)))
    }
}

impl TryFrom<String> for ArrayDevice {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse().map_err(|e: ProvisionError| e.kind().to_string())
    }
}

impl From<ArrayDevice> for String {
    fn from(value: ArrayDevice) -> Self {
        value.0.to_string_lossy().into_owned()
    }
}

impl fmt::Display for ArrayDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Identity of the database service the volume is provisioned for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ServiceIdentity {
    /// Unit name without the `.service` suffix.
    pub name: String,
    pub user: String,
    pub group: String,
}

impl Default for ServiceIdentity {
    fn default() -> Self {
        Self {
            name: DEFAULT_SERVICE_NAME.into(),
            user: DEFAULT_SERVICE_USER.into(),
            group: DEFAULT_SERVICE_GROUP.into(),
        }
    }
}

impl ServiceIdentity {
    pub fn unit_name(&self) -> String {
        format!("{}.service", self.name)
    }
}

/// Locations of the system interfaces diskprov reads and writes. Only ever
/// changed away from the defaults by tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemPaths {
    pub unit_dir: PathBuf,
    pub sysfs_root: PathBuf,
    /// Overrides the family-specific array configuration path.
    pub raid_config: Option<PathBuf>,
}

impl Default for SystemPaths {
    fn default() -> Self {
        Self {
            unit_dir: SYSTEMD_UNIT_DIR.into(),
            sysfs_root: SYSFS_ROOT.into(),
            raid_config: None,
        }
    }
}

/// Optional settings file. Every field may be omitted; CLI flags take
/// precedence over anything set here.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ProvisionSettings {
    #[serde(default)]
    pub disks: Vec<PathBuf>,
    pub root: Option<PathBuf>,
    pub volume_role: Option<VolumeRole>,
    pub raid_device: Option<ArrayDevice>,
    #[serde(default)]
    pub force_array: bool,
    #[serde(default)]
    pub enable_on_boot: bool,
    #[serde(default)]
    pub online_discard: bool,
    pub block_size: Option<u32>,
    pub os_family: Option<OsFamily>,
    pub service: Option<ServiceIdentity>,
}

impl ProvisionSettings {
    /// Overlays `other` on top of `self`: values set in `other` win, boolean
    /// switches are enabled when either side enables them.
    pub fn merge(self, other: ProvisionSettings) -> ProvisionSettings {
        ProvisionSettings {
            disks: if other.disks.is_empty() {
                self.disks
            } else {
                other.disks
            },
            root: other.root.or(self.root),
            volume_role: other.volume_role.or(self.volume_role),
            raid_device: other.raid_device.or(self.raid_device),
            force_array: self.force_array || other.force_array,
            enable_on_boot: self.enable_on_boot || other.enable_on_boot,
            online_discard: self.online_discard || other.online_discard,
            block_size: other.block_size.or(self.block_size),
            os_family: other.os_family.or(self.os_family),
            service: other.service.or(self.service),
        }
    }
}

/// Immutable configuration of one provisioning run, threaded through every
/// stage of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionConfig {
    pub disks: Vec<PathBuf>,
    pub root: PathBuf,
    pub role: VolumeRole,
    pub raid_device: Option<ArrayDevice>,
    pub force_array: bool,
    pub enable_on_boot: bool,
    pub online_discard: bool,
    pub block_size: u32,
    pub os_family: OsFamily,
    pub service: ServiceIdentity,
    pub paths: SystemPaths,
}

impl ProvisionConfig {
    /// Validates merged settings into a configuration. `detected_family` is
    /// used when the settings do not pin the OS family.
    pub fn from_settings(
        settings: ProvisionSettings,
        detected_family: OsFamily,
    ) -> Result<Self, ProvisionError> {
        if settings.disks.is_empty() {
            return Err(ProvisionError::new(InvalidInputError::NoDisks));
        }

        let mut seen = HashSet::new();
        for disk in &settings.disks {
            if !seen.insert(disk) {
                return Err(ProvisionError::new(InvalidInputError::DuplicateDisk {
                    disk: disk.clone(),
                }));
            }
        }

        let root = settings.root.unwrap_or_else(|| DEFAULT_ROOT.into());
        if !root.is_absolute() {
            return Err(ProvisionError::new(InvalidInputError::RelativeRoot { root }));
        }

        Ok(Self {
            disks: settings.disks,
            root,
            role: settings.volume_role.unwrap_or_default(),
            raid_device: settings.raid_device,
            force_array: settings.force_array,
            enable_on_boot: settings.enable_on_boot,
            online_discard: settings.online_discard,
            block_size: settings.block_size.unwrap_or(DEFAULT_BLOCK_SIZE),
            os_family: settings.os_family.unwrap_or(detected_family),
            service: settings.service.unwrap_or_default(),
            paths: SystemPaths::default(),
        })
    }

    /// Mount point of the volume.
    pub fn mount_point(&self) -> PathBuf {
        self.role.mount_point(&self.root)
    }

    /// Array configuration file targeted by this run.
    pub fn raid_config_path(&self) -> PathBuf {
        self.paths
            .raid_config
            .clone()
            .unwrap_or_else(|| self.os_family.raid_config_path().to_path_buf())
    }

    /// Path of the drop-in declaring the database's mount dependencies.
    pub fn dependency_dropin_path(&self) -> PathBuf {
        self.paths
            .unit_dir
            .join(format!("{}.d", self.service.unit_name()))
            .join(MOUNTS_DROPIN_NAME)
    }
}
