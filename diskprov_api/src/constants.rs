use const_format::formatcp;

// Configuration defaults

/// Default mount root of the database's storage.
pub const DEFAULT_ROOT: &str = "/var/lib/scylla";

/// Default name of the database service (without the `.service` suffix).
pub const DEFAULT_SERVICE_NAME: &str = "scylla-server";

/// Default account owning the database's directories.
pub const DEFAULT_SERVICE_USER: &str = "scylla";

/// Default group owning the database's directories.
pub const DEFAULT_SERVICE_GROUP: &str = "scylla";

/// Default filesystem block size in bytes.
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

/// Path to load the optional configuration file from.
pub const CONFIG_PATH_DEFAULT: &str = "/etc/diskprov/diskprov.yaml";

// Array constants

/// Number of conventional array device slots probed when no array device was
/// requested.
pub const ARRAY_DEVICE_POOL_SIZE: usize = 10;

/// Directory holding the array device nodes.
pub const ARRAY_DEVICE_DIR: &str = "/dev";

/// Prefix of conventional array device names (md0, md1, ...).
pub const ARRAY_DEVICE_PREFIX: &str = "md";

/// Chunk size of the striped array, in KiB.
pub const ARRAY_CHUNK_SIZE_KIB: u32 = 1024;

/// Array superblock format.
pub const ARRAY_METADATA_VERSION: &str = "1.2";

/// Value of the allocation marker for an allocated but inactive array slot.
pub const ARRAY_STATE_CLEAR: &str = "clear";

/// Notification directive appended to the array configuration file.
pub const ARRAY_MAIL_DIRECTIVE: &str = "MAILADDR root";

/// Array configuration file on the Debian family.
pub const MDADM_CONF_PATH_DEBIAN: &str = "/etc/mdadm/mdadm.conf";

/// Array configuration file on every other family.
pub const MDADM_CONF_PATH_DEFAULT: &str = "/etc/mdadm.conf";

// Filesystem constants

/// Filesystem created on the target device.
pub const FILESYSTEM_TYPE: &str = "xfs";

/// Mount options always applied.
pub const MOUNT_OPTIONS: &str = "noatime";

/// Mount option enabling online discard.
pub const MOUNT_OPTION_DISCARD: &str = "discard";

/// Directory of stable filesystem UUID symlinks.
pub const DISK_BY_UUID_DIR: &str = "/dev/disk/by-uuid";

/// Directories the database expects below its mount point.
pub const DATABASE_DIRECTORIES: [&str; 6] = [
    "coredump",
    "data",
    "commitlog",
    "hints",
    "view_hints",
    "saved_caches",
];

// Service manager constants

/// Directory holding locally administered units.
pub const SYSTEMD_UNIT_DIR: &str = "/etc/systemd/system";

/// Array monitor service.
pub const ARRAY_MONITOR_SERVICE: &str = "mdmonitor.service";

/// Boot milestone reached once local filesystems are mounted.
pub const LOCAL_FS_TARGET: &str = "local-fs.target";

/// Target the mount unit is installed into.
pub const MULTI_USER_TARGET: &str = "multi-user.target";

/// Name of the drop-in declaring the database's mount dependencies.
pub const MOUNTS_DROPIN_NAME: &str = "mounts.conf";

/// Header of a freshly created dependency drop-in.
pub const UNIT_SECTION_HEADER: &str = "[Unit]";

/// Directive tying a service to a mount point.
pub const REQUIRES_MOUNTS_FOR: &str = "RequiresMountsFor";

// Kernel interface constants

/// Root of the kernel's sysfs.
pub const SYSFS_ROOT: &str = "/sys";

/// Path of the discard granularity attribute, relative to a block device's
/// sysfs directory.
pub const DISCARD_GRANULARITY_RELATIVE_PATH: &str = "queue/discard_granularity";

/// Path of the array state attribute, relative to an array's sysfs directory.
pub const ARRAY_STATE_RELATIVE_PATH: &str = formatcp!("{ARRAY_DEVICE_PREFIX}/array_state");

// Logging constants

/// JSON-lines log of every run.
pub const LOG_FILE_PATH_DEFAULT: &str = "/var/log/diskprov.log";

/// Name of the metrics stream written next to the log file.
pub const METRICS_FILE_NAME: &str = "diskprov-metrics.jsonl";
