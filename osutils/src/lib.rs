pub mod blkdiscard;
pub mod blkid;
pub mod block_devices;
pub mod dependencies;
pub mod files;
pub mod initramfs;
pub mod lsblk;
pub mod mdadm;
pub mod mkfs;
pub mod mountpoint;
pub mod osrelease;
pub mod packages;
pub mod path;
pub mod systemd;
pub mod udevadm;
pub mod users;
