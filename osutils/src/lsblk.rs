use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Error};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::dependencies::Dependency;

/// Columns requested from lsblk.
const LSBLK_COLUMNS: &str = "NAME,TYPE,FSTYPE,PTTYPE,MOUNTPOINTS";

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct LsBlkOutput {
    pub blockdevices: Vec<BlockDevice>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct BlockDevice {
    pub name: String,

    #[serde(rename = "type")]
    pub device_type: String,

    /// Filesystem or other content signature (e.g. `xfs`, `linux_raid_member`).
    pub fstype: Option<String>,

    /// Partition table signature (e.g. `gpt`).
    pub pttype: Option<String>,

    #[serde(default)]
    pub mountpoints: Vec<Option<PathBuf>>,

    #[serde(default)]
    pub children: Vec<BlockDevice>,
}

impl BlockDevice {
    /// Returns the first mount point of this device or any of its
    /// descendants.
    pub fn find_mountpoint(&self) -> Option<&Path> {
        self.mountpoints
            .iter()
            .flatten()
            .map(PathBuf::as_path)
            .next()
            .or_else(|| self.children.iter().find_map(|c| c.find_mountpoint()))
    }

    /// Returns the content signature found on the device itself, preferring
    /// the filesystem signature over the partition table.
    pub fn signature(&self) -> Option<&str> {
        self.fstype.as_deref().or(self.pttype.as_deref())
    }
}

/// Runs lsblk on a single device and returns its entry, including children.
pub fn get(device_path: impl AsRef<Path>) -> Result<BlockDevice, Error> {
    let result = Dependency::Lsblk
        .cmd()
        .arg("--json")
        .arg("--path")
        .arg("--bytes")
        .arg("--output")
        .arg(LSBLK_COLUMNS)
        .arg(device_path.as_ref())
        .output_and_check()
        .context("Failed to execute lsblk")?;

    let parsed = parse_lsblk_output(result.as_str());
    if parsed.is_err() {
        warn!("lsblk output: {}", result);
    }

    match parsed?.as_slice() {
        [device] => Ok(device.clone()),
        other => bail!(
            "Expected exactly one block device for '{}', lsblk returned {}",
            device_path.as_ref().display(),
            other.len()
        ),
    }
}

fn parse_lsblk_output(output: &str) -> Result<Vec<BlockDevice>, Error> {
    let parsed: LsBlkOutput =
        serde_json::from_str(output).context("Failed to parse lsblk output")?;

    Ok(parsed.blockdevices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unused_disk() {
        let output = indoc::indoc!(
            r#"
            {
               "blockdevices": [
                  {
                     "name": "/dev/nvme1n1",
                     "type": "disk",
                     "fstype": null,
                     "pttype": null,
                     "mountpoints": [
                         null
                     ]
                  }
               ]
            }
            "#
        );
        let devices = parse_lsblk_output(output).unwrap();
        assert_eq!(devices.len(), 1);
        let device = &devices[0];
        assert_eq!(device.name, "/dev/nvme1n1");
        assert_eq!(device.device_type, "disk");
        assert_eq!(device.find_mountpoint(), None);
        assert_eq!(device.signature(), None);
        assert!(device.children.is_empty());
    }

    #[test]
    fn test_parse_partitioned_disk() {
        let output = indoc::indoc!(
            r#"
            {
               "blockdevices": [
                  {
                     "name": "/dev/sda",
                     "type": "disk",
                     "fstype": null,
                     "pttype": "gpt",
                     "mountpoints": [
                         null
                     ],
                     "children": [
                        {
                           "name": "/dev/sda1",
                           "type": "part",
                           "fstype": "vfat",
                           "pttype": "gpt",
                           "mountpoints": [
                               "/boot/efi"
                           ]
                        },
                        {
                           "name": "/dev/sda2",
                           "type": "part",
                           "fstype": "ext4",
                           "pttype": "gpt",
                           "mountpoints": [
                               "/"
                           ]
                        }
                     ]
                  }
               ]
            }
            "#
        );
        let devices = parse_lsblk_output(output).unwrap();
        let device = &devices[0];
        assert_eq!(device.signature(), Some("gpt"));
        assert_eq!(device.children.len(), 2);
        assert_eq!(device.find_mountpoint(), Some(Path::new("/boot/efi")));
    }

    #[test]
    fn test_parse_raid_member() {
        let output = indoc::indoc!(
            r#"
            {
               "blockdevices": [
                  {
                     "name": "/dev/sdc",
                     "type": "disk",
                     "fstype": "linux_raid_member",
                     "pttype": null,
                     "mountpoints": [
                         null
                     ],
                     "children": [
                        {
                           "name": "/dev/md0",
                           "type": "raid0",
                           "fstype": "xfs",
                           "pttype": null,
                           "mountpoints": [
                               "/var/lib/scylla"
                           ]
                        }
                     ]
                  }
               ]
            }
            "#
        );
        let devices = parse_lsblk_output(output).unwrap();
        let device = &devices[0];
        assert_eq!(device.signature(), Some("linux_raid_member"));
        assert_eq!(
            device.find_mountpoint(),
            Some(Path::new("/var/lib/scylla"))
        );
    }

    #[test]
    fn test_parse_invalid_output() {
        parse_lsblk_output("").unwrap_err();
        parse_lsblk_output("{\"blockdevices\": [{\"name\": 3}]}").unwrap_err();
    }
}
