use std::{ffi::OsString, path::Path};

use anyhow::{Context, Error};

use crate::dependencies::Dependency;

/// Creates an XFS filesystem on `device_path`.
///
/// The discard pass of mkfs is skipped (`-K`) as the device has already been
/// trimmed, and any stale signature is overwritten (`-f`).
pub fn run_xfs(device_path: &Path, block_size: u32) -> Result<(), Error> {
    Dependency::MkfsXfs
        .cmd()
        .args(xfs_args(device_path, block_size))
        .run_and_check()
        .context("Failed to execute mkfs.xfs")
}

fn xfs_args(device_path: &Path, block_size: u32) -> Vec<OsString> {
    vec![
        "-f".into(),
        "-K".into(),
        "-b".into(),
        format!("size={block_size}").into(),
        device_path.into(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xfs_args() {
        assert_eq!(
            xfs_args(Path::new("/dev/md0"), 4096),
            ["-f", "-K", "-b", "size=4096", "/dev/md0"]
                .iter()
                .map(OsString::from)
                .collect::<Vec<_>>()
        );
    }
}
