use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use log::{debug, info};
use regex::Regex;

use crate::dependencies::Dependency;

/// Creates a striped (RAID-0) array over `device_paths`.
///
/// The array is started immediately and mdadm is not allowed to prompt, so
/// any stale superblock on the members is overwritten.
pub fn create_striped(
    raid_path: impl AsRef<Path>,
    device_paths: &[PathBuf],
    chunk_kib: u32,
    metadata_version: &str,
) -> Result<(), Error> {
    info!(
        "Creating striped array '{}' over {} device(s)",
        raid_path.as_ref().display(),
        device_paths.len()
    );

    Dependency::Mdadm
        .cmd()
        .arg("--create")
        .arg(raid_path.as_ref())
        .arg("--verbose")
        .arg("--force")
        .arg("--run")
        .arg("--level=0")
        .arg(format!("--chunk={chunk_kib}"))
        .arg(format!("--metadata={metadata_version}"))
        .arg(format!("--raid-devices={}", device_paths.len()))
        .args(device_paths)
        .run_and_check()
        .context("Failed to run mdadm create")
}

/// Returns the output of `mdadm --detail --scan`, one `ARRAY` line per active
/// array, in the format expected by mdadm.conf.
pub fn detail_scan() -> Result<String, Error> {
    debug!("Scanning active arrays");

    Dependency::Mdadm
        .cmd()
        .arg("--detail")
        .arg("--scan")
        .output_and_check()
        .context("Failed to run mdadm detail")
}

/// Extracts the array device paths from scan output.
pub fn scanned_arrays(scan_output: &str) -> Result<Vec<PathBuf>, Error> {
    let array_regex = Regex::new(r"^ARRAY\s+(\S+)")?;

    Ok(scan_output
        .lines()
        .filter_map(|line| array_regex.captures(line.trim_start()))
        .filter_map(|captures| captures.get(1))
        .map(|m| PathBuf::from(m.as_str()))
        .collect())
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn test_scanned_arrays() {
        let scan_output = indoc!(
            r#"
            ARRAY /dev/md0 metadata=1.2 name=node1:0 UUID=6245349d:505a367b:6ceba75f:7f55c158
            ARRAY /dev/md/my-raid metadata=1.0 name=localhost:my-raid UUID=ea381b70:20b2ab81:602edecb:cf6f2032
            "#
        );
        assert_eq!(
            scanned_arrays(scan_output).unwrap(),
            vec![PathBuf::from("/dev/md0"), PathBuf::from("/dev/md/my-raid")]
        );

        assert!(scanned_arrays("").unwrap().is_empty());
        assert!(scanned_arrays("MAILADDR root\n").unwrap().is_empty());
    }
}
