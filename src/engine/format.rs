use std::path::{Path, PathBuf};

use log::{debug, info};
use rayon::prelude::*;

use diskprov_api::{
    config::ProvisionConfig,
    error::{ProvisionError, ProvisioningError, ReportError},
};

use super::{host::Host, planner::ArrayPlan};

/// Discards every disk that supports it. All discards run to completion
/// before the first failure, if any, is reported.
fn discard_disks(host: &dyn Host, disks: &[PathBuf]) -> Result<(), ProvisionError> {
    let results: Vec<Result<(), ProvisionError>> = disks
        .par_iter()
        .map(|disk| discard_disk(host, disk))
        .collect();

    results.into_iter().collect()
}

fn discard_disk(host: &dyn Host, disk: &Path) -> Result<(), ProvisionError> {
    let granularity = host
        .discard_granularity(disk)
        .structured(ProvisioningError::InspectDisk { disk: disk.into() })?;
    if granularity == 0 {
        debug!("Disk '{}' does not support discard", disk.display());
        return Ok(());
    }

    host.discard(disk)
        .structured(ProvisioningError::Discard { disk: disk.into() })
}

/// Erases the disks, assembles the array if one is planned and creates the
/// filesystem. Nothing is undone on failure.
#[tracing::instrument(name = "destructive_format", skip_all)]
pub(super) fn format(
    host: &dyn Host,
    config: &ProvisionConfig,
    target: &ArrayPlan,
) -> Result<(), ProvisionError> {
    discard_disks(host, target.disks())?;

    if let ArrayPlan::Array { device, members } = target {
        host.settle().structured(ProvisioningError::SettleDevices)?;
        host.create_array(device, members)
            .structured(ProvisioningError::CreateArray {
                device: device.path().into(),
            })?;
        host.settle().structured(ProvisioningError::SettleDevices)?;
        tracing::info!(metric_name = "array_created", members = members.len());
    }

    let device = target.device();
    info!("Creating filesystem on '{}'", device.display());
    host.make_filesystem(device, config.block_size)
        .structured(ProvisioningError::CreateFilesystem {
            device: device.into(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    use diskprov_api::{config::ArrayDevice, error::ErrorKind};
    use tempfile::tempdir;

    use crate::engine::test_utils::{test_config, HostCall, MockHost};

    #[test]
    fn test_format_direct() {
        let dir = tempdir().unwrap();
        let host = MockHost::default().with_disks(["/dev/sdb"]);
        let mut config = test_config(dir.path(), ["/dev/sdb"]);
        config.block_size = 1024;
        let target = ArrayPlan::Direct {
            device: "/dev/sdb".into(),
        };

        format(&host, &config, &target).unwrap();
        assert_eq!(
            host.calls(),
            vec![
                HostCall::Discard("/dev/sdb".into()),
                HostCall::MakeFilesystem {
                    device: "/dev/sdb".into(),
                    block_size: 1024
                },
            ]
        );
    }

    #[test]
    fn test_format_array() {
        let dir = tempdir().unwrap();
        let host = MockHost::default()
            .with_disks(["/dev/sdb", "/dev/sdc", "/dev/sdd"])
            .with_granularity("/dev/sdd", 0);
        let config = test_config(dir.path(), ["/dev/sdb", "/dev/sdc", "/dev/sdd"]);
        let target = ArrayPlan::Array {
            device: ArrayDevice::slot(0),
            members: config.disks.clone(),
        };

        format(&host, &config, &target).unwrap();
        let calls = host.calls();

        // Discards run in parallel, in no particular order
        let mut discards = calls[..2].to_vec();
        discards.sort_by_key(|call| format!("{call:?}"));
        assert_eq!(
            discards,
            vec![
                HostCall::Discard("/dev/sdb".into()),
                HostCall::Discard("/dev/sdc".into()),
            ]
        );
        assert_eq!(
            calls[2..],
            [
                HostCall::Settle,
                HostCall::CreateArray {
                    device: ArrayDevice::slot(0),
                    members: config.disks.clone(),
                },
                HostCall::Settle,
                HostCall::MakeFilesystem {
                    device: "/dev/md0".into(),
                    block_size: 4096
                },
            ]
        );
    }

    #[test]
    fn test_format_discard_failure_joins() {
        let dir = tempdir().unwrap();
        let host = MockHost::default()
            .with_disks(["/dev/sdb", "/dev/sdc"])
            .failing("discard");
        let config = test_config(dir.path(), ["/dev/sdb", "/dev/sdc"]);
        let target = ArrayPlan::Array {
            device: ArrayDevice::slot(0),
            members: config.disks.clone(),
        };

        let err = format(&host, &config, &target).unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Provisioning(ProvisioningError::Discard { .. })
        ));
        // Nothing after the discard stage ran
        assert!(host.calls().is_empty());
    }

    #[test]
    fn test_format_array_failure() {
        let dir = tempdir().unwrap();
        let host = MockHost::default()
            .with_disks(["/dev/sdb", "/dev/sdc"])
            .failing("create_array");
        let config = test_config(dir.path(), ["/dev/sdb", "/dev/sdc"]);
        let target = ArrayPlan::Array {
            device: ArrayDevice::slot(4),
            members: config.disks.clone(),
        };

        let err = format(&host, &config, &target).unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::Provisioning(ProvisioningError::CreateArray {
                device: "/dev/md4".into()
            })
        );
        assert!(!host
            .calls()
            .iter()
            .any(|call| matches!(call, HostCall::MakeFilesystem { .. })));
    }
}
