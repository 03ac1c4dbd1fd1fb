use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use log::debug;

use diskprov_api::{
    config::ProvisionConfig,
    error::{InvalidInputError, PreconditionError, ProvisionError, ProvisioningError, ReportError},
};
use osutils::block_devices::DeviceKind;

use super::host::Host;

/// Checks that every disk is a present, unused block device. Stops at the
/// first disk that fails a check.
///
/// Returns the device nodes behind the given paths, in order; every later
/// stage works on these rather than on the links the operator passed.
#[tracing::instrument(name = "disk_validation", skip_all)]
pub(super) fn validate_disks(
    host: &dyn Host,
    config: &ProvisionConfig,
) -> Result<Vec<PathBuf>, ProvisionError> {
    let mut resolved = Vec::with_capacity(config.disks.len());
    let mut seen = HashSet::new();
    for disk in &config.disks {
        let node = validate_disk(host, disk, &mut seen)?;
        debug!(
            "Disk '{}' ('{}') is an unused block device",
            disk.display(),
            node.display()
        );
        resolved.push(node);
    }

    Ok(resolved)
}

fn validate_disk(
    host: &dyn Host,
    disk: &Path,
    seen: &mut HashSet<PathBuf>,
) -> Result<PathBuf, ProvisionError> {
    let inspect = || ProvisioningError::InspectDisk { disk: disk.into() };

    match host.device_kind(disk).structured(inspect())? {
        DeviceKind::Missing => {
            return Err(ProvisionError::new(PreconditionError::DiskNotFound {
                disk: disk.into(),
            }))
        }
        DeviceKind::NotBlockDevice => {
            return Err(ProvisionError::new(PreconditionError::NotABlockDevice {
                disk: disk.into(),
            }))
        }
        DeviceKind::BlockDevice => (),
    }

    // Two spellings of the same device (a by-id link and its node)
    let node = host.resolve_disk(disk).structured(inspect())?;
    if !seen.insert(node.clone()) {
        return Err(ProvisionError::new(InvalidInputError::DuplicateDisk {
            disk: disk.into(),
        }));
    }

    if let Some(usage) = host.disk_usage(&node).structured(inspect())? {
        return Err(ProvisionError::new(PreconditionError::DiskInUse {
            disk: disk.into(),
            reason: usage.to_string(),
        }));
    }

    Ok(node)
}
