use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{debug, info};
use serde::Serialize;

use diskprov_api::{
    config::{ArrayDevice, ProvisionConfig},
    constants::{ARRAY_DEVICE_POOL_SIZE, ARRAY_STATE_CLEAR},
    error::{InvalidInputError, PreconditionError, ProvisionError, ProvisioningError, ReportError},
};

use super::host::Host;

/// Block device the filesystem is created on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ArrayPlan {
    /// A single disk used as is.
    Direct { device: PathBuf },
    /// A striped array assembled over all disks.
    Array {
        device: ArrayDevice,
        members: Vec<PathBuf>,
    },
}

impl ArrayPlan {
    pub fn device(&self) -> &Path {
        match self {
            Self::Direct { device } => device,
            Self::Array { device, .. } => device.path(),
        }
    }

    /// Disks the filesystem is built from.
    pub fn disks(&self) -> &[PathBuf] {
        match self {
            Self::Direct { device } => std::slice::from_ref(device),
            Self::Array { members, .. } => members,
        }
    }

    pub fn uses_array(&self) -> bool {
        matches!(self, Self::Array { .. })
    }
}

/// Everything decided before the first destructive step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProvisionPlan {
    pub target: ArrayPlan,
    pub mount_point: PathBuf,
    /// Escaped name of the mount unit (var-lib-scylla.mount).
    pub mount_unit: String,
    pub mount_unit_path: PathBuf,
}

/// Whether the disks are assembled into an array: always for more than one
/// disk, and for a single disk only on request.
pub fn needs_array(disk_count: usize, force_array: bool) -> bool {
    disk_count > 1 || force_array
}

/// An array slot can be taken when it was never allocated or has been
/// cleared.
fn is_free(state: Option<&str>) -> bool {
    matches!(state, None | Some(ARRAY_STATE_CLEAR))
}

/// Returns the first candidate whose allocation marker is absent or cleared.
/// Candidates are probed in order and the search does not wrap around.
pub fn select_array_device<F>(
    candidates: &[ArrayDevice],
    mut lookup: F,
) -> Result<ArrayDevice, ProvisionError>
where
    F: FnMut(&ArrayDevice) -> Result<Option<String>, ProvisionError>,
{
    for candidate in candidates {
        let state = lookup(candidate)?;
        if is_free(state.as_deref()) {
            debug!("Selected free array device '{candidate}'");
            return Ok(candidate.clone());
        }
        debug!(
            "Array device '{candidate}' is taken (state '{}')",
            state.unwrap_or_default()
        );
    }

    Err(ProvisionError::new(
        PreconditionError::ArrayDevicesExhausted {
            candidates: candidates.len(),
        },
    ))
}

/// Checks the array device named by the operator. There is no fallback to
/// the pool when it is taken.
fn claim_array_device<F>(device: &ArrayDevice, mut lookup: F) -> Result<ArrayDevice, ProvisionError>
where
    F: FnMut(&ArrayDevice) -> Result<Option<String>, ProvisionError>,
{
    match lookup(device)? {
        state if is_free(state.as_deref()) => Ok(device.clone()),
        state => Err(ProvisionError::new(
            PreconditionError::ArrayDeviceUnavailable {
                device: device.path().into(),
                state: state.unwrap_or_default(),
            },
        )),
    }
}

fn plan_target(
    host: &dyn Host,
    config: &ProvisionConfig,
    mut disks: Vec<PathBuf>,
) -> Result<ArrayPlan, ProvisionError> {
    if !needs_array(disks.len(), config.force_array) {
        let device = disks.pop().structured(InvalidInputError::NoDisks)?;
        return Ok(ArrayPlan::Direct { device });
    }

    let lookup = |device: &ArrayDevice| {
        host.array_state(device)
            .structured(ProvisioningError::QueryArrayState {
                device: device.path().into(),
            })
    };

    let device = match &config.raid_device {
        Some(device) => claim_array_device(device, lookup)?,
        None => select_array_device(&ArrayDevice::pool(ARRAY_DEVICE_POOL_SIZE), lookup)?,
    };

    Ok(ArrayPlan::Array {
        device,
        members: disks,
    })
}

/// Refuses to go on when the mount point is in use or a mount unit for it
/// already exists.
fn check_mount_target(
    host: &dyn Host,
    config: &ProvisionConfig,
    mount_point: &Path,
) -> Result<(String, PathBuf), ProvisionError> {
    if host
        .is_mountpoint(mount_point)
        .structured(ProvisioningError::QueryMountPoint {
            path: mount_point.into(),
        })?
    {
        return Err(ProvisionError::new(PreconditionError::AlreadyMounted {
            path: mount_point.into(),
        }));
    }

    let mount_unit = host
        .mount_unit_name(mount_point)
        .structured(ProvisioningError::EscapeUnitName {
            path: mount_point.into(),
        })?;
    let mount_unit_path = config.paths.unit_dir.join(&mount_unit);
    if fs::symlink_metadata(&mount_unit_path).is_ok() {
        return Err(ProvisionError::new(PreconditionError::MountUnitExists {
            path: mount_unit_path,
        }));
    }

    Ok((mount_unit, mount_unit_path))
}

/// Decides where the filesystem goes and checks that the mount target is
/// free. `disks` are the validated device nodes. Nothing on the host is
/// changed.
#[tracing::instrument(name = "array_planning", skip_all)]
pub(super) fn plan(
    host: &dyn Host,
    config: &ProvisionConfig,
    disks: Vec<PathBuf>,
) -> Result<ProvisionPlan, ProvisionError> {
    let target = plan_target(host, config, disks)?;
    let mount_point = config.mount_point();
    let (mount_unit, mount_unit_path) = check_mount_target(host, config, &mount_point)?;

    match &target {
        ArrayPlan::Direct { device } => info!(
            "Filesystem for '{}' will be created directly on '{}'",
            mount_point.display(),
            device.display()
        ),
        ArrayPlan::Array { device, members } => info!(
            "Filesystem for '{}' will be created on array '{device}' over {} disk(s)",
            mount_point.display(),
            members.len()
        ),
    }

    Ok(ProvisionPlan {
        target,
        mount_point,
        mount_unit,
        mount_unit_path,
    })
}
