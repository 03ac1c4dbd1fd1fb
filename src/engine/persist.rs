use std::{
    fs,
    io::ErrorKind,
    path::Path,
};

use anyhow::{Context, Error};
use log::{debug, info, warn};
use uuid::Uuid;

use diskprov_api::{
    config::{ArrayDevice, ProvisionConfig},
    constants::{
        ARRAY_MAIL_DIRECTIVE, ARRAY_MONITOR_SERVICE, DISK_BY_UUID_DIR, FILESYSTEM_TYPE,
        LOCAL_FS_TARGET, MOUNT_OPTIONS, MOUNT_OPTION_DISCARD, MULTI_USER_TARGET,
        REQUIRES_MOUNTS_FOR, UNIT_SECTION_HEADER,
    },
    error::{PreconditionError, ProvisionError, ProvisioningError, ReportError},
};
use osutils::{files, mdadm};

use super::{
    host::Host,
    planner::{ArrayPlan, ProvisionPlan},
};

/// How an artifact already on disk relates to the one about to be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactState {
    /// Nothing of ours is there yet.
    Absent,
    /// Something is there that must not be touched.
    Conflicting,
    /// What is there already matches or can be extended.
    Compatible,
}

/// Returns the metadata of `path` without following links, or `None` if
/// nothing exists there.
fn existing(path: &Path) -> Result<Option<fs::Metadata>, Error> {
    match fs::symlink_metadata(path) {
        Ok(metadata) => Ok(Some(metadata)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to inspect '{}'", path.display())),
    }
}

/// The mount unit is compatible only when the existing file is identical to
/// the one that would be written.
pub fn mount_unit_state(path: &Path, contents: &str) -> Result<ArtifactState, Error> {
    match existing(path)? {
        None => Ok(ArtifactState::Absent),
        Some(metadata) if !metadata.is_file() => Ok(ArtifactState::Conflicting),
        Some(_) => {
            let current = fs::read_to_string(path)
                .with_context(|| format!("Failed to read '{}'", path.display()))?;
            Ok(if current == contents {
                ArtifactState::Compatible
            } else {
                ArtifactState::Conflicting
            })
        }
    }
}

/// The tracked artifact is the dependency line for `mount_point`: absent
/// until the drop-in declares it, whether or not the file itself exists.
pub fn dependency_dropin_state(path: &Path, mount_point: &Path) -> Result<ArtifactState, Error> {
    match existing(path)? {
        None => Ok(ArtifactState::Absent),
        Some(metadata) if !metadata.is_file() => Ok(ArtifactState::Conflicting),
        Some(_) => {
            let current = fs::read_to_string(path)
                .with_context(|| format!("Failed to read '{}'", path.display()))?;
            let line = requires_mounts_line(mount_point);
            Ok(if current.lines().any(|l| l.trim() == line) {
                ArtifactState::Compatible
            } else {
                ArtifactState::Absent
            })
        }
    }
}

/// The array configuration is regenerated on every run; only something
/// other than a regular file stands in the way.
pub fn raid_config_state(path: &Path) -> Result<ArtifactState, Error> {
    Ok(match existing(path)? {
        None => ArtifactState::Absent,
        Some(metadata) if metadata.is_file() => ArtifactState::Compatible,
        Some(_) => ArtifactState::Conflicting,
    })
}

fn requires_mounts_line(mount_point: &Path) -> String {
    format!("{REQUIRES_MOUNTS_FOR}={}", mount_point.display())
}

/// Renders the mount unit. The device is referenced by filesystem UUID so
/// the unit survives device renumbering.
pub fn render_mount_unit(
    config: &ProvisionConfig,
    plan: &ProvisionPlan,
    uuid: &Uuid,
) -> String {
    let mut after = LOCAL_FS_TARGET.to_string();
    let mut wants = String::new();
    if plan.target.uses_array() {
        after.push(' ');
        after.push_str(ARRAY_MONITOR_SERVICE);
        wants = format!("Wants={ARRAY_MONITOR_SERVICE}\n");
    }

    let mut options = MOUNT_OPTIONS.to_string();
    if config.online_discard {
        options.push(',');
        options.push_str(MOUNT_OPTION_DISCARD);
    }

    format!(
        "[Unit]\n\
         Description={service} data directory\n\
         Before={unit}\n\
         After={after}\n\
         {wants}\
         DefaultDependencies=no\n\
         \n\
         [Mount]\n\
         What={DISK_BY_UUID_DIR}/{uuid}\n\
         Where={mount_point}\n\
         Type={FILESYSTEM_TYPE}\n\
         Options={options}\n\
         \n\
         [Install]\n\
         WantedBy={MULTI_USER_TARGET}\n",
        service = config.service.name,
        unit = config.service.unit_name(),
        mount_point = plan.mount_point.display(),
    )
}

fn write_raid_config(
    host: &dyn Host,
    config: &ProvisionConfig,
    device: &ArrayDevice,
) -> Result<(), ProvisionError> {
    let path = config.raid_config_path();
    if raid_config_state(&path).structured(ProvisioningError::WriteArtifact {
        path: path.clone(),
    })? == ArtifactState::Conflicting
    {
        return Err(ProvisionError::new(PreconditionError::ConflictingArtifact {
            path,
        }));
    }

    let scan = host.scan_arrays().structured(ProvisioningError::ScanArrays)?;
    if !mdadm::scanned_arrays(&scan)
        .structured(ProvisioningError::ScanArrays)?
        .iter()
        .any(|array| array == device.path())
    {
        warn!("Array '{device}' is missing from the scan output");
    }

    let mut contents = scan.trim_end().to_string();
    if !contents.is_empty() {
        contents.push('\n');
    }
    contents.push_str(ARRAY_MAIL_DIRECTIVE);
    contents.push('\n');

    info!("Writing array configuration to '{}'", path.display());
    files::write_file(&path, 0o644, contents.as_bytes())
        .structured(ProvisioningError::WriteArtifact { path })
}

fn write_mount_unit(
    config: &ProvisionConfig,
    plan: &ProvisionPlan,
    uuid: &Uuid,
) -> Result<(), ProvisionError> {
    let path = &plan.mount_unit_path;
    let contents = render_mount_unit(config, plan, uuid);

    match mount_unit_state(path, &contents).structured(ProvisioningError::WriteArtifact {
        path: path.clone(),
    })? {
        ArtifactState::Absent => {
            info!("Writing mount unit '{}'", path.display());
            files::write_file(path, 0o644, contents.as_bytes())
                .structured(ProvisioningError::WriteArtifact { path: path.clone() })
        }
        ArtifactState::Compatible => {
            debug!("Mount unit '{}' is already up to date", path.display());
            Ok(())
        }
        ArtifactState::Conflicting => Err(ProvisionError::new(
            PreconditionError::ConflictingArtifact { path: path.clone() },
        )),
    }
}

fn write_dependency_dropin(
    config: &ProvisionConfig,
    mount_point: &Path,
) -> Result<(), ProvisionError> {
    let path = config.dependency_dropin_path();
    let write_error = || ProvisioningError::WriteArtifact { path: path.clone() };

    match dependency_dropin_state(&path, mount_point).structured(write_error())? {
        ArtifactState::Compatible => {
            debug!(
                "'{}' already requires '{}'",
                path.display(),
                mount_point.display()
            );
            Ok(())
        }
        ArtifactState::Conflicting => Err(ProvisionError::new(
            PreconditionError::ConflictingArtifact { path: path.clone() },
        )),
        ArtifactState::Absent => {
            let line = requires_mounts_line(mount_point);
            if path.exists() {
                info!("Adding '{}' to '{}'", mount_point.display(), path.display());
                let current = fs::read_to_string(&path).structured(write_error())?;
                let separator = if current.is_empty() || current.ends_with('\n') {
                    ""
                } else {
                    "\n"
                };
                files::append_file(&path, format!("{separator}{line}\n").as_bytes())
                    .structured(write_error())
            } else {
                info!("Writing '{}'", path.display());
                files::write_file(
                    &path,
                    0o644,
                    format!("{UNIT_SECTION_HEADER}\n{line}\n").as_bytes(),
                )
                .structured(write_error())
            }
        }
    }
}

/// Writes the array configuration, the mount unit and the service
/// dependency declaration. Returns the UUID of the new filesystem.
#[tracing::instrument(name = "persistence", skip_all)]
pub(super) fn persist(
    host: &dyn Host,
    config: &ProvisionConfig,
    plan: &ProvisionPlan,
) -> Result<Uuid, ProvisionError> {
    if let ArrayPlan::Array { device, .. } = &plan.target {
        write_raid_config(host, config, device)?;
    }

    let device = plan.target.device();
    let uuid = host
        .filesystem_uuid(device)
        .structured(ProvisioningError::FilesystemUuid {
            device: device.into(),
        })?;
    debug!("Filesystem on '{}' has UUID '{uuid}'", device.display());

    write_mount_unit(config, plan, &uuid)?;
    write_dependency_dropin(config, &plan.mount_point)?;

    Ok(uuid)
}
