use log::{debug, info};

use diskprov_api::{
    config::ProvisionConfig,
    error::{
        ExecutionEnvironmentMisconfigurationError, ProvisionError, ProvisioningError, ReportError,
    },
};
use osutils::{dependencies::Dependency, packages::PackageManager};

mod activate;
mod format;
pub mod host;
mod persist;
pub mod planner;
mod validation;

#[cfg(test)]
pub(crate) mod test_utils;

pub use host::{Host, SystemHost};
pub use persist::ArtifactState;
pub use planner::{ArrayPlan, ProvisionPlan};

/// Binaries the pipeline runs, besides the service manager.
fn required_dependencies(uses_array: bool) -> Vec<Dependency> {
    let mut dependencies = vec![
        Dependency::MkfsXfs,
        Dependency::Blkid,
        Dependency::Lsblk,
        Dependency::Blkdiscard,
        Dependency::Mountpoint,
    ];
    if uses_array {
        dependencies.push(Dependency::Mdadm);
    }
    dependencies
}

/// Installs the packages providing any missing binary through the host's
/// package manager.
#[tracing::instrument(name = "dependency_check", skip_all)]
fn ensure_dependencies(host: &dyn Host, config: &ProvisionConfig) -> Result<(), ProvisionError> {
    let uses_array = planner::needs_array(config.disks.len(), config.force_array);
    let missing: Vec<Dependency> = required_dependencies(uses_array)
        .into_iter()
        .filter(|dependency| !host.is_available(*dependency))
        .collect();
    let Some(first_missing) = missing.first() else {
        debug!("All required binaries are present");
        return Ok(());
    };

    let manager = PackageManager::for_family(config.os_family).structured(
        ExecutionEnvironmentMisconfigurationError::NoPackageManager {
            binary: first_missing.name(),
        },
    )?;

    let mut packages: Vec<&str> = Vec::new();
    for package in missing.iter().filter_map(Dependency::package) {
        if !packages.contains(&package) {
            packages.push(package);
        }
    }
    info!("Installing missing packages: {}", packages.join(", "));
    host.install_packages(manager, &packages)
        .structured(ProvisioningError::InstallPackage {
            package: packages.join(" "),
        })?;

    match missing.iter().find(|dependency| !host.is_available(**dependency)) {
        Some(dependency) => Err(ProvisionError::new(
            ExecutionEnvironmentMisconfigurationError::MissingBinary {
                binary: dependency.name(),
            },
        )),
        None => Ok(()),
    }
}

/// Validates the disks and decides what to build, without changing anything
/// on the host.
pub fn plan(host: &dyn Host, config: &ProvisionConfig) -> Result<ProvisionPlan, ProvisionError> {
    let disks = validation::validate_disks(host, config)?;
    tracing::info!(metric_name = "disks_validated", disks = disks.len());

    planner::plan(host, config, disks)
}

/// Runs the whole pipeline: validation, planning, formatting, persistence
/// and activation. Stops at the first failure; nothing is rolled back.
#[tracing::instrument(skip_all)]
pub fn provision(
    host: &dyn Host,
    config: &ProvisionConfig,
) -> Result<ProvisionPlan, ProvisionError> {
    if !host.is_root() {
        return Err(ProvisionError::new(
            ExecutionEnvironmentMisconfigurationError::MissingRequiredPermissions,
        ));
    }

    ensure_dependencies(host, config)?;

    let plan = self::plan(host, config)?;

    format::format(host, config, &plan.target)?;
    tracing::info!(metric_name = "filesystem_created", block_size = config.block_size);

    let uuid = persist::persist(host, config, &plan)?;
    tracing::info!(metric_name = "artifacts_persisted", uuid = %uuid);

    activate::activate(host, config, &plan)?;
    tracing::info!(metric_name = "volume_activated");

    info!(
        "Provisioned '{}' on '{}' (filesystem UUID {uuid})",
        plan.mount_point.display(),
        plan.target.device().display()
    );
    Ok(plan)
}
