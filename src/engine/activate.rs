use log::{debug, info};

use diskprov_api::{
    config::ProvisionConfig,
    constants::{ARRAY_MONITOR_SERVICE, DATABASE_DIRECTORIES},
    error::{ProvisionError, ProvisioningError, ReportError},
};
use osutils::files;

use super::{host::Host, planner::ProvisionPlan};

fn start_unit(host: &dyn Host, unit: &str) -> Result<(), ProvisionError> {
    info!("Starting '{unit}'");
    host.start_unit(unit)
        .structured(ProvisioningError::StartUnit { unit: unit.into() })
}

/// Mounts the new filesystem, prepares the database's directory layout on it
/// and makes sure the array is assembled again at boot.
#[tracing::instrument(name = "activation", skip_all)]
pub(super) fn activate(
    host: &dyn Host,
    config: &ProvisionConfig,
    plan: &ProvisionPlan,
) -> Result<(), ProvisionError> {
    host.reload_units()
        .structured(ProvisioningError::ReloadUnits)?;

    if plan.target.uses_array() {
        start_unit(host, ARRAY_MONITOR_SERVICE)?;
    }

    start_unit(host, &plan.mount_unit)?;
    if config.enable_on_boot {
        info!("Enabling '{}'", plan.mount_unit);
        host.enable_unit(&plan.mount_unit)
            .structured(ProvisioningError::EnableUnit {
                unit: plan.mount_unit.clone(),
            })?;
    }

    for directory in DATABASE_DIRECTORIES {
        let path = plan.mount_point.join(directory);
        debug!("Creating '{}'", path.display());
        files::create_dirs(&path).structured(ProvisioningError::CreateDirectory { path })?;
    }

    let service = &config.service;
    let (uid, gid) = host
        .resolve_owner(&service.user, &service.group)
        .structured(ProvisioningError::ResolveAccount {
            name: format!("{}:{}", service.user, service.group),
        })?;
    host.change_owner(&plan.mount_point, uid, gid)
        .structured(ProvisioningError::ChangeOwnership {
            path: plan.mount_point.clone(),
        })?;

    if config.os_family.needs_boot_image_refresh() {
        info!("Refreshing boot image");
        host.refresh_boot_image()
            .structured(ProvisioningError::RefreshBootImage)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use diskprov_api::{config::OsFamily, error::ErrorKind};
    use tempfile::tempdir;

    use crate::engine::{
        planner::{self, ArrayPlan},
        test_utils::{test_config, HostCall, MockHost},
    };

    #[test]
    fn test_activate_direct() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path(), ["/dev/sdb"]);
        let host = MockHost::default();
        let plan = planner::plan(&host, &config, config.disks.clone()).unwrap();

        activate(&host, &config, &plan).unwrap();
        assert_eq!(
            host.calls(),
            vec![
                HostCall::ReloadUnits,
                HostCall::StartUnit(plan.mount_unit.clone()),
                HostCall::ChangeOwner(plan.mount_point.clone()),
            ]
        );
        for directory in DATABASE_DIRECTORIES {
            assert!(plan.mount_point.join(directory).is_dir(), "{directory}");
        }
    }

    #[test]
    fn test_activate_array_debian_enabled() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path(), ["/dev/sdb", "/dev/sdc"]);
        config.enable_on_boot = true;
        config.os_family = OsFamily::Debian;
        let host = MockHost::default();
        let plan = planner::plan(&host, &config, config.disks.clone()).unwrap();
        assert!(matches!(plan.target, ArrayPlan::Array { .. }));

        activate(&host, &config, &plan).unwrap();
        assert_eq!(
            host.calls(),
            vec![
                HostCall::ReloadUnits,
                HostCall::StartUnit("mdmonitor.service".into()),
                HostCall::StartUnit(plan.mount_unit.clone()),
                HostCall::EnableUnit(plan.mount_unit.clone()),
                HostCall::ChangeOwner(plan.mount_point.clone()),
                HostCall::RefreshBootImage,
            ]
        );
    }

    #[test]
    fn test_activate_start_failure() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path(), ["/dev/sdb"]);
        let host = MockHost::default().failing("start_unit");
        let plan = planner::plan(&host, &config, config.disks.clone()).unwrap();

        let err = activate(&host, &config, &plan).unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::Provisioning(ProvisioningError::StartUnit {
                unit: plan.mount_unit.clone()
            })
        );
        assert!(!plan.mount_point.join("data").exists());
    }

    #[test]
    fn test_activate_unknown_account() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path(), ["/dev/sdb"]);
        let host = MockHost::default().failing("resolve_owner");
        let plan = planner::plan(&host, &config, config.disks.clone()).unwrap();

        let err = activate(&host, &config, &plan).unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::Provisioning(ProvisioningError::ResolveAccount {
                name: "scylla:scylla".into()
            })
        );
    }
}
