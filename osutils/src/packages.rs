use anyhow::{Context, Error};
use log::info;

use diskprov_api::config::OsFamily;

use crate::dependencies::Dependency;

/// Package manager of the host, selected from its distribution family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Dnf,
}

impl PackageManager {
    /// Returns `None` for families without a supported package manager.
    pub fn for_family(family: OsFamily) -> Option<Self> {
        match family {
            OsFamily::Debian => Some(Self::Apt),
            OsFamily::RedHat => Some(Self::Dnf),
            OsFamily::Other => None,
        }
    }

    pub fn dependency(&self) -> Dependency {
        match self {
            Self::Apt => Dependency::AptGet,
            Self::Dnf => Dependency::Dnf,
        }
    }

    /// Installs `packages` non-interactively.
    pub fn install(&self, packages: &[&str]) -> Result<(), Error> {
        if packages.is_empty() {
            return Ok(());
        }
        info!("Installing packages: {}", packages.join(", "));

        let mut cmd = self.dependency().cmd();
        if *self == Self::Apt {
            cmd.env("DEBIAN_FRONTEND", "noninteractive");
        }
        cmd.arg("install")
            .arg("-y")
            .args(packages)
            .run_and_check()
            .with_context(|| format!("Failed to install packages: {}", packages.join(", ")))
    }
}
