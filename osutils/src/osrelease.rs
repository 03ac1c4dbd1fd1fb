use std::path::Path;

use anyhow::{Context, Error};
use const_format::formatcp;
use log::trace;

use diskprov_api::config::OsFamily;

use crate::path;

/// Absolute path to the /etc/os-release file.
pub const OS_RELEASE_PATH: &str = "/etc/os-release";

/// The subset of /etc/os-release needed to pick a package manager and the
/// location of the array configuration.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct OsRelease {
    pub id: Option<String>,
    pub id_like: Vec<String>,
    pub name: Option<String>,
    pub version_id: Option<String>,
    pub pretty_name: Option<String>,
}

impl OsRelease {
    pub fn read() -> Result<Self, Error> {
        Ok(Self::parse(
            &std::fs::read_to_string(OS_RELEASE_PATH)
                .context(formatcp!("Failed to read '{OS_RELEASE_PATH}'"))?,
        ))
    }

    /// Reads /\<root\>/etc/os-release.
    pub fn read_root(root: impl AsRef<Path>) -> Result<Self, Error> {
        let osrelease_path = path::join_relative(root, OS_RELEASE_PATH);
        Ok(Self::parse(
            &std::fs::read_to_string(&osrelease_path)
                .with_context(|| format!("Failed to read '{}'", osrelease_path.display()))?,
        ))
    }

    /// Maps the distribution onto the family that decides package manager
    /// and configuration layout. `ID` wins over `ID_LIKE`.
    pub fn family(&self) -> OsFamily {
        let candidates = self
            .id
            .iter()
            .chain(self.id_like.iter())
            .map(String::as_str);

        for id in candidates {
            match id {
                "debian" | "ubuntu" => return OsFamily::Debian,
                "rhel" | "fedora" | "centos" | "rocky" | "almalinux" | "amzn" | "ol" => {
                    return OsFamily::RedHat
                }
                other => trace!("Unrecognized distribution identifier '{other}'"),
            }
        }

        OsFamily::Other
    }

    fn parse(data: &str) -> Self {
        let mut os_release = OsRelease::default();
        for line in data.lines() {
            if line.is_empty() || line.trim_start().starts_with('#') {
                continue;
            }

            let Some((key, raw_value)) = line.trim().split_once('=') else {
                continue;
            };

            let value = raw_value
                .trim()
                .trim_matches('\"')
                .trim_matches('\'')
                .to_string();

            match key {
                "ID" => os_release.id = Some(value),
                "ID_LIKE" => {
                    os_release.id_like = value.split_whitespace().map(str::to_owned).collect()
                }
                "NAME" => os_release.name = Some(value),
                "VERSION_ID" => os_release.version_id = Some(value),
                "PRETTY_NAME" => os_release.pretty_name = Some(value),
                _ => {}
            }
        }

        os_release
    }
}

/// Detects the family of the running host.
pub fn detect_family() -> Result<OsFamily, Error> {
    Ok(OsRelease::read()?.family())
}
