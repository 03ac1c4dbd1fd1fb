use std::path::Path;

use log::{debug, info};

use diskprov_api::{
    config::{ProvisionConfig, ProvisionSettings},
    constants::CONFIG_PATH_DEFAULT,
    error::{InvalidInputError, ProvisionError, ProvisioningError, ReportError},
};
use osutils::osrelease;

/// Reads a YAML settings file.
pub fn load_settings_file(path: impl AsRef<Path>) -> Result<ProvisionSettings, ProvisionError> {
    let path = path.as_ref();
    let contents =
        std::fs::read_to_string(path).structured(InvalidInputError::LoadConfigFile {
            path: path.to_string_lossy().into(),
        })?;

    serde_yaml::from_str(&contents).structured(InvalidInputError::ParseConfigFile {
        path: path.to_string_lossy().into(),
    })
}

/// Layers CLI settings over the settings file. An explicitly named file must
/// exist; the default file is only read when present.
fn layered_settings(
    config_file: Option<&Path>,
    default_file: &Path,
    overrides: ProvisionSettings,
) -> Result<ProvisionSettings, ProvisionError> {
    let file_settings = match config_file {
        Some(path) => {
            info!("Loading settings from '{}'", path.display());
            load_settings_file(path)?
        }
        None if default_file.exists() => {
            info!("Loading settings from '{}'", default_file.display());
            load_settings_file(default_file)?
        }
        None => {
            debug!("No settings file, using defaults and command line");
            ProvisionSettings::default()
        }
    };

    Ok(file_settings.merge(overrides))
}

/// Builds the run's configuration from defaults, the settings file and the
/// command line, in increasing order of precedence.
pub fn load_config(
    config_file: Option<&Path>,
    overrides: ProvisionSettings,
) -> Result<ProvisionConfig, ProvisionError> {
    let settings = layered_settings(config_file, Path::new(CONFIG_PATH_DEFAULT), overrides)?;

    let detected_family = match settings.os_family {
        Some(family) => family,
        None => osrelease::detect_family().structured(ProvisioningError::DetectOsFamily)?,
    };
    debug!("OS family: {detected_family}");

    ProvisionConfig::from_settings(settings, detected_family)
}
