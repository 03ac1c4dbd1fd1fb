use std::path::Path;

use anyhow::{Context, Error};
use uuid::Uuid;

use crate::dependencies::Dependency;

fn run(device_path: impl AsRef<Path>, tag: &str) -> Result<String, Error> {
    let output = Dependency::Blkid
        .cmd()
        .arg("-o") // output format
        .arg("value") // single value
        .arg("-s") // tag
        .arg(tag)
        .arg(device_path.as_ref())
        .output_and_check()
        .context("Failed to execute blkid")?;

    Ok(output.trim().to_owned())
}

/// Returns the UUID embedded in the filesystem on `device_path` at format
/// time.
pub fn get_filesystem_uuid(device_path: impl AsRef<Path>) -> Result<Uuid, Error> {
    let output = run(&device_path, "UUID")?;
    parse_uuid(&output).with_context(|| {
        format!(
            "Failed to get UUID for path '{}', received '{}'",
            device_path.as_ref().display(),
            output
        )
    })
}

fn parse_uuid(output: &str) -> Result<Uuid, Error> {
    Uuid::parse_str(output.trim()).context("Invalid filesystem UUID")
}
