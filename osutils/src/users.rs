use std::{
    fs,
    os::unix::fs::lchown,
    path::Path,
};

use anyhow::{Context, Error};
use log::debug;
use nix::unistd::{Gid, Group, Uid, User};

/// Looks up a user by name.
pub fn uid_of(name: &str) -> Result<Uid, Error> {
    User::from_name(name)
        .with_context(|| format!("Failed to look up user '{name}'"))?
        .map(|user| user.uid)
        .with_context(|| format!("User '{name}' does not exist"))
}

/// Looks up a group by name.
pub fn gid_of(name: &str) -> Result<Gid, Error> {
    Group::from_name(name)
        .with_context(|| format!("Failed to look up group '{name}'"))?
        .map(|group| group.gid)
        .with_context(|| format!("Group '{name}' does not exist"))
}

/// Changes the owner of `path` and everything below it. Symlinks are
/// re-owned themselves and never followed.
pub fn chown_recursive(path: impl AsRef<Path>, uid: Uid, gid: Gid) -> Result<(), Error> {
    let path = path.as_ref();
    debug!("Changing owner of '{}' to {uid}:{gid}", path.display());

    lchown(path, Some(uid.as_raw()), Some(gid.as_raw()))
        .with_context(|| format!("Failed to change owner of '{}'", path.display()))?;

    let metadata = fs::symlink_metadata(path)
        .with_context(|| format!("Failed to get metadata for '{}'", path.display()))?;
    if !metadata.is_dir() {
        return Ok(());
    }

    for entry in
        fs::read_dir(path).with_context(|| format!("Failed to read '{}'", path.display()))?
    {
        let entry =
            entry.with_context(|| format!("Failed to read entry of '{}'", path.display()))?;
        chown_recursive(entry.path(), uid, gid)?;
    }

    Ok(())
}
