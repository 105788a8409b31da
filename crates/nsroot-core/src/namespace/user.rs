//! User namespace id mapping.
//!
//! Maps the caller's host uid and gid to root inside a fresh user
//! namespace, which is what lets an unprivileged caller mount.

use std::fs;
use std::path::Path;

use nsroot_common::error::{NsRootError, Result};

/// Writes single-id uid and gid maps for the calling process.
///
/// `setgroups` is denied first, as the kernel requires for unprivileged
/// gid mappings.
///
/// # Errors
///
/// Returns an error if writing to `/proc/self/setgroups`,
/// `/proc/self/uid_map`, or `/proc/self/gid_map` fails.
pub fn map_to_root(host_uid: u32, host_gid: u32) -> Result<()> {
    let setgroups_path = Path::new("/proc/self/setgroups");
    if setgroups_path.exists() {
        write(setgroups_path, "deny")?;
    }
    write(Path::new("/proc/self/uid_map"), &format!("0 {host_uid} 1\n"))?;
    write(Path::new("/proc/self/gid_map"), &format!("0 {host_gid} 1\n"))?;
    tracing::debug!(host_uid, host_gid, "wrote UID/GID map");
    Ok(())
}

fn write(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).map_err(|e| NsRootError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}
