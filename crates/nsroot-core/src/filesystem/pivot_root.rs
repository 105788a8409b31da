//! Root switching: `pivot_root(2)` for isolated transitions, `chroot(2)`
//! when no mount namespace is used.

use std::path::Path;

use nix::mount::{MntFlags, umount2};
use nix::unistd::{chdir, chroot};
use nsroot_common::error::{NsRootError, Result};

/// Makes `new_root` the root of the mount namespace and drops the old one.
///
/// `new_root` doubles as the place the old root is stashed at: after
/// `pivot_root(new_root, new_root)` the old root is stacked on top of `/`,
/// and a lazy unmount of `/` discards it. The working directory is then
/// set to `cwd`, resolved in the new root.
///
/// A failure leaves the namespace half-switched; callers must not retry.
///
/// # Errors
///
/// Returns [`NsRootError::Pivot`] naming the failing step.
pub fn pivot_into(new_root: &Path, cwd: &Path) -> Result<()> {
    nix::unistd::pivot_root(new_root, new_root)
        .map_err(|errno| pivot_error(format!("pivot_root('{0}', '{0}')", new_root.display()), errno))?;
    umount2("/", MntFlags::MNT_DETACH)
        .map_err(|errno| pivot_error("umount2('/', MNT_DETACH)".into(), errno))?;
    chdir(cwd).map_err(|errno| pivot_error(format!("chdir('{}')", cwd.display()), errno))?;
    tracing::info!(new_root = %new_root.display(), cwd = %cwd.display(), "pivoted into new root");
    Ok(())
}

/// Changes the root directory to `dir` and the working directory to `/`.
///
/// # Errors
///
/// Returns [`NsRootError::Pivot`] if `chroot(2)` or `chdir(2)` fails.
pub fn chroot_into(dir: &Path) -> Result<()> {
    chroot(dir).map_err(|errno| pivot_error(format!("chroot('{}')", dir.display()), errno))?;
    chdir("/").map_err(|errno| pivot_error("chdir('/')".into(), errno))?;
    tracing::info!(root = %dir.display(), "chrooted");
    Ok(())
}

/// Changes the working directory to the current root.
///
/// # Errors
///
/// Returns [`NsRootError::StagingSetup`] if `chdir(2)` fails.
pub fn enter_host_root() -> Result<()> {
    chdir("/").map_err(|errno| NsRootError::StagingSetup {
        path: "/".into(),
        source: errno.into(),
    })
}

fn pivot_error(step: String, errno: nix::errno::Errno) -> NsRootError {
    NsRootError::Pivot {
        step,
        source: errno.into(),
    }
}
