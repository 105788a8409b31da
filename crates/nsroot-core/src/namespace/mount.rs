//! Mount namespace isolation.
//!
//! `pivot_root(2)` refuses to move a root whose mount, or whose new root's
//! parent mount, has shared propagation, so the namespace is made private
//! first.

use nix::mount::{MsFlags, mount};
use nsroot_common::error::{NsRootError, Result};

/// Marks every mount in the caller's namespace as private, recursively.
///
/// # Errors
///
/// Returns [`NsRootError::StagingSetup`] if the `mount(2)` call fails.
pub fn make_mounts_private() -> Result<()> {
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|errno| NsRootError::StagingSetup {
        path: "/".into(),
        source: errno.into(),
    })?;
    tracing::debug!("mount propagation set to private");
    Ok(())
}
