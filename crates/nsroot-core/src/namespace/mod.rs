//! Namespace entry ahead of a filesystem transition.
//!
//! A transition needs its own mount namespace with private propagation;
//! without root privileges it also needs a user namespace to own it.

pub mod mount;
pub mod user;

use nix::sched::{CloneFlags, unshare};
use nix::unistd::{getgid, getuid};
use nsroot_common::error::{NsRootError, Result};

/// Which namespaces to create before the transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceConfig {
    /// Create a user namespace mapping the caller to root.
    pub user: bool,
    /// Create a mount namespace.
    pub mount: bool,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            user: false,
            mount: true,
        }
    }
}

impl NamespaceConfig {
    /// Namespaces for running a transition without privileges.
    pub const fn rootless() -> Self {
        Self {
            user: true,
            mount: true,
        }
    }

    /// The `unshare(2)` flags for this configuration.
    pub fn clone_flags(&self) -> CloneFlags {
        let mut flags = CloneFlags::empty();
        if self.user {
            flags |= CloneFlags::CLONE_NEWUSER;
        }
        if self.mount {
            flags |= CloneFlags::CLONE_NEWNS;
        }
        flags
    }
}

/// Unshares the configured namespaces for the calling process and prepares
/// them for a transition: the caller is mapped to root in a new user
/// namespace, and a new mount namespace gets private propagation.
///
/// `CLONE_NEWUSER` requires a single-threaded caller.
///
/// # Errors
///
/// Returns an error if `unshare(2)`, the id mapping, or the propagation
/// change fails.
pub fn enter_namespaces(config: &NamespaceConfig) -> Result<()> {
    tracing::info!(config = ?config, "creating namespaces");
    let (uid, gid) = (getuid(), getgid());
    unshare(config.clone_flags()).map_err(|errno| NsRootError::Namespace {
        flags: format!("{:?}", config.clone_flags()),
        source: errno.into(),
    })?;
    if config.user {
        user::map_to_root(uid.as_raw(), gid.as_raw())?;
    }
    if config.mount {
        mount::make_mounts_private()?;
    }
    Ok(())
}
