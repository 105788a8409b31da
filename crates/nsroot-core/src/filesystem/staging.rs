//! The private staging area the new root is assembled in.
//!
//! Two directories are created under a configurable parent, each backed by
//! its own size-bounded tmpfs: the future root, and a scratch directory for
//! inline-content files. The scratch tmpfs is detached before the pivot;
//! the root tmpfs becomes `/`.

use std::fs::DirBuilder;
use std::io::ErrorKind;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use nix::mount::{MntFlags, MsFlags, mount, umount2};
use nsroot_common::constants::{STAGING_DIR_MODE, STAGING_ROOT_NAME, STAGING_SCRATCH_NAME};
use nsroot_common::error::{NsRootError, Result};

/// Locations and size of the staging tmpfs pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Staging {
    root: PathBuf,
    scratch: PathBuf,
    size: u64,
}

impl Staging {
    /// Describes a staging area under `parent`, each tmpfs capped at `size`
    /// bytes. Nothing is created until [`Self::create`].
    pub fn new(parent: &Path, size: u64) -> Self {
        Self {
            root: parent.join(STAGING_ROOT_NAME),
            scratch: parent.join(STAGING_SCRATCH_NAME),
            size,
        }
    }

    /// Directory that becomes the new root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding staged inline-content files.
    pub fn scratch(&self) -> &Path {
        &self.scratch
    }

    /// Option string passed to each tmpfs mount.
    pub fn tmpfs_options(&self) -> String {
        format!("size={}", self.size)
    }

    /// Creates both directories and mounts a tmpfs on each.
    ///
    /// Existing directories are reused; the tmpfs hides their content.
    ///
    /// # Errors
    ///
    /// Returns [`NsRootError::StagingSetup`] if a directory cannot be
    /// created or a tmpfs cannot be mounted.
    pub fn create(&self) -> Result<()> {
        let options = self.tmpfs_options();
        for dir in [&self.root, &self.scratch] {
            match DirBuilder::new().mode(STAGING_DIR_MODE).create(dir) {
                Err(e) if e.kind() != ErrorKind::AlreadyExists => {
                    return Err(NsRootError::StagingSetup {
                        path: dir.clone(),
                        source: e,
                    });
                }
                _ => {}
            }
            mount(
                None::<&str>,
                dir,
                Some("tmpfs"),
                MsFlags::empty(),
                Some(options.as_str()),
            )
            .map_err(|errno| NsRootError::StagingSetup {
                path: dir.clone(),
                source: errno.into(),
            })?;
            tracing::debug!(path = %dir.display(), options = %options, "staging tmpfs mounted");
        }
        Ok(())
    }

    /// Lazily detaches the scratch tmpfs.
    ///
    /// # Errors
    ///
    /// Returns [`NsRootError::Pivot`] if `umount2(2)` fails.
    pub fn detach_scratch(&self) -> Result<()> {
        umount2(&self.scratch, MntFlags::MNT_DETACH).map_err(|errno| NsRootError::Pivot {
            step: format!("umount2('{}', MNT_DETACH)", self.scratch.display()),
            source: errno.into(),
        })?;
        tracing::debug!(path = %self.scratch.display(), "scratch tmpfs detached");
        Ok(())
    }
}
