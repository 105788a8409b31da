//! Executes one mount point against the staging root.
//!
//! Mounts are always established read-write first. Read-only is applied in
//! a separate pass after the pivot, because a bind mount ignores
//! `MS_RDONLY` on creation and because the remount has to carry the flags
//! the kernel already enforces on the underlying filesystem.

use std::fs::{DirBuilder, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::mount::{MsFlags, mount};
use nix::sys::statvfs::{FsFlags, statvfs};
use nsroot_common::constants::{NO_SOURCE, TARGET_DIR_MODE, TARGET_FILE_MODE};
use nsroot_common::error::{NsRootError, Result};
use tempfile::NamedTempFile;

use crate::filesystem::mount_point::MountPoint;
use crate::flags::describe;
use crate::outcome::Outcome;

/// Per-mount flags reported by `statvfs(3)` and their `mount(2)` names.
///
/// Relative atime needs no entry: the kernel applies it whenever neither
/// `MS_NOATIME` nor `MS_STRICTATIME` is given.
const STATVFS_TO_MOUNT: [(FsFlags, MsFlags); 7] = [
    (FsFlags::ST_RDONLY, MsFlags::MS_RDONLY),
    (FsFlags::ST_NOSUID, MsFlags::MS_NOSUID),
    (FsFlags::ST_NODEV, MsFlags::MS_NODEV),
    (FsFlags::ST_NOEXEC, MsFlags::MS_NOEXEC),
    (FsFlags::ST_SYNCHRONOUS, MsFlags::MS_SYNCHRONOUS),
    (FsFlags::ST_NOATIME, MsFlags::MS_NOATIME),
    (FsFlags::ST_NODIRATIME, MsFlags::MS_NODIRATIME),
];

/// Mounts `mpt` below `new_root`, staging inline content in `scratch`.
///
/// The destination node is created first (a directory or an empty file);
/// an existing node is reused. Mounting the same point twice stacks a
/// second mount, as the kernel does.
pub fn apply_mount(mpt: &MountPoint, new_root: &Path, scratch: &Path) -> Outcome {
    tracing::debug!(mount = %mpt, "mounting");
    Outcome::settle(mpt, mount_point(mpt, new_root, scratch))
}

fn mount_point(mpt: &MountPoint, new_root: &Path, scratch: &Path) -> Result<()> {
    let dst = prepare_target(mpt, new_root)?;

    let staged = match &mpt.content {
        Some(content) => Some(stage_content(content, scratch)?),
        None => None,
    };
    let (src, flags) = match &staged {
        Some(file) => (
            file.path().to_string_lossy().into_owned(),
            mpt.flags | MsFlags::MS_BIND | MsFlags::MS_REC,
        ),
        None => (
            mpt.src.clone().unwrap_or_else(|| NO_SOURCE.to_string()),
            mpt.flags,
        ),
    };
    let flags = flags.difference(MsFlags::MS_RDONLY);

    let result = mount(
        Some(src.as_str()),
        &dst,
        mpt.fs_type.as_deref(),
        flags,
        mpt.options.as_deref(),
    );

    // The bind mount keeps its own reference to the staged file.
    if let Some(file) = staged {
        let path = file.path().to_path_buf();
        if let Err(e) = file.close() {
            tracing::warn!(path = %path.display(), error = %e, "unlink of staged content failed");
        }
    }

    result.map_err(|errno| NsRootError::Mount {
        src,
        target: dst,
        flags: describe(flags),
        source: errno.into(),
    })
}

/// Creates the mount target for `mpt` below `new_root` and returns its path.
///
/// Parent directories are created as needed. An already existing target is
/// kept as is; any other failure to create the node itself is only logged,
/// since the mount that follows reports the real problem.
///
/// # Errors
///
/// Returns [`NsRootError::DirectoryCreation`] if the parents cannot be
/// created.
pub fn prepare_target(mpt: &MountPoint, new_root: &Path) -> Result<PathBuf> {
    let dst = mpt.target_in(new_root);
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent).map_err(|e| NsRootError::DirectoryCreation {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let created = if mpt.is_dir {
        DirBuilder::new().mode(TARGET_DIR_MODE).create(&dst)
    } else {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .mode(TARGET_FILE_MODE)
            .open(&dst)
            .map(drop)
    };
    match created {
        Err(e) if e.kind() != ErrorKind::AlreadyExists => {
            tracing::warn!(path = %dst.display(), is_dir = mpt.is_dir, error = %e, "cannot create mount target");
        }
        _ => {}
    }
    Ok(dst)
}

/// Writes `content` to a uniquely named file in `scratch`.
///
/// The file is removed when the returned handle is dropped, including when
/// writing fails half-way.
///
/// # Errors
///
/// Returns [`NsRootError::ContentWrite`] if the file cannot be created or
/// fully written.
pub fn stage_content(content: &[u8], scratch: &Path) -> Result<NamedTempFile> {
    let to_error = |e| NsRootError::ContentWrite {
        path: scratch.to_path_buf(),
        source: e,
    };
    let mut file = tempfile::Builder::new()
        .prefix("file.")
        .tempfile_in(scratch)
        .map_err(to_error)?;
    file.write_all(content).map_err(to_error)?;
    file.flush().map_err(to_error)?;
    tracing::debug!(path = %file.path().display(), len = content.len(), "staged inline content");
    Ok(file)
}

/// Remounts `mpt` read-only if it asked for it.
///
/// Must run after the pivot: the destination is resolved against the new
/// root.
pub fn remount_read_only(mpt: &MountPoint) -> Outcome {
    if !mpt.is_read_only() {
        return Outcome::Continue;
    }
    Outcome::settle(mpt, remount(mpt))
}

fn remount(mpt: &MountPoint) -> Result<()> {
    let dst = mpt.absolute_dst();
    let vfs = loop {
        match statvfs(&dst) {
            Err(Errno::EINTR) => {}
            other => break other,
        }
    }
    .map_err(|errno| NsRootError::Remount {
        target: dst.clone(),
        reason: "statvfs".into(),
        source: errno.into(),
    })?;

    let current = mount_flags_of(vfs.flags());
    let mut new_flags = MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY | current;
    if mpt.is_bind() {
        new_flags |= MsFlags::MS_BIND;
    }

    tracing::debug!(
        dst = %dst.display(),
        old_flags = %describe(current),
        new_flags = %describe(new_flags),
        "re-mounting read-only"
    );

    mount(
        None::<&str>,
        &dst,
        None::<&str>,
        new_flags,
        None::<&str>,
    )
    .map_err(|errno| NsRootError::Remount {
        target: dst,
        reason: format!("flags:{}", describe(new_flags)),
        source: errno.into(),
    })
}

/// Translates `statvfs` flags into the mount flags that preserve them.
pub fn mount_flags_of(vfs: FsFlags) -> MsFlags {
    STATVFS_TO_MOUNT
        .iter()
        .filter(|(st, _)| vfs.contains(*st))
        .fold(MsFlags::empty(), |acc, (_, ms)| acc | *ms)
}
