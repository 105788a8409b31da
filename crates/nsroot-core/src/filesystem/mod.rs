//! Filesystem assembly for the new root.
//!
//! Provides the mount registry, the per-mount executor, the tmpfs staging
//! area, and the `pivot_root` sequence that switches into it.

pub mod mount;
pub mod mount_point;
pub mod pivot_root;
pub mod staging;
