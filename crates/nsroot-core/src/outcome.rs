//! Mandatory versus best-effort failure policy.
//!
//! Every per-mount step reports a plain [`Result`]; [`Outcome::settle`]
//! is the one place that decides, from the mount point's `mandatory`
//! attribute, whether a failure is absorbed or ends the transition.

use std::io::ErrorKind;

use nsroot_common::error::{NsRootError, Result};

use crate::filesystem::mount_point::MountPoint;

/// Result of one executor step, as seen by the transition.
#[derive(Debug)]
pub enum Outcome {
    /// The step succeeded, or failed on a best-effort mount point.
    Continue,
    /// The step failed on a mandatory mount point.
    Abort(NsRootError),
}

impl Outcome {
    /// Applies the mount point's failure policy to a step result.
    ///
    /// Absorbed failures are logged at debug level, escalated ones at error
    /// level. A permission error on a mount source gets a hint about
    /// search permission on its ancestors.
    pub fn settle(mpt: &MountPoint, result: Result<()>) -> Self {
        let Err(err) = result else {
            return Self::Continue;
        };
        if !mpt.mandatory {
            tracing::debug!(mount = %mpt, error = %err, "best-effort mount step failed, skipping");
            return Self::Continue;
        }
        match &err {
            NsRootError::Mount { src, source, .. } if source.kind() == ErrorKind::PermissionDenied => {
                tracing::error!(
                    mount = %mpt,
                    error = %err,
                    "try fixing this problem by applying 'chmod o+x' to '{src}' and its ancestors"
                );
            }
            _ => tracing::error!(mount = %mpt, error = %err, "mandatory mount step failed"),
        }
        Self::Abort(err)
    }

    /// Returns `true` if the transition may proceed.
    pub const fn is_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }
}
