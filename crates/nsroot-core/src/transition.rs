//! The filesystem transition: from the host root into the assembled one.
//!
//! An isolated transition moves through
//! `NotStarted -> StagingCreated -> MountsApplied -> Pivoted -> ReadOnlyApplied`,
//! and any failure ends in `Failed`. There is no way back: a failure after
//! staging leaves the mount namespace half-built, and a failure after the
//! pivot leaves it half-switched. Callers must abort rather than retry.

use std::fmt;
use std::path::Path;

use nix::sched::CloneFlags;
use nsroot_common::config::TransitionConfig;
use nsroot_common::error::Result;

use crate::filesystem::mount_point::{MountPoint, MountRequest, MountTable};
use crate::filesystem::staging::Staging;
use crate::filesystem::{mount, pivot_root};
use crate::outcome::Outcome;
use crate::process::{exit_status_to_result, spawn_with_shared_fs, wait_for_exit};

/// The kernel operations a transition is made of.
pub trait MountOps {
    /// Changes the working directory to the current root.
    ///
    /// # Errors
    ///
    /// Returns an error if `chdir(2)` fails.
    fn enter_host_root(&mut self) -> Result<()>;

    /// Creates and mounts both staging directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the staging area cannot be set up.
    fn create_staging(&mut self, staging: &Staging) -> Result<()>;

    /// Mounts one point below the staging root.
    fn apply_mount(&mut self, mpt: &MountPoint, staging: &Staging) -> Outcome;

    /// Lazily detaches the scratch directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the unmount fails.
    fn detach_scratch(&mut self, staging: &Staging) -> Result<()>;

    /// Pivots into `new_root`, drops the old root, and enters `cwd`.
    ///
    /// # Errors
    ///
    /// Returns an error naming the failing pivot step.
    fn pivot(&mut self, new_root: &Path, cwd: &Path) -> Result<()>;

    /// Remounts one point read-only if it asked for it.
    fn remount_read_only(&mut self, mpt: &MountPoint) -> Outcome;

    /// Chroots into `dir` without any namespace work.
    ///
    /// # Errors
    ///
    /// Returns an error if `chroot(2)` or `chdir(2)` fails.
    fn chroot(&mut self, dir: &Path) -> Result<()>;
}

/// [`MountOps`] backed by real system calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct KernelOps;

impl MountOps for KernelOps {
    fn enter_host_root(&mut self) -> Result<()> {
        pivot_root::enter_host_root()
    }

    fn create_staging(&mut self, staging: &Staging) -> Result<()> {
        staging.create()
    }

    fn apply_mount(&mut self, mpt: &MountPoint, staging: &Staging) -> Outcome {
        mount::apply_mount(mpt, staging.root(), staging.scratch())
    }

    fn detach_scratch(&mut self, staging: &Staging) -> Result<()> {
        staging.detach_scratch()
    }

    fn pivot(&mut self, new_root: &Path, cwd: &Path) -> Result<()> {
        pivot_root::pivot_into(new_root, cwd)
    }

    fn remount_read_only(&mut self, mpt: &MountPoint) -> Outcome {
        mount::remount_read_only(mpt)
    }

    fn chroot(&mut self, dir: &Path) -> Result<()> {
        pivot_root::chroot_into(dir)
    }
}

/// Progress of a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionState {
    /// Nothing has been done yet.
    NotStarted,
    /// Both staging tmpfs are mounted.
    StagingCreated,
    /// Every mount point has been applied or skipped.
    MountsApplied,
    /// The process runs in the new root.
    Pivoted,
    /// Read-only remounts are done. Terminal success.
    ReadOnlyApplied,
    /// Chrooted without mount-namespace isolation. Terminal success.
    Chrooted,
    /// A step failed. Terminal.
    Failed,
}

impl fmt::Display for TransitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not-started",
            Self::StagingCreated => "staging-created",
            Self::MountsApplied => "mounts-applied",
            Self::Pivoted => "pivoted",
            Self::ReadOnlyApplied => "read-only-applied",
            Self::Chrooted => "chrooted",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One run of the transition state machine in the calling process.
#[derive(Debug)]
pub struct Transition<'a, O> {
    config: &'a TransitionConfig,
    mounts: &'a MountTable,
    ops: O,
    state: TransitionState,
}

impl<'a, O: MountOps> Transition<'a, O> {
    /// Prepares a transition; nothing happens until [`Self::run`].
    pub const fn new(config: &'a TransitionConfig, mounts: &'a MountTable, ops: O) -> Self {
        Self {
            config,
            mounts,
            ops,
            state: TransitionState::NotStarted,
        }
    }

    /// Current state.
    pub const fn state(&self) -> TransitionState {
        self.state
    }

    /// The operations backend.
    pub const fn ops(&self) -> &O {
        &self.ops
    }

    /// Runs the transition to completion or to its first fatal failure.
    ///
    /// Without mount-namespace isolation this is only a chroot into the
    /// configured directory.
    ///
    /// # Errors
    ///
    /// Returns the error that moved the transition to
    /// [`TransitionState::Failed`].
    pub fn run(&mut self) -> Result<()> {
        if !self.config.clone_newns {
            let result = self.ops.chroot(&self.config.chroot);
            return self.advance(result, TransitionState::Chrooted);
        }

        let staging = Staging::new(&self.config.staging_dir, self.config.staging_size);

        let result = self
            .ops
            .enter_host_root()
            .and_then(|()| self.ops.create_staging(&staging));
        self.advance(result, TransitionState::StagingCreated)?;

        let result = self.apply_mounts(&staging);
        self.advance(result, TransitionState::MountsApplied)?;

        // The scratch tmpfs goes first: once pivoted it is out of reach.
        let result = self
            .ops
            .detach_scratch(&staging)
            .and_then(|()| self.ops.pivot(staging.root(), &self.config.cwd));
        self.advance(result, TransitionState::Pivoted)?;

        let result = self.remount_read_only();
        self.advance(result, TransitionState::ReadOnlyApplied)
    }

    fn apply_mounts(&mut self, staging: &Staging) -> Result<()> {
        let mounts = self.mounts;
        for mpt in mounts {
            if let Outcome::Abort(err) = self.ops.apply_mount(mpt, staging) {
                return Err(err);
            }
        }
        Ok(())
    }

    fn remount_read_only(&mut self) -> Result<()> {
        let mounts = self.mounts;
        for mpt in mounts {
            if let Outcome::Abort(err) = self.ops.remount_read_only(mpt) {
                return Err(err);
            }
        }
        Ok(())
    }

    fn advance(&mut self, result: Result<()>, next: TransitionState) -> Result<()> {
        match result {
            Ok(()) => {
                tracing::debug!(from = %self.state, to = %next, "transition advanced");
                self.state = next;
                Ok(())
            }
            Err(err) => {
                tracing::error!(state = %self.state, error = %err, "transition failed");
                self.state = TransitionState::Failed;
                Err(err)
            }
        }
    }
}

/// A transition configuration together with its registered mount points.
#[derive(Debug, Clone, Default)]
pub struct NamespaceSetup {
    config: TransitionConfig,
    mounts: MountTable,
}

impl NamespaceSetup {
    /// Validates `config` and registers its mount descriptors in order.
    ///
    /// # Errors
    ///
    /// Returns the first validation or registration error.
    pub fn from_config(config: TransitionConfig) -> Result<Self> {
        config.validate()?;
        let mounts = MountTable::from_descriptors(&config.mounts)?;
        Ok(Self { config, mounts })
    }

    /// Settings in effect.
    pub const fn config(&self) -> &TransitionConfig {
        &self.config
    }

    /// Registered mount points, in mount order.
    pub const fn mounts(&self) -> &MountTable {
        &self.mounts
    }

    /// Registers one more mount point after those already registered.
    ///
    /// # Errors
    ///
    /// Returns the registration error; the table is left unchanged.
    pub fn register_mount(&mut self, request: MountRequest) -> Result<()> {
        self.mounts.register(request)
    }

    /// Switches the calling process into its new root.
    ///
    /// Call once, right before the sandboxed payload is executed. With
    /// deferred entry, the work happens in a child cloned with `CLONE_FS`,
    /// so that a PID namespace unshared by the caller is already in effect
    /// for mounts such as `/proc`; the shared root and working directory
    /// carry the result back to the caller.
    ///
    /// # Errors
    ///
    /// Returns the fatal error of the transition, or
    /// [`nsroot_common::error::NsRootError::ChildTransition`] if the
    /// deferred child did not exit with status zero.
    pub fn perform_transition(&self) -> Result<()> {
        if self.config.deferred_entry {
            return self.perform_in_child();
        }
        self.perform_here()
    }

    fn perform_here(&self) -> Result<()> {
        Transition::new(&self.config, &self.mounts, KernelOps).run()?;
        tracing::info!(mounts = self.mounts.len(), "filesystem transition complete");
        Ok(())
    }

    fn perform_in_child(&self) -> Result<()> {
        let pid = spawn_with_shared_fs(CloneFlags::CLONE_FS, || match self.perform_here() {
            Ok(()) => 0,
            Err(e) => {
                tracing::error!(error = %e, "deferred transition failed");
                1
            }
        })?;
        exit_status_to_result(wait_for_exit(pid)?)
    }
}
