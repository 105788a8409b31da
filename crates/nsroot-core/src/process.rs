//! Child processes that share filesystem attributes with their parent.
//!
//! A deferred transition runs inside a child cloned with `CLONE_FS`, so the
//! root and working directory it switches to become the parent's as well.

use nix::errno::Errno;
use nix::sched::{CloneFlags, clone};
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;
use nsroot_common::error::{NsRootError, Result};

const CHILD_STACK_SIZE: usize = 1024 * 1024;

/// Clones a child with `flags` that runs `child` and exits with its return
/// value. The parent is notified with `SIGCHLD`.
///
/// # Errors
///
/// Returns [`NsRootError::ChildTransition`] if `clone(2)` fails.
pub fn spawn_with_shared_fs<'a, F>(flags: CloneFlags, child: F) -> Result<Pid>
where
    F: FnMut() -> isize + 'a,
{
    let mut stack = vec![0_u8; CHILD_STACK_SIZE];
    // SAFETY: without CLONE_VM the child runs on a private copy of the
    // address space, so `stack` and everything `child` borrows stay valid
    // for the child's whole lifetime.
    #[allow(unsafe_code)]
    let pid = unsafe { clone(Box::new(child), &mut stack, flags, Some(Signal::SIGCHLD as i32)) }
        .map_err(|errno| NsRootError::ChildTransition {
            message: format!("clone({flags:?}) failed: {errno}"),
        })?;
    tracing::debug!(pid = pid.as_raw(), ?flags, "spawned child");
    Ok(pid)
}

/// Blocks until `pid` exits or is killed, retrying only on `EINTR`.
///
/// # Errors
///
/// Returns [`NsRootError::ChildTransition`] if `waitpid(2)` fails.
pub fn wait_for_exit(pid: Pid) -> Result<WaitStatus> {
    loop {
        match waitpid(pid, None) {
            Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => return Ok(status),
            Ok(_) | Err(Errno::EINTR) => {}
            Err(errno) => {
                return Err(NsRootError::ChildTransition {
                    message: format!("waitpid({pid}) failed: {errno}"),
                });
            }
        }
    }
}

/// Maps a child's final status to success only for a zero exit code.
///
/// # Errors
///
/// Returns [`NsRootError::ChildTransition`] describing any other status.
pub fn exit_status_to_result(status: WaitStatus) -> Result<()> {
    match status {
        WaitStatus::Exited(_, 0) => Ok(()),
        WaitStatus::Exited(pid, code) => Err(NsRootError::ChildTransition {
            message: format!("child {pid} exited with status {code}"),
        }),
        WaitStatus::Signaled(pid, signal, _) => Err(NsRootError::ChildTransition {
            message: format!("child {pid} killed by {signal}"),
        }),
        other => Err(NsRootError::ChildTransition {
            message: format!("unexpected child status {other:?}"),
        }),
    }
}
