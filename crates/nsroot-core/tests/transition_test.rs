//! End-to-end filesystem transitions.
//!
//! Every scenario runs in a forked child: the child is single-threaded, so
//! it may enter a fresh user namespace and own a mount namespace without
//! privileges. The scenario reports through the child's exit code. Hosts
//! that do not allow unprivileged user namespaces skip these tests.

#![cfg(target_os = "linux")]
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::print_stderr,
    unsafe_code
)]

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use nix::mount::{MsFlags, mount};
use nix::sched::CloneFlags;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, fork};
use nsroot_common::config::TransitionConfig;
use nsroot_common::error::NsRootError;
use nsroot_core::filesystem::mount::{apply_mount, stage_content};
use nsroot_core::filesystem::mount_point::{MountRequest, MountTable};
use nsroot_core::namespace::{NamespaceConfig, enter_namespaces};
use nsroot_core::process::{exit_status_to_result, spawn_with_shared_fs, wait_for_exit};
use nsroot_core::transition::NamespaceSetup;

const SMALL_STAGING: u64 = 1024 * 1024;

type Check = Result<(), String>;

fn fork_and_wait<F: FnOnce() -> Check>(scenario: F) -> i32 {
    // SAFETY: the child runs `scenario` and leaves through `_exit` without
    // returning into the test harness.
    match unsafe { fork() }.expect("fork") {
        ForkResult::Child => {
            let code = match scenario() {
                Ok(()) => 0,
                Err(msg) => {
                    eprintln!("scenario failed: {msg}");
                    1
                }
            };
            // SAFETY: `_exit` never returns and skips the parent's destructors.
            unsafe { libc::_exit(code) }
        }
        ForkResult::Parent { child } => match waitpid(child, None).expect("waitpid") {
            WaitStatus::Exited(_, code) => code,
            other => panic!("scenario child ended with {other:?}"),
        },
    }
}

fn sandbox_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(|| {
        let staging = tempfile::tempdir().expect("tempdir");
        fork_and_wait(|| {
            enter_namespaces(&NamespaceConfig::rootless()).map_err(|e| e.to_string())?;
            setup(staging.path(), Vec::new())?
                .perform_transition()
                .map_err(|e| e.to_string())
        }) == 0
    })
}

/// Runs `scenario` in a child that has entered fresh user and mount
/// namespaces.
fn isolated<F: FnOnce() -> Check>(scenario: F) {
    if !sandbox_available() {
        eprintln!("skipping: unprivileged user and mount namespaces are unavailable");
        return;
    }
    let code = fork_and_wait(|| {
        enter_namespaces(&NamespaceConfig::rootless()).map_err(|e| e.to_string())?;
        scenario()
    });
    assert_eq!(code, 0, "scenario failed, see stderr");
}

fn config(staging: &Path) -> TransitionConfig {
    TransitionConfig {
        staging_dir: staging.to_path_buf(),
        ..TransitionConfig::default()
    }
}

fn setup(staging: &Path, requests: Vec<MountRequest>) -> Result<NamespaceSetup, String> {
    let mut setup = NamespaceSetup::from_config(config(staging)).map_err(|e| e.to_string())?;
    for request in requests {
        setup.register_mount(request).map_err(|e| e.to_string())?;
    }
    Ok(setup)
}

fn check(condition: bool, what: &str) -> Check {
    if condition { Ok(()) } else { Err(what.to_string()) }
}

/// A path on another device than `/` has a filesystem mounted on it.
fn is_mount_point(path: &str) -> Result<bool, String> {
    let dev = |p: &str| std::fs::metadata(p).map(|m| m.dev()).map_err(|e| format!("{p}: {e}"));
    Ok(dev(path)? != dev("/")?)
}

fn path_str(path: &Path) -> String {
    path.to_str().expect("utf-8 temp path").to_string()
}

#[test]
fn inline_content_reads_back_exactly() {
    let staging = tempfile::tempdir().unwrap();
    let content = b"line one\n\x00\x01\xfe\xff binary tail".to_vec();
    let expected = content.clone();
    isolated(|| {
        setup(
            staging.path(),
            vec![MountRequest::content("/etc/greeting", content).read_only()],
        )?
        .perform_transition()
        .map_err(|e| e.to_string())?;
        let read = std::fs::read("/etc/greeting").map_err(|e| e.to_string())?;
        check(read == expected, "inline content differs")?;
        check(
            std::fs::write("/etc/greeting", b"x").is_err(),
            "read-only inline content accepted a write",
        )
    });
}

#[test]
fn read_only_flag_blocks_writes_only_where_requested() {
    let staging = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    std::fs::write(data.path().join("seed"), b"seed").unwrap();
    let data_path = path_str(data.path());
    isolated(|| {
        setup(
            staging.path(),
            vec![
                MountRequest::bind(data_path.clone(), "/ro").read_only(),
                MountRequest::bind(data_path.clone(), "/rw"),
            ],
        )?
        .perform_transition()
        .map_err(|e| e.to_string())?;
        check(Path::new("/ro/seed").is_file(), "/ro/seed missing")?;
        check(
            std::fs::write("/ro/blocked", b"x").is_err(),
            "write to read-only bind succeeded",
        )?;
        std::fs::write("/rw/allowed", b"x").map_err(|e| format!("write to /rw failed: {e}"))
    });
    assert!(data.path().join("allowed").is_file() || !sandbox_available());
    assert!(!data.path().join("blocked").exists());
}

#[test]
fn mandatory_failure_aborts_before_pivot() {
    let staging = tempfile::tempdir().unwrap();
    let marker = tempfile::NamedTempFile::new().unwrap();
    let marker_path = marker.path().to_path_buf();
    isolated(|| {
        let result = setup(
            staging.path(),
            vec![
                MountRequest::tmpfs("/tmp").read_only(),
                MountRequest::bind("/nonexistent/nsroot/source", "/data"),
            ],
        )?
        .perform_transition();
        check(result.is_err(), "transition succeeded despite a mandatory failure")?;
        check(marker_path.exists(), "process left the host root")
    });
}

#[test]
fn best_effort_failure_leaves_target_unmounted() {
    let staging = tempfile::tempdir().unwrap();
    isolated(|| {
        setup(
            staging.path(),
            vec![
                MountRequest::bind("/nonexistent/nsroot/source", "/data").optional(),
                MountRequest::content("/etc/marker", "present"),
            ],
        )?
        .perform_transition()
        .map_err(|e| e.to_string())?;
        check(Path::new("/data").is_dir(), "/data target missing")?;
        let entries = std::fs::read_dir("/data").map_err(|e| e.to_string())?.count();
        check(entries == 0, "/data is not empty")?;
        check(!is_mount_point("/data")?, "/data is still a mount point")?;
        check(is_mount_point("/etc/marker")?, "/etc/marker is not a mount point")?;
        let marker = std::fs::read_to_string("/etc/marker").map_err(|e| e.to_string())?;
        check(marker == "present", "later mount missing")
    });
}

#[test]
fn nested_mount_lands_inside_earlier_one() {
    let staging = tempfile::tempdir().unwrap();
    isolated(|| {
        setup(
            staging.path(),
            vec![
                MountRequest::tmpfs("/srv"),
                MountRequest::content("/srv/app/config", "key=value\n"),
            ],
        )?
        .perform_transition()
        .map_err(|e| e.to_string())?;
        let text = std::fs::read_to_string("/srv/app/config").map_err(|e| e.to_string())?;
        check(text == "key=value\n", "nested file content differs")
    });
}

#[test]
fn env_prefixed_bind_source_is_resolved() {
    let staging = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    std::fs::write(data.path().join("payload"), b"from env").unwrap();
    let data_path = path_str(data.path());
    isolated(|| {
        // SAFETY: the forked child is single-threaded.
        unsafe { std::env::set_var("NSROOT_TEST_DATA", &data_path) };
        setup(
            staging.path(),
            vec![MountRequest::bind("", "/data").src_env("NSROOT_TEST_DATA")],
        )?
        .perform_transition()
        .map_err(|e| e.to_string())?;
        let text = std::fs::read_to_string("/data/payload").map_err(|e| e.to_string())?;
        check(text == "from env", "env-prefixed bind shows the wrong tree")
    });
}

#[test]
fn deferred_entry_switches_the_caller_root() {
    let staging = tempfile::tempdir().unwrap();
    isolated(|| {
        let mut config = config(staging.path());
        config.deferred_entry = true;
        let mut setup = NamespaceSetup::from_config(config).map_err(|e| e.to_string())?;
        setup
            .register_mount(MountRequest::content("/etc/deferred", "child did it"))
            .map_err(|e| e.to_string())?;
        setup.perform_transition().map_err(|e| e.to_string())?;
        let text = std::fs::read_to_string("/etc/deferred").map_err(|e| e.to_string())?;
        check(text == "child did it", "caller does not see the child's root")
    });
}

#[test]
fn deferred_failure_is_reported_to_the_caller() {
    let staging = tempfile::tempdir().unwrap();
    isolated(|| {
        let mut config = config(staging.path());
        config.deferred_entry = true;
        let mut setup = NamespaceSetup::from_config(config).map_err(|e| e.to_string())?;
        setup
            .register_mount(MountRequest::bind("/nonexistent/nsroot/source", "/data"))
            .map_err(|e| e.to_string())?;
        check(
            setup.perform_transition().is_err(),
            "failed child transition reported success",
        )
    });
}

#[test]
fn without_isolation_the_process_is_chrooted() {
    let jail = tempfile::tempdir().unwrap();
    std::fs::write(jail.path().join("inside-jail"), b"").unwrap();
    let jail_path = jail.path().to_path_buf();
    isolated(|| {
        let config = TransitionConfig {
            clone_newns: false,
            chroot: jail_path,
            ..TransitionConfig::default()
        };
        NamespaceSetup::from_config(config)
            .map_err(|e| e.to_string())?
            .perform_transition()
            .map_err(|e| e.to_string())?;
        check(Path::new("/inside-jail").exists(), "chroot did not take effect")
    });
}

#[test]
fn applying_twice_keeps_the_target_a_directory() {
    let root = tempfile::tempdir().unwrap();
    let root_path: PathBuf = root.path().to_path_buf();
    isolated(|| {
        let mut table = MountTable::new();
        table
            .register(MountRequest::tmpfs("/stacked"))
            .map_err(|e| e.to_string())?;
        let mpt = table.iter().next().ok_or("nothing registered")?;
        for _ in 0..2 {
            check(
                apply_mount(mpt, &root_path, &root_path).is_continue(),
                "tmpfs mount failed",
            )?;
            check(root_path.join("stacked").is_dir(), "target is no longer a directory")?;
        }
        Ok(())
    });
}

#[test]
fn oversized_best_effort_content_is_skipped() {
    let staging = tempfile::tempdir().unwrap();
    let oversized = vec![b'x'; usize::try_from(2 * SMALL_STAGING).unwrap()];
    isolated(|| {
        let mut config = config(staging.path());
        config.staging_size = SMALL_STAGING;
        let mut setup = NamespaceSetup::from_config(config).map_err(|e| e.to_string())?;
        for request in [
            MountRequest::content("/etc/huge", oversized).optional(),
            MountRequest::content("/etc/after", "still mounted"),
        ] {
            setup.register_mount(request).map_err(|e| e.to_string())?;
        }
        setup.perform_transition().map_err(|e| e.to_string())?;
        check(!is_mount_point("/etc/huge")?, "oversized content was mounted")?;
        let text = std::fs::read_to_string("/etc/after").map_err(|e| e.to_string())?;
        check(text == "still mounted", "mount after the failed write is missing")
    });
}

#[test]
fn oversized_mandatory_content_aborts_with_write_error() {
    let staging = tempfile::tempdir().unwrap();
    let oversized = vec![b'x'; usize::try_from(2 * SMALL_STAGING).unwrap()];
    isolated(|| {
        let mut config = config(staging.path());
        config.staging_size = SMALL_STAGING;
        let mut setup = NamespaceSetup::from_config(config).map_err(|e| e.to_string())?;
        setup
            .register_mount(MountRequest::content("/etc/huge", oversized))
            .map_err(|e| e.to_string())?;
        match setup.perform_transition() {
            Err(NsRootError::ContentWrite { source, .. }) => check(
                source.kind() == std::io::ErrorKind::StorageFull,
                "write failed for another reason than a full scratch",
            ),
            other => Err(format!("expected a content write failure, got {other:?}")),
        }
    });
}

#[test]
fn failed_content_write_leaves_scratch_empty() {
    let scratch = tempfile::tempdir().unwrap();
    let scratch_path = scratch.path().to_path_buf();
    isolated(|| {
        mount(
            None::<&str>,
            &scratch_path,
            Some("tmpfs"),
            MsFlags::empty(),
            Some("size=64k"),
        )
        .map_err(|e| format!("scratch tmpfs: {e}"))?;
        let content = vec![0_u8; 256 * 1024];
        match stage_content(&content, &scratch_path) {
            Err(NsRootError::ContentWrite { .. }) => {}
            Err(other) => return Err(format!("unexpected error: {other}")),
            Ok(_) => return Err("content larger than the scratch tmpfs was staged".into()),
        }
        let left = std::fs::read_dir(&scratch_path).map_err(|e| e.to_string())?.count();
        check(left == 0, "partial content file left in scratch")
    });
}

#[test]
fn shared_fs_child_moves_the_caller_working_directory() {
    let dir = tempfile::tempdir().unwrap();
    let target = std::fs::canonicalize(dir.path()).unwrap();
    let code = fork_and_wait(|| {
        let pid = spawn_with_shared_fs(CloneFlags::CLONE_FS, || {
            isize::from(nix::unistd::chdir(&target).is_err())
        })
        .map_err(|e| e.to_string())?;
        let status = wait_for_exit(pid).map_err(|e| e.to_string())?;
        exit_status_to_result(status).map_err(|e| e.to_string())?;
        let cwd = std::env::current_dir().map_err(|e| e.to_string())?;
        check(cwd == target, "working directory change was not shared")
    });
    assert_eq!(code, 0, "scenario failed, see stderr");
}
