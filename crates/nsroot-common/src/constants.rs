//! System-wide constants and default paths.

/// Default parent directory for the staging area.
pub const DEFAULT_STAGING_DIR: &str = "/tmp";

/// Name of the directory that becomes the new root after the pivot.
pub const STAGING_ROOT_NAME: &str = "nsroot.root";

/// Name of the scratch directory holding inline-content files.
pub const STAGING_SCRATCH_NAME: &str = "nsroot.tmp";

/// Size cap of each staging tmpfs, in bytes (16 MiB).
pub const DEFAULT_STAGING_SIZE: u64 = 16 * 1024 * 1024;

/// Mode of the staging directories created on the host.
pub const STAGING_DIR_MODE: u32 = 0o755;

/// Mode of directory mount targets created inside the new root.
pub const TARGET_DIR_MODE: u32 = 0o711;

/// Mode of file mount targets created inside the new root.
pub const TARGET_FILE_MODE: u32 = 0o644;

/// Upper bound on the length of a rendered flag string.
pub const FLAGS_TEXT_MAX: usize = 1024;

/// Placeholder source used when a mount request names none.
pub const NO_SOURCE: &str = "none";

/// Application name used in CLI output.
pub const APP_NAME: &str = "nsroot";
