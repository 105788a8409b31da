//! Configuration model for a filesystem transition.
//!
//! The configuration is loaded from JSON and describes which mounts to
//! assemble and how the process enters its new root.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_STAGING_DIR, DEFAULT_STAGING_SIZE};
use crate::error::{NsRootError, Result};

/// Root configuration for one filesystem transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransitionConfig {
    /// Whether the transition builds a fresh root in a mount namespace.
    /// When false, the process is only chrooted into [`Self::chroot`].
    #[serde(default = "default_true")]
    pub clone_newns: bool,
    /// Run the transition inside a short-lived child sharing only the
    /// filesystem attributes with the caller.
    #[serde(default)]
    pub deferred_entry: bool,
    /// Static root used when mount-namespace isolation is off.
    #[serde(default = "default_root")]
    pub chroot: PathBuf,
    /// Working directory after the pivot.
    #[serde(default = "default_root")]
    pub cwd: PathBuf,
    /// Parent directory of the two staging directories.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
    /// Size cap, in bytes, of each staging tmpfs.
    #[serde(default = "default_staging_size")]
    pub staging_size: u64,
    /// Mount requests, in mount order.
    #[serde(default)]
    pub mounts: Vec<MountDescriptor>,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            clone_newns: true,
            deferred_entry: false,
            chroot: default_root(),
            cwd: default_root(),
            staging_dir: default_staging_dir(),
            staging_size: DEFAULT_STAGING_SIZE,
            mounts: Vec::new(),
        }
    }
}

impl TransitionConfig {
    /// Parses and validates a configuration from JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or a value is invalid.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses, and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not parse.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| NsRootError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_json_str(&text)
    }

    /// Checks values serde cannot constrain on its own.
    ///
    /// # Errors
    ///
    /// Returns [`NsRootError::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.staging_size == 0 {
            return Err(NsRootError::Config {
                message: "staging_size must be greater than zero".into(),
            });
        }
        if !self.cwd.is_absolute() {
            return Err(NsRootError::Config {
                message: format!("cwd must be absolute: {}", self.cwd.display()),
            });
        }
        Ok(())
    }
}

/// One mount request as written in a configuration file.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MountDescriptor {
    /// Mount source; omitted for pseudo filesystems.
    #[serde(default)]
    pub src: Option<String>,
    /// Destination relative to the new root.
    #[serde(default)]
    pub dst: String,
    /// Filesystem type, e.g. `tmpfs` or `proc`.
    #[serde(default)]
    pub fstype: Option<String>,
    /// Filesystem-specific option string.
    #[serde(default)]
    pub options: Option<String>,
    /// Bind-mount `src` onto `dst`.
    #[serde(default)]
    pub is_bind: bool,
    /// Leave the mount writable. Mounts are read-only unless set.
    #[serde(default)]
    pub rw: bool,
    /// Explicit directory/file choice for the target node.
    #[serde(default)]
    pub is_dir: Option<bool>,
    /// Whether a failure aborts the whole transition.
    #[serde(default = "default_true")]
    pub mandatory: bool,
    /// Add `MS_NOSUID`.
    #[serde(default)]
    pub nosuid: bool,
    /// Add `MS_NODEV`.
    #[serde(default)]
    pub nodev: bool,
    /// Add `MS_NOEXEC`.
    #[serde(default)]
    pub noexec: bool,
    /// Environment variable prefixed to `src`.
    #[serde(default)]
    pub src_env: Option<String>,
    /// Environment variable prefixed to `dst`.
    #[serde(default)]
    pub dst_env: Option<String>,
    /// Inline file content bind-mounted at `dst`.
    #[serde(default)]
    pub src_content: Option<String>,
    /// Extra symbolic mount flags such as `MS_NOATIME`.
    #[serde(default)]
    pub flags: Vec<String>,
}

const fn default_true() -> bool {
    true
}

fn default_root() -> PathBuf {
    PathBuf::from("/")
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STAGING_DIR)
}

const fn default_staging_size() -> u64 {
    DEFAULT_STAGING_SIZE
}
