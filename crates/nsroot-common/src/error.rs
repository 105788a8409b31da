//! Unified error types for the nsroot workspace.
//!
//! Kernel errors are carried as [`std::io::Error`] so that this crate stays
//! free of syscall bindings; the core crate converts `Errno` values on the
//! way in.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum NsRootError {
    /// A mount request referenced an environment variable that is not set.
    #[error("no such environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// Canonicalizing a bind source failed. Never fatal on its own.
    #[error("cannot resolve {path}: {source}")]
    PathResolution {
        /// Path that could not be resolved.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A mount target or one of its parents could not be created.
    #[error("cannot create {path}: {source}")]
    DirectoryCreation {
        /// Path that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Inline content could not be materialized into the scratch directory.
    #[error("cannot write inline content under {path}: {source}")]
    ContentWrite {
        /// Scratch directory the content was written to.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The initial `mount(2)` of a request failed.
    #[error("mount src:'{src}' dst:'{target}' flags:{flags} failed: {source}")]
    Mount {
        /// Effective mount source.
        src: String,
        /// Absolute mount target.
        target: PathBuf,
        /// Rendered mount flags.
        flags: String,
        /// Underlying kernel error.
        source: std::io::Error,
    },

    /// The read-only remount of a mount point failed.
    #[error("read-only remount of '{target}' failed ({reason}): {source}")]
    Remount {
        /// Mount point being remounted.
        target: PathBuf,
        /// Failing step, with the flags used when it is the remount itself.
        reason: String,
        /// Underlying kernel error.
        source: std::io::Error,
    },

    /// The staging area (new root or scratch tmpfs) could not be set up.
    #[error("staging setup failed at {path}: {source}")]
    StagingSetup {
        /// Staging path involved.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A step of the pivot sequence failed.
    #[error("pivot failed during {step}: {source}")]
    Pivot {
        /// Description of the failing step.
        step: String,
        /// Underlying kernel error.
        source: std::io::Error,
    },

    /// Namespaces could not be created for the calling process.
    #[error("cannot create namespaces {flags}: {source}")]
    Namespace {
        /// Requested clone flags.
        flags: String,
        /// Underlying kernel error.
        source: std::io::Error,
    },

    /// The child running a deferred transition did not succeed.
    #[error("child transition failed: {message}")]
    ChildTransition {
        /// Description of the child's outcome.
        message: String,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// An I/O operation outside the transition itself failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl NsRootError {
    /// Returns the underlying I/O error, if this variant carries one.
    pub fn io_source(&self) -> Option<&std::io::Error> {
        match self {
            Self::PathResolution { source, .. }
            | Self::DirectoryCreation { source, .. }
            | Self::ContentWrite { source, .. }
            | Self::Mount { source, .. }
            | Self::Remount { source, .. }
            | Self::StagingSetup { source, .. }
            | Self::Pivot { source, .. }
            | Self::Namespace { source, .. }
            | Self::Io { source, .. } => Some(source),
            Self::MissingEnvVar { .. }
            | Self::ChildTransition { .. }
            | Self::Config { .. }
            | Self::Serialization { .. } => None,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, NsRootError>;
