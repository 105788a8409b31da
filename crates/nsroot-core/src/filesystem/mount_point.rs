//! Mount requests and the ordered table they are registered into.
//!
//! Registration normalizes a [`MountRequest`]: environment-variable
//! prefixes are expanded, bind sources are canonicalized when possible,
//! and the target node type (directory or file) is decided once, so that
//! the executor never has to guess.

use std::fmt;
use std::path::{Path, PathBuf};

use nix::mount::MsFlags;
use nsroot_common::config::MountDescriptor;
use nsroot_common::error::{NsRootError, Result};

use crate::flags::{describe, parse_flag_names};

/// A normalized mount request, ready to be executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    /// Mount source; `None` for pseudo filesystems.
    pub src: Option<String>,
    /// Destination relative to the new root.
    pub dst: String,
    /// Filesystem type; `None` for bind mounts.
    pub fs_type: Option<String>,
    /// Filesystem-specific options.
    pub options: Option<String>,
    /// Requested mount flags, including `MS_RDONLY` for the second pass.
    pub flags: MsFlags,
    /// Create the target as a directory (`true`) or a regular file.
    pub is_dir: bool,
    /// Whether a failure aborts the transition.
    pub mandatory: bool,
    /// Inline file content bind-mounted in place of `src`.
    pub content: Option<Vec<u8>>,
}

impl MountPoint {
    /// Returns `true` if the mount is remounted read-only after the pivot.
    pub const fn is_read_only(&self) -> bool {
        self.flags.contains(MsFlags::MS_RDONLY)
    }

    /// Returns `true` for bind mounts, including inline-content mounts.
    pub const fn is_bind(&self) -> bool {
        self.flags.contains(MsFlags::MS_BIND)
    }

    /// Destination below `root`.
    pub fn target_in(&self, root: &Path) -> PathBuf {
        root.join(self.dst.trim_start_matches('/'))
    }

    /// Destination as seen from the new root, once pivoted.
    pub fn absolute_dst(&self) -> PathBuf {
        self.target_in(Path::new("/"))
    }
}

impl fmt::Display for MountPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "src:'{}' dst:'{}' type:'{}' flags:{} options:'{}' isDir:{}",
            self.src.as_deref().unwrap_or("[NULL]"),
            self.dst,
            self.fs_type.as_deref().unwrap_or("[NULL]"),
            describe(self.flags),
            self.options.as_deref().unwrap_or("[NULL]"),
            self.is_dir,
        )?;
        if !self.mandatory {
            write!(f, " mandatory:false")?;
        }
        if let Some(content) = &self.content {
            write!(f, " src_content_len:{}", content.len())?;
        }
        Ok(())
    }
}

/// Builder for one mount request.
#[derive(Debug, Clone)]
pub struct MountRequest {
    src: Option<String>,
    dst: String,
    fs_type: Option<String>,
    options: Option<String>,
    flags: MsFlags,
    is_dir: Option<bool>,
    mandatory: bool,
    src_env: Option<String>,
    dst_env: Option<String>,
    content: Option<Vec<u8>>,
}

impl MountRequest {
    /// Creates a mandatory request for `dst` with no source and no flags.
    #[must_use]
    pub fn new(dst: impl Into<String>) -> Self {
        Self {
            src: None,
            dst: dst.into(),
            fs_type: None,
            options: None,
            flags: MsFlags::empty(),
            is_dir: None,
            mandatory: true,
            src_env: None,
            dst_env: None,
            content: None,
        }
    }

    /// Recursive bind mount of `src` onto `dst`.
    #[must_use]
    pub fn bind(src: impl Into<String>, dst: impl Into<String>) -> Self {
        Self::new(dst)
            .source(src)
            .flags(MsFlags::MS_BIND | MsFlags::MS_REC)
    }

    /// Fresh tmpfs at `dst`.
    #[must_use]
    pub fn tmpfs(dst: impl Into<String>) -> Self {
        Self::new(dst).fs_type("tmpfs")
    }

    /// Fresh procfs at `dst`.
    #[must_use]
    pub fn proc(dst: impl Into<String>) -> Self {
        Self::new(dst).fs_type("proc")
    }

    /// File at `dst` holding `content`.
    #[must_use]
    pub fn content(dst: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        let mut request = Self::new(dst);
        request.content = Some(content.into());
        request
    }

    /// Sets the mount source.
    #[must_use]
    pub fn source(mut self, src: impl Into<String>) -> Self {
        self.src = Some(src.into());
        self
    }

    /// Sets the filesystem type.
    #[must_use]
    pub fn fs_type(mut self, fs_type: impl Into<String>) -> Self {
        self.fs_type = Some(fs_type.into());
        self
    }

    /// Sets the filesystem-specific option string.
    #[must_use]
    pub fn options(mut self, options: impl Into<String>) -> Self {
        self.options = Some(options.into());
        self
    }

    /// Adds mount flags.
    #[must_use]
    pub fn flags(mut self, flags: MsFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Requests a read-only remount after the pivot.
    #[must_use]
    pub fn read_only(self) -> Self {
        self.flags(MsFlags::MS_RDONLY)
    }

    /// Sets whether a failure aborts the transition.
    #[must_use]
    pub const fn mandatory(mut self, mandatory: bool) -> Self {
        self.mandatory = mandatory;
        self
    }

    /// Makes failures of this request non-fatal.
    #[must_use]
    pub const fn optional(self) -> Self {
        self.mandatory(false)
    }

    /// Overrides the inferred target node type.
    #[must_use]
    pub const fn is_dir(mut self, is_dir: bool) -> Self {
        self.is_dir = Some(is_dir);
        self
    }

    /// Prefixes the source with the value of environment variable `name`.
    #[must_use]
    pub fn src_env(mut self, name: impl Into<String>) -> Self {
        self.src_env = Some(name.into());
        self
    }

    /// Prefixes the destination with the value of environment variable `name`.
    #[must_use]
    pub fn dst_env(mut self, name: impl Into<String>) -> Self {
        self.dst_env = Some(name.into());
        self
    }

    /// Converts a configuration-file descriptor into a request.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor names an unknown flag.
    pub fn from_descriptor(desc: &MountDescriptor) -> Result<Self> {
        let mut flags = parse_flag_names(&desc.flags)?;
        if desc.is_bind {
            flags |= MsFlags::MS_BIND | MsFlags::MS_REC;
        }
        if !desc.rw {
            flags |= MsFlags::MS_RDONLY;
        }
        if desc.nosuid {
            flags |= MsFlags::MS_NOSUID;
        }
        if desc.nodev {
            flags |= MsFlags::MS_NODEV;
        }
        if desc.noexec {
            flags |= MsFlags::MS_NOEXEC;
        }
        Ok(Self {
            src: desc.src.clone(),
            dst: desc.dst.clone(),
            fs_type: desc.fstype.clone(),
            options: desc.options.clone(),
            flags,
            is_dir: desc.is_dir,
            mandatory: desc.mandatory,
            src_env: desc.src_env.clone(),
            dst_env: desc.dst_env.clone(),
            content: desc.src_content.clone().map(String::into_bytes),
        })
    }
}

/// Ordered sequence of mount points; insertion order is mount order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountTable {
    points: Vec<MountPoint>,
}

impl MountTable {
    /// Creates an empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self { points: Vec::new() }
    }

    /// Registers every descriptor in order.
    ///
    /// # Errors
    ///
    /// Returns the first registration error.
    pub fn from_descriptors(descriptors: &[MountDescriptor]) -> Result<Self> {
        let mut table = Self::new();
        for desc in descriptors {
            table.register(MountRequest::from_descriptor(desc)?)?;
        }
        Ok(table)
    }

    /// Registers a request, reading environment variables from the process.
    ///
    /// # Errors
    ///
    /// See [`Self::register_with_env`].
    pub fn register(&mut self, request: MountRequest) -> Result<()> {
        self.register_with_env(request, |name| std::env::var(name).ok())
    }

    /// Normalizes `request` and appends it to the table.
    ///
    /// `lookup` resolves environment variable names. Canonicalization of a
    /// bind source is best-effort: on failure the source is kept as given.
    ///
    /// # Errors
    ///
    /// Returns [`NsRootError::MissingEnvVar`] if a referenced variable is not
    /// set, or [`NsRootError::Config`] if the destination ends up empty.
    pub fn register_with_env<F>(&mut self, request: MountRequest, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let src = expand(request.src_env.as_deref(), request.src, &lookup)?
            .filter(|src| !src.is_empty());
        let dst = expand(request.dst_env.as_deref(), Some(request.dst), &lookup)?
            .unwrap_or_default();
        if dst.is_empty() {
            return Err(NsRootError::Config {
                message: "mount destination is empty".into(),
            });
        }

        let bind = request.flags.contains(MsFlags::MS_BIND);
        let src = match src {
            Some(src) if bind => Some(canonicalize(src, request.mandatory)),
            other => other,
        };

        let is_dir = request
            .is_dir
            .unwrap_or_else(|| infer_is_dir(src.as_deref(), request.content.is_some(), bind));

        let mut flags = request.flags;
        if request.content.is_some() {
            flags |= MsFlags::MS_BIND | MsFlags::MS_REC;
        }

        let mpt = MountPoint {
            src,
            dst,
            fs_type: request.fs_type,
            options: request.options,
            flags,
            is_dir,
            mandatory: request.mandatory,
            content: request.content,
        };
        tracing::debug!(mount = %mpt, "registered mount point");
        self.points.push(mpt);
        Ok(())
    }

    /// Iterates the mount points in mount order.
    pub fn iter(&self) -> std::slice::Iter<'_, MountPoint> {
        self.points.iter()
    }

    /// Number of registered mount points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl<'a> IntoIterator for &'a MountTable {
    type Item = &'a MountPoint;
    type IntoIter = std::slice::Iter<'a, MountPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn expand<F>(env: Option<&str>, suffix: Option<String>, lookup: &F) -> Result<Option<String>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(name) = env else {
        return Ok(suffix);
    };
    let Some(prefix) = lookup(name) else {
        tracing::warn!(name, "no such environment variable");
        return Err(NsRootError::MissingEnvVar { name: name.into() });
    };
    Ok(Some(prefix + suffix.as_deref().unwrap_or_default()))
}

fn canonicalize(src: String, mandatory: bool) -> String {
    match std::fs::canonicalize(&src) {
        Ok(resolved) => resolved.into_os_string().into_string().unwrap_or(src),
        Err(e) => {
            let err = NsRootError::PathResolution {
                path: PathBuf::from(&src),
                source: e,
            };
            if mandatory {
                tracing::warn!(error = %err, "keeping unresolved bind source");
            } else {
                tracing::debug!(error = %err, "keeping unresolved bind source");
            }
            src
        }
    }
}

/// Inline content is a file; no source is a directory; a bind source that
/// exists dictates its own type; anything else is a directory.
fn infer_is_dir(src: Option<&str>, has_content: bool, bind: bool) -> bool {
    if has_content {
        return false;
    }
    match src {
        None => true,
        Some(src) if bind && Path::new(src).exists() => {
            crate::flags::is_directory_hint(Some(Path::new(src)))
        }
        Some(_) => true,
    }
}
