//! `nsroot apply`: enter new namespaces and switch into the assembled root.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use nsroot_core::namespace::{NamespaceConfig, enter_namespaces};

/// Arguments for the `apply` command.
#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Path to the JSON transition config.
    pub config: PathBuf,

    /// Create a user namespace too, so no privileges are required.
    #[arg(long)]
    pub rootless: bool,
}

/// Executes the `apply` command.
///
/// The namespaces belong to this process only, so the new root disappears
/// when it exits. The resulting root directory is listed as a check.
///
/// # Errors
///
/// Returns an error if the config is invalid, a namespace cannot be
/// created, or a mandatory step of the transition fails.
pub fn execute(args: &ApplyArgs) -> anyhow::Result<()> {
    let setup = super::load_setup(&args.config)?;
    let namespaces = NamespaceConfig {
        user: args.rootless,
        mount: setup.config().clone_newns,
    };
    enter_namespaces(&namespaces).context("failed to create namespaces")?;
    setup
        .perform_transition()
        .context("filesystem transition failed")?;

    println!("Root of {}:", args.config.display());
    for name in list_dir(Path::new("/"))? {
        println!("  /{name}");
    }
    Ok(())
}

/// Sorted entry names of `dir`.
fn list_dir(dir: &Path) -> anyhow::Result<Vec<String>> {
    let mut names = std::fs::read_dir(dir)
        .with_context(|| format!("failed to list {}", dir.display()))?
        .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<Result<Vec<_>, _>>()?;
    names.sort_unstable();
    Ok(names)
}
