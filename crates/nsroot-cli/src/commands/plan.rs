//! `nsroot plan`: show what a transition would mount, without mounting.

use std::path::PathBuf;

use clap::Args;
use nsroot_core::filesystem::staging::Staging;
use nsroot_core::transition::NamespaceSetup;

/// Arguments for the `plan` command.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Path to the JSON transition config.
    pub config: PathBuf,
}

/// Executes the `plan` command.
///
/// # Errors
///
/// Returns an error if the config cannot be loaded or a mount point
/// cannot be registered.
pub fn execute(args: &PlanArgs) -> anyhow::Result<()> {
    let setup = super::load_setup(&args.config)?;
    println!("Transition plan for: {}", args.config.display());
    println!();
    for line in render(&setup) {
        println!("{line}");
    }
    Ok(())
}

/// Renders the isolation mode followed by every mount point in order.
fn render(setup: &NamespaceSetup) -> Vec<String> {
    let config = setup.config();
    let mut lines = Vec::with_capacity(setup.mounts().len() + 4);
    if config.clone_newns {
        let staging = Staging::new(&config.staging_dir, config.staging_size);
        lines.push(format!(
            "  mode: pivot_root into {} (tmpfs {})",
            staging.root().display(),
            staging.tmpfs_options()
        ));
        if config.deferred_entry {
            lines.push("  entry: deferred to a CLONE_FS child".to_string());
        }
    } else {
        lines.push(format!("  mode: chroot into {}", config.chroot.display()));
        return lines;
    }
    for (i, mpt) in setup.mounts().iter().enumerate() {
        lines.push(format!("  {}. {mpt}", i + 1));
    }
    let read_only = setup.mounts().iter().filter(|m| m.is_read_only()).count();
    lines.push(format!(
        "  {} mount point(s), {read_only} remounted read-only.",
        setup.mounts().len()
    ));
    lines
}
