//! CLI command definitions and dispatch.

pub mod apply;
pub mod plan;

use std::path::Path;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use nsroot_common::config::TransitionConfig;
use nsroot_core::transition::NamespaceSetup;

/// nsroot: assemble a sandbox root and pivot into it.
#[derive(Parser, Debug)]
#[command(name = nsroot_common::constants::APP_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Log line format on stderr.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the mount points a config registers, in mount order.
    Plan(plan::PlanArgs),
    /// Enter new namespaces and perform the transition.
    Apply(apply::ApplyArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Plan(args) => plan::execute(&args),
        Command::Apply(args) => apply::execute(&args),
    }
}

/// Loads a JSON transition config and registers its mount points.
fn load_setup(path: &Path) -> anyhow::Result<NamespaceSetup> {
    let config = TransitionConfig::from_json_file(path)
        .with_context(|| format!("failed to load config {}", path.display()))?;
    let setup = NamespaceSetup::from_config(config)
        .with_context(|| format!("invalid transition config {}", path.display()))?;
    tracing::debug!(
        config = %path.display(),
        mounts = setup.mounts().len(),
        "loaded transition config"
    );
    Ok(setup)
}
