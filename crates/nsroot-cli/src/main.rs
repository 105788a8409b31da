//! # nsroot: mount-namespace root transitions
//!
//! Plans and applies the filesystem side of a sandbox: a fresh tmpfs
//! root assembled from registered mount points, entered with
//! `pivot_root(2)`.
//!
//! Mount namespaces are Linux-only; elsewhere the binary only reports that.

#[cfg(target_os = "linux")]
mod commands;

#[cfg(target_os = "linux")]
fn main() -> anyhow::Result<()> {
    use clap::Parser;

    let cli = commands::Cli::parse();
    init_tracing(cli.log_format);
    commands::execute(cli)
}

#[cfg(not(target_os = "linux"))]
fn main() -> anyhow::Result<()> {
    anyhow::bail!(
        "{} requires Linux mount namespaces",
        nsroot_common::constants::APP_NAME
    )
}

#[cfg(target_os = "linux")]
fn init_tracing(format: commands::LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    match format {
        commands::LogFormat::Text => builder.init(),
        commands::LogFormat::Json => builder.json().init(),
    }
}
