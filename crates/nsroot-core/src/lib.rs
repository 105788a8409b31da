//! # nsroot-core
//!
//! Builds an isolated root filesystem for a sandboxed process and switches
//! the process into it.
//!
//! This crate provides:
//! - **Flag codec**: rendering and parsing of `mount(2)` flag masks.
//! - **Mount registry**: normalization of declarative mount requests into
//!   an ordered [`filesystem::mount_point::MountTable`].
//! - **Mount executor**: one request against a staging root, plus the
//!   read-only remount pass.
//! - **Transition**: staging, mounting, `pivot_root`, and remounting, in
//!   that order, optionally from a child sharing only filesystem attributes.
//!
//! All unsafe system calls are encapsulated in safe wrappers with
//! proper error handling and `// SAFETY:` documentation.
//!
//! The crate is Linux-only; on other targets it compiles to nothing.

#![cfg(target_os = "linux")]

pub mod filesystem;
pub mod flags;
pub mod namespace;
pub mod outcome;
pub mod process;
pub mod transition;
