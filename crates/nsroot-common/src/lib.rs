//! # nsroot-common
//!
//! Shared error definitions, configuration models, and constants
//! used across the nsroot workspace.
//!
//! This crate is the leaf of the dependency graph: it depends on no other
//! internal crate and carries no Linux-specific code.

pub mod config;
pub mod constants;
pub mod error;
