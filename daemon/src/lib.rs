//! Daemon library for trellis
//!
//! Hosts the [`Orchestrator`](bootstrap::Orchestrator), which brings a stack
//! up in dependency order, watches it and tears it down on shutdown.

#![allow(unused_crate_dependencies)]

pub mod bootstrap;
pub mod error;

#[cfg(test)]
mod error_tests;

pub use bootstrap::Orchestrator;
pub use error::{DaemonError, Result};
