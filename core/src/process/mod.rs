//! Process management utilities for the trellis core library
//!
//! Unix only: processes are spawned into their own process group so the
//! supervisor can reliably signal a service together with anything it forked.

#[cfg(unix)]
pub mod unix;

#[cfg(unix)]
pub use unix::*;
