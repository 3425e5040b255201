//! Integration test infrastructure for sshpn
//!
//! Provides:
//! - Fixtures for tunnel specs, facts and session targets
//! - A [`Harness`] wiring the orchestrator to recording collaborators
//! - Operation verification helpers

pub mod fixtures;
mod verification;

pub use fixtures::*;
pub use verification::*;
