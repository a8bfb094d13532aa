//! Testing utilities for the Convoy deployment orchestrator.
//!
//! This crate provides mocks of the collaborator interfaces, builders for
//! instance pools, step definitions and deployment contexts, assertion
//! helpers for execution responses, and a [`TestHarness`] that wires the
//! step execution engine to the standard steps and in-memory collaborators.

pub mod assertions;
pub mod builders;
pub mod harness;
pub mod mocks;

/// Re-export commonly used types for convenience
pub use mockall;

pub use harness::TestHarness;
