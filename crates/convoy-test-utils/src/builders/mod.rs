//! Builders for test data.
//!
//! These helpers keep tests focused on behavior by hiding the boilerplate of
//! instance pools, step definitions and deployment contexts.

mod context;
mod definitions;
mod instances;

pub use context::*;
pub use definitions::*;
pub use instances::*;
