//! Mock implementations of the collaborator interfaces.
//!
//! Each mock comes with a `create_mock_*` function that installs permissive
//! default expectations; tests add their own expectations on top.

pub mod approval;
pub mod inventory;
pub mod outputs;
pub mod worker_pool;

// Re-export all mocks and their creator functions for easy access
pub use approval::*;
pub use inventory::*;
pub use outputs::*;
pub use worker_pool::*;
