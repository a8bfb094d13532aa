//! Assertion utilities for validating execution responses.

mod response;

pub use response::*;
