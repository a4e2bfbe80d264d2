//! Shared utilities.

pub mod id;
pub mod progress;
