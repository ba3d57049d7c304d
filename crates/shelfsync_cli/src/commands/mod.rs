//! CLI command implementations.

pub mod hash;
pub mod plan;
