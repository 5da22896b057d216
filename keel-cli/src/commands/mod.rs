//! CLI command implementations.

pub mod resolved;
pub mod run;
