//! Subcommand implementations

pub mod analyze;
pub mod plan;
pub mod show;
pub mod status;
