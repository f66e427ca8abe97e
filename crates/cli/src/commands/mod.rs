//! Subcommand implementations

pub mod cycle;
pub mod opportunities;
pub mod proposals;
pub mod savings;
