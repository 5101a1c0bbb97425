//! Subcommand implementations

pub mod evaluate;
pub mod settings;
pub mod stats;
