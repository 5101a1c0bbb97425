//! Admission control agent
//!
//! Runs node admission control against procfs and serves its HTTP surface.

pub mod api;
pub mod config;
