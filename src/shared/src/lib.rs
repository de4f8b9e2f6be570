//! Shared types for the snapshot lifecycle manager and the dashboard that drives it

pub mod types;

pub use types::*;
