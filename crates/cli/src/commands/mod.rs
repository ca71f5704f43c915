//! CLI command implementations

pub mod apps;
pub mod backends;
pub mod nodes;
pub mod status;
