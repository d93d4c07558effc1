//! Command-line entry points.

pub mod extract;
pub mod matcher;
pub mod schema;
