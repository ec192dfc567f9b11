//! Human-readable output.

pub mod import;
pub mod pluralize;
pub mod wrapping;
