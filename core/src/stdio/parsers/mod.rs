//! Parser implementations for task batches.

pub mod standard;

pub use standard::{validate_id, StandardStdioParser};
