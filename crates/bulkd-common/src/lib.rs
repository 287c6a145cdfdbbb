//! Shared infrastructure for bulkd components

pub mod error;
pub mod logging;

pub use error::{BulkdError, Result};
