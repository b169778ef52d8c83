//! dbkeeper
//!
//! Credential vault, multi-backend connection manager, backup/restore
//! pipeline and cron scheduler for the blog platform's databases.

pub mod backup;
pub mod config;
pub mod errors;
pub mod pool;
pub mod restore;
pub mod schedule;
pub mod services;
pub mod utils;
pub mod vault;

#[cfg(test)]
pub(crate) mod test_support;

pub use errors::{AppError, ErrorCategory, OperationOutcome};
pub use services::Services;
