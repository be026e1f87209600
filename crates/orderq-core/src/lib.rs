//! `orderq-core` — configuration and shared error types for the orderq workspace.

pub mod config;
pub mod error;

pub use config::{LogConfig, OrderqConfig, SchedulerConfig};
pub use error::{OrderqError, Result};
