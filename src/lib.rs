// Core modules
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod metrics;
pub mod models;
pub mod persistence;
pub mod runtime;
pub mod strategy;

// Re-export commonly used types
pub use models::*;

// Error handling
pub use error::{ErrorKind, PipelineError, Result};
