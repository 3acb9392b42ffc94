//! # branchy-foundation
//!
//! Foundation layer for branchy:
//! - Error: the shared `Error` / `Result` types, including the cross-process
//!   `WorkerError` surfaced when an offloaded task fails
//! - Config: worker program discovery and logging settings (`BranchyConfig`)

pub mod config;
pub mod error;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result, WorkerError};

// ============================================================================
// Config
// ============================================================================
pub use config::{
    BranchyConfig, LogConfig, WorkerSettings, CONFIG_DIR, GLOBAL_CONFIG_FILE, PROJECT_CONFIG_FILE,
    WORKER_ENV,
};
