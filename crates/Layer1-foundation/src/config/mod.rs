//! Config - branchy settings
//!
//! - `branchy.rs` - `BranchyConfig` (worker program, logging)

mod branchy;

pub use branchy::{
    BranchyConfig, LogConfig, WorkerSettings, CONFIG_DIR, GLOBAL_CONFIG_FILE, PROJECT_CONFIG_FILE,
    WORKER_ENV,
};
