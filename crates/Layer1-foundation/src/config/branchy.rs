//! Branchy Config - merged global + project settings
//!
//! Load order, later wins:
//! 1. `<config dir>/branchy/config.toml`
//! 2. `./branchy.toml`
//! 3. `BRANCHY_WORKER` environment variable (worker program only)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory under the platform config dir
pub const CONFIG_DIR: &str = "branchy";

/// Global config file name
pub const GLOBAL_CONFIG_FILE: &str = "config.toml";

/// Project config file name (looked up in the current directory)
pub const PROJECT_CONFIG_FILE: &str = "branchy.toml";

/// Environment variable overriding the worker program
pub const WORKER_ENV: &str = "BRANCHY_WORKER";

// ============================================================================
// Branchy Config
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BranchyConfig {
    /// Worker process settings
    pub worker: WorkerSettings,

    /// Logging settings for the worker binary
    pub log: LogConfig,
}

/// How to start a worker process
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Worker program path; discovered next to the current executable or on
    /// `PATH` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<PathBuf>,

    /// Extra arguments passed to the worker program
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing` filter directive (`info`, `branchy_task=debug`, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl BranchyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// Global + project + environment merged load
    pub fn load() -> Result<Self> {
        let mut config = Self::new();

        // 1. Global
        if let Some(path) = Self::global_path() {
            if let Some(global) = Self::load_optional(&path)? {
                config.merge(global);
            }
        }

        // 2. Project
        if let Ok(cwd) = std::env::current_dir() {
            if let Some(project) = Self::load_optional(&cwd.join(PROJECT_CONFIG_FILE))? {
                config.merge(project);
            }
        }

        // 3. Environment
        if let Some(program) = std::env::var_os(WORKER_ENV).filter(|v| !v.is_empty()) {
            config.worker.program = Some(PathBuf::from(program));
        }

        Ok(config)
    }

    /// Load a single file; missing files are an error
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::parse(&content).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    /// Load a single file if it exists
    pub fn load_optional(path: &Path) -> Result<Option<Self>> {
        if !path.is_file() {
            return Ok(None);
        }
        debug!("Loading config from {}", path.display());
        Self::load_from(path).map(Some)
    }

    /// Parse TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// `<config dir>/branchy/config.toml`
    pub fn global_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(GLOBAL_CONFIG_FILE))
    }

    // ========================================================================
    // Merge
    // ========================================================================

    /// Overlay `other` on top of `self`; only values `other` sets are taken
    pub fn merge(&mut self, other: BranchyConfig) {
        if other.worker.program.is_some() {
            self.worker.program = other.worker.program;
        }
        if !other.worker.args.is_empty() {
            self.worker.args = other.worker.args;
        }
        if other.log.filter.is_some() {
            self.log.filter = other.log.filter;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_full() {
        let config = BranchyConfig::parse(
            r#"
            [worker]
            program = "/opt/branchy/bin/branchy-worker"
            args = ["--log-level", "debug"]

            [log]
            filter = "branchy_task=trace"
            "#,
        )
        .unwrap();

        assert_eq!(
            config.worker.program.as_deref(),
            Some(Path::new("/opt/branchy/bin/branchy-worker"))
        );
        assert_eq!(config.worker.args, vec!["--log-level", "debug"]);
        assert_eq!(config.log.filter.as_deref(), Some("branchy_task=trace"));
    }

    #[test]
    fn test_parse_empty_is_default() {
        assert_eq!(BranchyConfig::parse("").unwrap(), BranchyConfig::default());
    }

    #[test]
    fn test_parse_invalid() {
        let err = BranchyConfig::parse("[worker]\nprogram = 5").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_merge_keeps_unset_values() {
        let mut base = BranchyConfig::parse("[worker]\nprogram = \"/a\"\n[log]\nfilter = \"warn\"").unwrap();
        let overlay = BranchyConfig::parse("[log]\nfilter = \"debug\"").unwrap();

        base.merge(overlay);

        assert_eq!(base.worker.program.as_deref(), Some(Path::new("/a")));
        assert_eq!(base.log.filter.as_deref(), Some("debug"));
    }

    #[test]
    fn test_load_optional() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROJECT_CONFIG_FILE);

        assert!(BranchyConfig::load_optional(&path).unwrap().is_none());

        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[worker]\nargs = [\"-q\"]").unwrap();

        let loaded = BranchyConfig::load_optional(&path).unwrap().unwrap();
        assert_eq!(loaded.worker.args, vec!["-q"]);
    }

    #[test]
    fn test_load_from_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "not = [valid").unwrap();

        let err = BranchyConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }
}
