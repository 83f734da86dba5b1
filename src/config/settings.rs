//! Configuration settings and validation.

use crate::{Error, Result};
use std::path::PathBuf;

/// Raw filter-policy settings as comma-separated lists.
///
/// These are kept as strings so they can come straight from CLI flags or
/// environment variables; `sync::FilterPolicy::from_settings` parses them
/// into sets. An empty allow-list means "allow anything not blocked".
#[derive(Debug, Clone)]
pub struct FilterSettings {
    /// Directory names whose entire subtree is skipped.
    pub blocked_folders: String,

    /// File extensions (without dot) that are never indexed.
    pub blocked_extensions: String,

    /// If non-empty, only these extensions are indexed.
    pub allowed_extensions: String,

    /// Exact file names that are never indexed.
    pub blocked_file_names: String,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            blocked_folders: ".git,node_modules,target,bin,obj".to_string(),
            blocked_extensions: "exe,dll,pdb,key,pem".to_string(),
            allowed_extensions: String::new(),
            blocked_file_names: ".env,.env.local".to_string(),
        }
    }
}

/// Main configuration for codemap.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for the `SQLite` database and other data.
    pub data_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Project roots to index and watch.
    pub watch_dirs: Vec<PathBuf>,

    /// Quiet period before a burst of file events is flushed, in ms.
    pub debounce_ms: u64,

    /// Maximum queue items fetched per processing batch.
    pub batch_size: usize,

    /// Fallback processor wake-up interval, in seconds.
    pub poll_interval_secs: u64,

    /// Filter-policy settings.
    pub filters: FilterSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            log_level: "info".to_string(),
            watch_dirs: Vec::new(),
            debounce_ms: 2000,
            batch_size: 20,
            poll_interval_secs: 30,
            filters: FilterSettings::default(),
        }
    }
}

impl Config {
    /// Create a new configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(Error::config(format!(
                "invalid log level '{}', must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.debounce_ms == 0 {
            return Err(Error::config("debounce_ms cannot be 0"));
        }

        if self.batch_size == 0 {
            return Err(Error::config("batch_size cannot be 0"));
        }

        if self.poll_interval_secs == 0 {
            return Err(Error::config("poll_interval_secs cannot be 0"));
        }

        for dir in &self.watch_dirs {
            if !dir.is_absolute() {
                return Err(Error::config(format!(
                    "watch dir '{}' must be an absolute path",
                    dir.display()
                )));
            }
        }

        Ok(())
    }

    /// Get the path to the `SQLite` database file.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("codemap.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.debounce_ms, 2000);
        assert_eq!(config.batch_size, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let config = Config {
            log_level: "loud".to_string(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log level"));
    }

    #[test]
    fn test_validate_zero_debounce() {
        let config = Config {
            debounce_ms: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("debounce_ms"));
    }

    #[test]
    fn test_validate_zero_batch_size() {
        let config = Config {
            batch_size: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_validate_relative_watch_dir() {
        let config = Config {
            watch_dirs: vec![PathBuf::from("relative/path")],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("absolute"));
    }

    #[test]
    fn test_database_path() {
        let config = Config {
            data_dir: PathBuf::from("/var/lib/codemap"),
            ..Default::default()
        };
        assert_eq!(
            config.database_path(),
            PathBuf::from("/var/lib/codemap/codemap.db")
        );
    }

    #[test]
    fn test_all_log_levels_valid() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            let config = Config {
                log_level: level.to_string(),
                ..Default::default()
            };
            assert!(config.validate().is_ok(), "Level '{level}' should be valid");
        }
    }

    #[test]
    fn test_default_filter_settings() {
        let filters = FilterSettings::default();
        assert!(filters.blocked_folders.contains(".git"));
        assert!(filters.allowed_extensions.is_empty());
    }
}
