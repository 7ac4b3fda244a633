//! Logging configuration
//!
//! Per-component log levels, output destinations and the presets used by
//! the binary.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    pub global_level: String,

    /// Enable console output
    pub console_output: bool,

    /// Directory for daily-rotated JSON log files (None = no file logging)
    pub log_directory: Option<PathBuf>,

    /// Include file location in console logs
    pub include_file_location: bool,

    /// Level for alignment strategies
    pub strategies_level: String,

    /// Level for the strategy selector
    pub selector_level: String,

    /// Level for the batch orchestrator
    pub batch_level: String,

    /// Level for predictor calls
    pub predictor_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            global_level: "info".to_string(),
            console_output: true,
            log_directory: None,
            include_file_location: false,
            strategies_level: "info".to_string(),
            selector_level: "info".to_string(),
            batch_level: "info".to_string(),
            predictor_level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Verbose logging to console and `logs/`
    pub fn development() -> Self {
        Self {
            global_level: "debug".to_string(),
            console_output: true,
            log_directory: Some(PathBuf::from("logs")),
            include_file_location: true,
            strategies_level: "trace".to_string(),
            selector_level: "debug".to_string(),
            batch_level: "debug".to_string(),
            predictor_level: "trace".to_string(),
        }
    }

    /// Quiet console, full JSON logs on disk
    pub fn production() -> Self {
        Self {
            global_level: "warn".to_string(),
            console_output: false,
            log_directory: Some(PathBuf::from("/var/log/scan-prealign")),
            include_file_location: false,
            strategies_level: "info".to_string(),
            selector_level: "info".to_string(),
            batch_level: "info".to_string(),
            predictor_level: "warn".to_string(),
        }
    }

    /// Checks every level and the log directory, reporting all problems.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let levels = [
            ("global_level", &self.global_level),
            ("strategies_level", &self.strategies_level),
            ("selector_level", &self.selector_level),
            ("batch_level", &self.batch_level),
            ("predictor_level", &self.predictor_level),
        ];
        for (name, level) in levels {
            if !VALID_LEVELS.contains(&level.as_str()) {
                errors.push(format!(
                    "Invalid {}: {}. Must be one of: {:?}",
                    name, level, VALID_LEVELS
                ));
            }
        }

        if let Some(ref log_dir) = self.log_directory {
            if let Some(parent) = log_dir.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    errors.push(format!("Log directory parent does not exist: {:?}", parent));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Effective level for a component
    pub fn get_component_level(&self, component: &str) -> &str {
        match component {
            "strategy" | "strategies" => &self.strategies_level,
            "selector" => &self.selector_level,
            "batch" => &self.batch_level,
            "predictor" => &self.predictor_level,
            _ => &self.global_level,
        }
    }

    /// `EnvFilter` directives for the crate and each component module.
    pub fn filter_directives(&self) -> String {
        let krate = env!("CARGO_PKG_NAME").replace('-', "_");
        [
            format!("{}={}", krate, self.global_level),
            format!("{}::strategies={}", krate, self.strategies_level),
            format!("{}::pipeline::selector={}", krate, self.selector_level),
            format!("{}::pipeline::batch={}", krate, self.batch_level),
            format!("{}::predictor={}", krate, self.predictor_level),
        ]
        .join(",")
    }

    /// Raises the global level for `-v` flags; never lowers it.
    pub fn with_verbosity(mut self, verbose: u8) -> Self {
        let requested = match verbose {
            0 => return self,
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        let rank = |level: &str| VALID_LEVELS.iter().position(|l| *l == level).unwrap_or(2);
        if rank(requested) < rank(&self.global_level) {
            self.global_level = requested.to_string();
        }
        self
    }
}
