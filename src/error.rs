//! Error kinds shared across the alignment pipeline.
//!
//! Per-file errors (`Input`, `Config`, `Predictor`) are isolated by the batch
//! orchestrator and end up as reason codes in the report; `Fatal` aborts a run.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::data::{MeshIoError, PointCloudError};
use crate::predictor::PredictorError;

/// Reason code attached to every failed scan or attempt in a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// Source file missing or corrupt.
    InputError,
    /// Invalid alignment parameters or unusable strategy configuration.
    ConfigError,
    /// The landmark predictor failed or timed out.
    PredictorError,
    /// A strategy was chosen but its error did not beat the threshold.
    AboveThreshold,
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = match self {
            ReasonCode::InputError => "input_error",
            ReasonCode::ConfigError => "config_error",
            ReasonCode::PredictorError => "predictor_error",
            ReasonCode::AboveThreshold => "above_threshold",
        };
        f.write_str(code)
    }
}

#[derive(Debug, Error)]
pub enum AlignError {
    /// Missing or corrupt source file for a single scan.
    #[error("input error for '{file_id}': {source}")]
    Input {
        file_id: String,
        #[source]
        source: MeshIoError,
    },

    /// Invalid parameters; every problem found is listed.
    #[error("invalid configuration: {}", .0.join("; "))]
    Config(Vec<String>),

    /// External predictor failure after retries.
    #[error("predictor failed: {0}")]
    Predictor(#[from] PredictorError),

    /// Corpus-level failure that aborts the whole run.
    #[error("fatal error at '{}': {message}", path.display())]
    Fatal { path: PathBuf, message: String },
}

impl AlignError {
    pub fn config(message: impl Into<String>) -> Self {
        AlignError::Config(vec![message.into()])
    }

    pub fn fatal(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        AlignError::Fatal {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Reason code recorded when this error is attributed to a single scan.
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            AlignError::Input { .. } | AlignError::Fatal { .. } => ReasonCode::InputError,
            AlignError::Config(_) => ReasonCode::ConfigError,
            AlignError::Predictor(_) => ReasonCode::PredictorError,
        }
    }
}

impl From<PointCloudError> for AlignError {
    fn from(err: PointCloudError) -> Self {
        AlignError::config(err.to_string())
    }
}
