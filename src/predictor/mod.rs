//! Boundary to the external multi-view landmark predictor.

pub mod command;
pub mod parse;
pub mod pool;

pub use command::*;
pub use parse::*;
pub use pool::*;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::data::PointCloud;
use crate::pipeline::{PreAlign, PredictionResult};

#[derive(Debug, Error)]
pub enum PredictorError {
    #[error("prediction timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("predictor exited with {status}: {output_tail}")]
    ProcessFailed { status: String, output_tail: String },

    #[error("predictor rejected the mesh: {0}")]
    MalformedMesh(String),

    #[error("malformed predictor output: {0}")]
    MalformedOutput(String),

    #[error("predictor unavailable: {0}")]
    Unavailable(String),

    #[error("predictor I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Settings that replace the shared predictor configuration for one strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorOverride {
    #[serde(skip_serializing_if = "Value::is_null")]
    pub image_channels: Value,
    #[serde(flatten)]
    pub passthrough: Map<String, Value>,
}

/// Predictor configuration forwarded verbatim to the model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictorConfig {
    /// Keys the pipeline does not interpret.
    pub passthrough: Map<String, Value>,
    pub image_channels: Value,
    /// Keyed by strategy id.
    pub overrides: BTreeMap<String, PredictorOverride>,
}

impl PredictorConfig {
    /// Configuration used when scoring clouds aligned by `strategy_id`.
    /// Override keys replace shared keys of the same name.
    pub fn for_strategy(&self, strategy_id: &str) -> Cow<'_, PredictorConfig> {
        let Some(patch) = self.overrides.get(strategy_id) else {
            return Cow::Borrowed(self);
        };

        let mut passthrough = self.passthrough.clone();
        passthrough.extend(patch.passthrough.clone());
        let image_channels = if patch.image_channels.is_null() {
            self.image_channels.clone()
        } else {
            patch.image_channels.clone()
        };

        Cow::Owned(PredictorConfig {
            passthrough,
            image_channels,
            overrides: BTreeMap::new(),
        })
    }

    /// JSON document handed to the model. Alignment has already been
    /// applied, so the model's own pre-alignment is the identity.
    pub fn to_model_json(&self) -> Value {
        let mut document = self.passthrough.clone();
        if !self.image_channels.is_null() {
            document.insert("image_channels".to_string(), self.image_channels.clone());
        }
        let identity = serde_json::to_value(PreAlign::default()).unwrap_or(Value::Null);
        document.insert("pre-align".to_string(), identity);
        Value::Object(document)
    }
}

/// One prediction call.
#[derive(Debug, Clone, Copy)]
pub struct PredictionRequest<'a> {
    pub file_id: &'a str,
    pub strategy_id: &'a str,
    /// Already aligned.
    pub cloud: &'a PointCloud,
    pub config: &'a PredictorConfig,
}

/// A landmark model that scores an aligned cloud.
pub trait LandmarkPredictor: Send + Sync {
    fn name(&self) -> &str;

    fn predict(&self, request: &PredictionRequest<'_>) -> Result<PredictionResult, PredictorError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_model_json_overrides_pre_align() {
        let mut passthrough = Map::new();
        passthrough.insert("model".into(), json!("geometry"));
        passthrough.insert("pre-align".into(), json!({"scale": 5.0}));
        let config = PredictorConfig {
            passthrough,
            image_channels: json!("geometry+depth"),
            overrides: BTreeMap::new(),
        };

        let doc = config.to_model_json();
        assert_eq!(doc["model"], json!("geometry"));
        assert_eq!(doc["image_channels"], json!("geometry+depth"));
        assert_eq!(doc["pre-align"]["scale"], json!(1.0));
        assert_eq!(doc["pre-align"]["align_center_of_mass"], json!(false));
        assert_eq!(doc["pre-align"]["write_pre_aligned"], json!(false));
    }

    #[test]
    fn test_strategy_override_replaces_shared_keys() {
        let mut passthrough = Map::new();
        passthrough.insert("model".into(), json!("MVLMModel_DTU3D"));
        passthrough.insert("views".into(), json!(96));

        let mut patch = PredictorOverride {
            image_channels: json!("RGB+depth"),
            ..PredictorOverride::default()
        };
        patch.passthrough.insert("model".into(), json!("MVLMModel_DTU3D_anatomical"));

        let config = PredictorConfig {
            passthrough,
            image_channels: json!("geometry"),
            overrides: BTreeMap::from([("anatomical".to_string(), patch)]),
        };

        let anatomical = config.for_strategy("anatomical");
        assert_eq!(anatomical.image_channels, json!("RGB+depth"));
        assert_eq!(anatomical.passthrough["model"], json!("MVLMModel_DTU3D_anatomical"));
        assert_eq!(anatomical.passthrough["views"], json!(96));

        let center = config.for_strategy("center");
        assert!(matches!(center, Cow::Borrowed(_)));
        assert_eq!(center.image_channels, json!("geometry"));
    }
}
