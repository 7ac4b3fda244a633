use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::analysis::TierThresholds;
use crate::error::AlignError;
use crate::logging::LoggingConfig;
use crate::pipeline::PreAlign;
use crate::predictor::{PredictorConfig, PredictorOverride};
use crate::strategies::{HYBRID, KNOWN_STRATEGIES};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Opaque rendering setup forwarded to the predictor.
    #[serde(skip_serializing_if = "Value::is_null")]
    pub image_channels: Value,
    #[serde(rename = "pre-align")]
    pub pre_align: PreAlign,
    pub selection: SelectionSettings,
    pub batch: BatchSettings,
    pub predictor: PredictorSettings,
    pub anatomical: AnatomicalSettings,
    pub reference: ReferenceSettings,
    pub tiers: TierThresholds,
    pub logging: LoggingConfig,
    /// Top-level keys this crate does not interpret; handed to the predictor.
    #[serde(flatten)]
    pub passthrough: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionSettings {
    /// Strategy names in priority order; `hybrid` expands to anatomical, reference.
    pub candidates: Vec<String>,
    /// A scan succeeds when its chosen error is strictly below this.
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    /// Worker threads; defaults to the number of predictor devices.
    pub workers: Option<usize>,
    /// Cancel the run once this many scans have failed.
    pub stop_after_failures: Option<usize>,
    /// Persist the partial report every N merged scans.
    pub checkpoint_every: Option<usize>,
    /// File extensions picked up by corpus discovery.
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorSettings {
    /// Predictor executable; prediction is disabled when unset.
    pub program: Option<PathBuf>,
    pub args: Vec<String>,
    pub timeout_secs: u64,
    /// One predictor instance per entry, exported as `CUDA_VISIBLE_DEVICES`.
    pub devices: Vec<String>,
    /// Predictor settings used only when scoring a given strategy.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub per_strategy: BTreeMap<String, PredictorOverride>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnatomicalSettings {
    /// Extent along the detected up axis after scaling.
    pub target_face_height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceSettings {
    /// PLY or OBJ mesh the `reference` strategy registers against.
    pub mesh_path: Option<PathBuf>,
    /// Keep the input's native scale instead of matching the reference.
    pub preserve_scale: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            image_channels: Value::Null,
            pre_align: PreAlign::default(),
            selection: SelectionSettings::default(),
            batch: BatchSettings::default(),
            predictor: PredictorSettings::default(),
            anatomical: AnatomicalSettings::default(),
            reference: ReferenceSettings::default(),
            tiers: TierThresholds::default(),
            logging: LoggingConfig::default(),
            passthrough: Map::new(),
        }
    }
}

impl Default for SelectionSettings {
    fn default() -> Self {
        Self {
            candidates: vec![HYBRID.to_string()],
            threshold: 10.0,
        }
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            workers: None,
            stop_after_failures: None,
            checkpoint_every: None,
            extensions: vec!["ply".to_string()],
        }
    }
}

impl Default for PredictorSettings {
    fn default() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            timeout_secs: 300,
            devices: Vec::new(),
            per_strategy: BTreeMap::new(),
        }
    }
}

impl Default for AnatomicalSettings {
    fn default() -> Self {
        Self {
            target_face_height: crate::strategies::DEFAULT_FACE_HEIGHT,
        }
    }
}

impl Default for ReferenceSettings {
    fn default() -> Self {
        Self {
            mesh_path: None,
            preserve_scale: false,
        }
    }
}

impl BatchSettings {
    /// Configured worker count, or one worker per predictor device.
    pub fn effective_workers(&self, predictor: &PredictorSettings) -> usize {
        self.workers
            .unwrap_or_else(|| predictor.devices.len())
            .max(1)
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;

        if content.trim_start().starts_with('{') {
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(toml::from_str(&content)?)
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P, format: ConfigFormat) -> anyhow::Result<()> {
        let content = match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self)?,
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
        };

        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors: Vec<String> = self
            .pre_align
            .problems()
            .into_iter()
            .map(|p| format!("pre-align: {}", p))
            .collect();

        if !self.selection.threshold.is_finite() || self.selection.threshold < 0.0 {
            errors.push(format!(
                "selection.threshold must be a finite value >= 0, got {}",
                self.selection.threshold
            ));
        }

        if self.selection.candidates.is_empty() {
            errors.push("selection.candidates must name at least one strategy".to_string());
        }
        for name in &self.selection.candidates {
            if name != HYBRID && !KNOWN_STRATEGIES.contains(&name.as_str()) {
                errors.push(format!("selection.candidates: unknown strategy '{}'", name));
            }
        }

        if self.batch.workers == Some(0) {
            errors.push("batch.workers must be at least 1".to_string());
        }
        if self.batch.stop_after_failures == Some(0) {
            errors.push("batch.stop_after_failures must be at least 1".to_string());
        }
        if self.batch.checkpoint_every == Some(0) {
            errors.push("batch.checkpoint_every must be at least 1".to_string());
        }
        if self.batch.extensions.is_empty() {
            errors.push("batch.extensions must not be empty".to_string());
        }

        if self.predictor.timeout_secs == 0 {
            errors.push("predictor.timeout_secs must be positive".to_string());
        }
        for name in self.predictor.per_strategy.keys() {
            if !KNOWN_STRATEGIES.contains(&name.as_str()) {
                errors.push(format!("predictor.per_strategy: unknown strategy '{}'", name));
            }
        }

        let height = self.anatomical.target_face_height;
        if !height.is_finite() || height <= 0.0 {
            errors.push(format!(
                "anatomical.target_face_height must be a finite value > 0, got {}",
                height
            ));
        }

        if let Err(tier_errors) = self.tiers.validate() {
            errors.extend(tier_errors.into_iter().map(|e| format!("tiers: {}", e)));
        }
        if let Err(logging_errors) = self.logging.validate() {
            errors.extend(logging_errors.into_iter().map(|e| format!("logging: {}", e)));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// What the predictor receives besides the aligned scan.
    pub fn predictor_config(&self) -> PredictorConfig {
        PredictorConfig {
            passthrough: self.passthrough.clone(),
            image_channels: self.image_channels.clone(),
            overrides: self.predictor.per_strategy.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

/// Loads and validates the configuration at `path`, or the defaults when no
/// path is given. Unreadable or invalid files are configuration errors.
pub fn load_config(path: Option<&Path>) -> Result<Config, AlignError> {
    let config = match path {
        Some(path) => Config::load_from_file(path).map_err(|e| {
            AlignError::config(format!("cannot load config '{}': {:#}", path.display(), e))
        })?,
        None => Config::default(),
    };
    config.validate().map_err(AlignError::Config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.selection.candidates, vec!["hybrid"]);
        assert_eq!(config.selection.threshold, 10.0);
        assert_eq!(config.predictor.timeout_secs, 300);
        assert_eq!(config.anatomical.target_face_height, 190.0);
    }

    #[test]
    fn test_json_with_unknown_keys_is_forwarded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            json!({
                "pre-align": {"align_center_of_mass": true, "rot_y": 90.0, "scale": 2.0, "write_pre_aligned": true},
                "image_channels": "geometry",
                "n_views": 96,
                "selection": {"candidates": ["center", "scale-free"], "threshold": 5.0}
            })
            .to_string(),
        )
        .unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert!(config.pre_align.align_center_of_mass);
        assert!(config.pre_align.write_intermediate);
        assert_eq!(config.pre_align.rot_y, 90.0);
        assert_eq!(config.selection.threshold, 5.0);
        assert_eq!(config.passthrough.get("n_views"), Some(&json!(96)));

        let model = config.predictor_config().to_model_json();
        assert_eq!(model["n_views"], json!(96));
        assert_eq!(model["image_channels"], json!("geometry"));
        assert_eq!(model["pre-align"]["scale"], json!(1.0));
    }

    #[test]
    fn test_per_strategy_predictor_settings() {
        let config: Config = serde_json::from_value(json!({
            "image_channels": "geometry",
            "predictor": {
                "per_strategy": {
                    "reference": {"image_channels": "RGB+depth", "model": "ultimate-final"}
                }
            }
        }))
        .unwrap();
        assert!(config.validate().is_ok());

        let predictor = config.predictor_config();
        let reference = predictor.for_strategy("reference").to_model_json();
        assert_eq!(reference["image_channels"], json!("RGB+depth"));
        assert_eq!(reference["model"], json!("ultimate-final"));
        let center = predictor.for_strategy("center").to_model_json();
        assert_eq!(center["image_channels"], json!("geometry"));
        assert!(center.get("model").is_none());

        let mut unknown = config.clone();
        unknown
            .predictor
            .per_strategy
            .insert("hybrid".into(), PredictorOverride::default());
        let errors = unknown.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("per_strategy") && e.contains("hybrid")));
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.batch.workers = Some(4);
        config.reference.mesh_path = Some(PathBuf::from("meshes/reference.obj"));
        config.predictor.per_strategy.insert(
            "anatomical".into(),
            PredictorOverride {
                image_channels: json!("geometry+depth"),
                ..PredictorOverride::default()
            },
        );
        config.save_to_file(&path, ConfigFormat::Toml).unwrap();

        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_validation_collects_every_problem() {
        let mut config = Config::default();
        config.pre_align.scale = 0.0;
        config.selection.candidates = vec!["center".into(), "icp".into()];
        config.batch.workers = Some(0);
        config.logging.global_level = "chatty".into();

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().any(|e| e.contains("icp")));
    }

    #[test]
    fn test_load_config_maps_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(load_config(Some(&path)), Err(AlignError::Config(_))));
        assert!(load_config(None).is_ok());
    }

    #[test]
    fn test_effective_workers() {
        let mut predictor = PredictorSettings::default();
        let mut batch = BatchSettings::default();
        assert_eq!(batch.effective_workers(&predictor), 1);

        predictor.devices = vec!["0".into(), "1".into()];
        assert_eq!(batch.effective_workers(&predictor), 2);

        batch.workers = Some(8);
        assert_eq!(batch.effective_workers(&predictor), 8);
    }
}
