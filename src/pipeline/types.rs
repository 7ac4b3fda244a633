use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::analysis::{PerformanceTier, TierThresholds};
use crate::data::PointCloud;
use crate::error::{AlignError, ReasonCode};
use crate::predictor::PredictorError;

/// Number of landmarks the predictor returns per scan.
pub const LANDMARK_COUNT: usize = 73;

/// Wraps an angle in degrees into `[0, 360)`.
pub fn normalize_angle(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid rounds tiny negatives up to exactly 360
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped + 0.0
    }
}

fn is_origin(offset: &[f64; 3]) -> bool {
    offset.iter().all(|c| *c == 0.0)
}

/// Unvalidated pre-alignment block as it appears in configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreAlign {
    pub align_center_of_mass: bool,
    pub rot_x: f64,
    pub rot_y: f64,
    pub rot_z: f64,
    pub scale: f64,
    #[serde(rename = "write_pre_aligned", alias = "write_intermediate")]
    pub write_intermediate: bool,
    #[serde(skip_serializing_if = "is_origin")]
    pub offset: [f64; 3],
}

impl Default for PreAlign {
    fn default() -> Self {
        Self {
            align_center_of_mass: false,
            rot_x: 0.0,
            rot_y: 0.0,
            rot_z: 0.0,
            scale: 1.0,
            write_intermediate: false,
            offset: [0.0; 3],
        }
    }
}

impl PreAlign {
    /// Every problem with this block, empty when it is valid.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for (name, value) in [("rot_x", self.rot_x), ("rot_y", self.rot_y), ("rot_z", self.rot_z)] {
            if !value.is_finite() {
                problems.push(format!("{} must be finite, got {}", name, value));
            }
        }
        if !self.scale.is_finite() || self.scale <= 0.0 {
            problems.push(format!("scale must be a finite value > 0, got {}", self.scale));
        }
        if !self.offset.iter().all(|c| c.is_finite()) {
            problems.push(format!("offset must be finite, got {:?}", self.offset));
        }
        problems
    }
}

/// Validated alignment parameters consumed by the normalizer.
///
/// Angles are in degrees and always lie in `[0, 360)`; scale is finite and
/// positive. Deserialization goes through the same validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PreAlign", into = "PreAlign")]
pub struct AlignmentParams {
    align_center_of_mass: bool,
    rotation: [f64; 3],
    scale: f64,
    write_intermediate: bool,
    offset: [f64; 3],
}

impl TryFrom<PreAlign> for AlignmentParams {
    type Error = AlignError;

    fn try_from(raw: PreAlign) -> Result<Self, Self::Error> {
        let problems = raw.problems();
        if !problems.is_empty() {
            return Err(AlignError::Config(problems));
        }
        Ok(Self {
            align_center_of_mass: raw.align_center_of_mass,
            rotation: [
                normalize_angle(raw.rot_x),
                normalize_angle(raw.rot_y),
                normalize_angle(raw.rot_z),
            ],
            scale: raw.scale,
            write_intermediate: raw.write_intermediate,
            offset: raw.offset,
        })
    }
}

impl From<AlignmentParams> for PreAlign {
    fn from(params: AlignmentParams) -> Self {
        let [rot_x, rot_y, rot_z] = params.rotation;
        Self {
            align_center_of_mass: params.align_center_of_mass,
            rot_x,
            rot_y,
            rot_z,
            scale: params.scale,
            write_intermediate: params.write_intermediate,
            offset: params.offset,
        }
    }
}

impl AlignmentParams {
    /// No centering, no rotation, unit scale.
    pub fn identity() -> Self {
        Self {
            align_center_of_mass: false,
            rotation: [0.0; 3],
            scale: 1.0,
            write_intermediate: false,
            offset: [0.0; 3],
        }
    }

    pub fn align_center_of_mass(&self) -> bool {
        self.align_center_of_mass
    }

    /// `[rot_x, rot_y, rot_z]` in degrees.
    pub fn rotation(&self) -> [f64; 3] {
        self.rotation
    }

    pub fn rot_x(&self) -> f64 {
        self.rotation[0]
    }

    pub fn rot_y(&self) -> f64 {
        self.rotation[1]
    }

    pub fn rot_z(&self) -> f64 {
        self.rotation[2]
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn write_intermediate(&self) -> bool {
        self.write_intermediate
    }

    pub fn offset(&self) -> [f64; 3] {
        self.offset
    }

    pub fn with_center_of_mass(mut self, enabled: bool) -> Self {
        self.align_center_of_mass = enabled;
        self
    }

    pub fn with_write_intermediate(mut self, enabled: bool) -> Self {
        self.write_intermediate = enabled;
        self
    }

    /// Drops any scaling; unit scale is always valid.
    pub fn with_unit_scale(mut self) -> Self {
        self.scale = 1.0;
        self
    }

    pub fn with_rotation(self, rotation: [f64; 3]) -> Result<Self, AlignError> {
        let [rot_x, rot_y, rot_z] = rotation;
        Self::try_from(PreAlign {
            rot_x,
            rot_y,
            rot_z,
            ..PreAlign::from(self)
        })
    }

    pub fn with_scale(self, scale: f64) -> Result<Self, AlignError> {
        Self::try_from(PreAlign {
            scale,
            ..PreAlign::from(self)
        })
    }

    pub fn with_offset(self, offset: [f64; 3]) -> Result<Self, AlignError> {
        Self::try_from(PreAlign {
            offset,
            ..PreAlign::from(self)
        })
    }
}

/// Output of applying one strategy to one cloud. Owns its cloud.
#[derive(Debug, Clone)]
pub struct AlignmentResult {
    strategy_id: String,
    transformed: PointCloud,
    params: AlignmentParams,
}

impl AlignmentResult {
    pub fn new(strategy_id: impl Into<String>, transformed: PointCloud, params: AlignmentParams) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            transformed,
            params,
        }
    }

    pub fn strategy_id(&self) -> &str {
        &self.strategy_id
    }

    pub fn transformed(&self) -> &PointCloud {
        &self.transformed
    }

    pub fn params(&self) -> &AlignmentParams {
        &self.params
    }
}

/// Landmarks and consensus error returned by a successful prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    landmarks: Vec<[f64; 3]>,
    error: f64,
    elapsed: Duration,
}

impl PredictionResult {
    pub fn new(
        landmarks: Vec<[f64; 3]>,
        error: f64,
        elapsed: Duration,
    ) -> Result<Self, PredictorError> {
        if landmarks.len() != LANDMARK_COUNT {
            return Err(PredictorError::MalformedOutput(format!(
                "expected {} landmarks, got {}",
                LANDMARK_COUNT,
                landmarks.len()
            )));
        }
        if !error.is_finite() || error < 0.0 {
            return Err(PredictorError::MalformedOutput(format!(
                "consensus error must be finite and >= 0, got {}",
                error
            )));
        }
        Ok(Self {
            landmarks,
            error,
            elapsed,
        })
    }

    pub fn landmarks(&self) -> &[[f64; 3]] {
        &self.landmarks
    }

    pub fn error(&self) -> f64 {
        self.error
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

/// How a single strategy attempt ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Scored {
        error: f64,
        elapsed_ms: f64,
        /// Produced by the retry with the strategy's default parameters.
        retried: bool,
    },
    Failed {
        reason: ReasonCode,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyAttempt {
    pub strategy_id: String,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

impl StrategyAttempt {
    pub fn error(&self) -> Option<f64> {
        match self.outcome {
            AttemptOutcome::Scored { error, .. } => Some(error),
            AttemptOutcome::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanFailure {
    pub reason: ReasonCode,
    pub message: String,
}

/// Everything recorded about one scan during selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub file_id: String,
    pub category: Option<String>,
    /// In evaluation order.
    pub attempts: Vec<StrategyAttempt>,
    pub chosen_strategy_id: Option<String>,
    pub chosen_error: Option<f64>,
    /// Set when no strategy could be chosen.
    pub failure: Option<ScanFailure>,
    pub tier: PerformanceTier,
}

impl ScanRecord {
    pub fn new(file_id: impl Into<String>, category: Option<String>) -> Self {
        Self {
            file_id: file_id.into(),
            category,
            attempts: Vec::new(),
            chosen_strategy_id: None,
            chosen_error: None,
            failure: None,
            tier: PerformanceTier::Failed,
        }
    }

    /// A record for a scan that never reached strategy evaluation.
    pub fn failed(
        file_id: impl Into<String>,
        category: Option<String>,
        reason: ReasonCode,
        message: impl Into<String>,
    ) -> Self {
        let mut record = Self::new(file_id, category);
        record.failure = Some(ScanFailure {
            reason,
            message: message.into(),
        });
        record
    }

    pub fn with_tier(mut self, tier: PerformanceTier) -> Self {
        self.tier = tier;
        self
    }

    /// Error of the first scored attempt for `strategy_id`.
    pub fn error_for(&self, strategy_id: &str) -> Option<f64> {
        self.attempts
            .iter()
            .filter(|a| a.strategy_id == strategy_id)
            .find_map(StrategyAttempt::error)
    }

    pub fn was_evaluated(&self, strategy_id: &str) -> bool {
        self.attempts.iter().any(|a| a.strategy_id == strategy_id)
    }

    /// Success is a chosen error strictly below the threshold.
    pub fn is_success(&self, threshold: f64) -> bool {
        self.chosen_error.is_some_and(|e| e < threshold)
    }

    /// Reason this scan counts as failed at `threshold`, if it does.
    pub fn reason_code(&self, threshold: f64) -> Option<ReasonCode> {
        if self.is_success(threshold) {
            None
        } else if let Some(failure) = &self.failure {
            Some(failure.reason)
        } else {
            Some(ReasonCode::AboveThreshold)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub success: usize,
    pub failure: usize,
}

/// Category key used for scans without one.
pub const UNCATEGORIZED: &str = "uncategorized";

/// Aggregated outcome of one batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub threshold_used: f64,
    pub candidates: Vec<String>,
    pub records: BTreeMap<String, ScanRecord>,
    pub success_count: usize,
    pub failure_count: usize,
    pub per_category: BTreeMap<String, CategoryCounts>,
    pub cancelled: bool,
    pub not_processed: Vec<String>,
}

impl CorpusReport {
    pub fn new(threshold: f64, candidates: Vec<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            threshold_used: threshold,
            candidates,
            records: BTreeMap::new(),
            success_count: 0,
            failure_count: 0,
            per_category: BTreeMap::new(),
            cancelled: false,
            not_processed: Vec::new(),
        }
    }

    /// Adds a record, replacing any earlier record with the same file id.
    pub fn merge(&mut self, record: ScanRecord) {
        if let Some(previous) = self.records.remove(&record.file_id) {
            self.count(&previous, false);
        }
        self.count(&record, true);
        self.records.insert(record.file_id.clone(), record);
    }

    fn count(&mut self, record: &ScanRecord, add: bool) {
        let success = record.is_success(self.threshold_used);
        let category = record
            .category
            .clone()
            .unwrap_or_else(|| UNCATEGORIZED.to_string());
        let counts = self.per_category.entry(category).or_default();
        let (total, per_category) = if success {
            (&mut self.success_count, &mut counts.success)
        } else {
            (&mut self.failure_count, &mut counts.failure)
        };
        if add {
            *total += 1;
            *per_category += 1;
        } else {
            *total -= 1;
            *per_category -= 1;
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, file_id: &str) -> Option<&ScanRecord> {
        self.records.get(file_id)
    }

    /// Scans worth another run: those whose chosen error is poor or missing
    /// under `tiers`, plus those a cancelled run never reached.
    pub fn retry_candidates(&self, tiers: &TierThresholds) -> BTreeSet<String> {
        self.records
            .values()
            .filter(|record| {
                matches!(
                    tiers.classify(record.chosen_error),
                    PerformanceTier::Poor | PerformanceTier::Failed
                )
            })
            .map(|record| record.file_id.clone())
            .chain(self.not_processed.iter().cloned())
            .collect()
    }

    /// Marks the run finished.
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// `0` when every scan succeeded, `1` otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.failure_count == 0 && self.not_processed.is_empty() {
            0
        } else {
            1
        }
    }

    /// Writes the report as pretty JSON through a temporary file in the
    /// target directory followed by an atomic rename.
    pub fn persist(&self, path: &Path) -> Result<(), AlignError> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)
            .map_err(|e| AlignError::fatal(dir, format!("cannot create report directory: {}", e)))?;

        let mut tmp = NamedTempFile::new_in(dir)
            .map_err(|e| AlignError::fatal(dir, format!("cannot create temporary report: {}", e)))?;
        serde_json::to_writer_pretty(&mut tmp, self)
            .map_err(|e| AlignError::fatal(path, format!("cannot serialize report: {}", e)))?;
        tmp.write_all(b"\n")
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| AlignError::fatal(path, format!("cannot write report: {}", e)))?;
        tmp.persist(path)
            .map_err(|e| AlignError::fatal(path, format!("cannot replace report: {}", e.error)))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, AlignError> {
        let file = File::open(path)
            .map_err(|e| AlignError::fatal(path, format!("cannot open report: {}", e)))?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| AlignError::fatal(path, format!("cannot parse report: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(file_id: &str, category: Option<&str>, error: f64) -> ScanRecord {
        let mut record = ScanRecord::new(file_id, category.map(String::from));
        record.attempts.push(StrategyAttempt {
            strategy_id: "center".to_string(),
            outcome: AttemptOutcome::Scored {
                error,
                elapsed_ms: 1.0,
                retried: false,
            },
        });
        record.chosen_strategy_id = Some("center".to_string());
        record.chosen_error = Some(error);
        record
    }

    #[test]
    fn test_normalize_angle() {
        assert_eq!(normalize_angle(0.0), 0.0);
        assert_eq!(normalize_angle(360.0), 0.0);
        assert_eq!(normalize_angle(-90.0), 270.0);
        assert_eq!(normalize_angle(725.0), 5.0);
        assert!(normalize_angle(-1e-15) < 360.0);
        assert!(normalize_angle(-0.0).is_sign_positive());
    }

    #[test]
    fn test_params_validation_lists_every_problem() {
        let err = AlignmentParams::try_from(PreAlign {
            rot_y: f64::NAN,
            scale: 0.0,
            ..PreAlign::default()
        })
        .unwrap_err();
        match err {
            AlignError::Config(problems) => assert_eq!(problems.len(), 2),
            other => panic!("unexpected error: {other}"),
        }

        assert!(AlignmentParams::identity().with_scale(-2.0).is_err());
        assert!(AlignmentParams::identity().with_scale(f64::INFINITY).is_err());
        assert!(AlignmentParams::identity()
            .with_offset([0.0, f64::NAN, 0.0])
            .is_err());
    }

    #[test]
    fn test_params_normalize_angles() {
        let params = AlignmentParams::identity()
            .with_rotation([-90.0, 450.0, 360.0])
            .unwrap();
        assert_eq!(params.rotation(), [270.0, 90.0, 0.0]);
    }

    #[test]
    fn test_params_deserialize_through_validation() {
        let ok: AlignmentParams = serde_json::from_str(
            r#"{"align_center_of_mass": true, "rot_x": -10, "scale": 2.5, "write_pre_aligned": true}"#,
        )
        .unwrap();
        assert!(ok.align_center_of_mass());
        assert_eq!(ok.rot_x(), 350.0);
        assert!(ok.write_intermediate());

        let bad = serde_json::from_str::<AlignmentParams>(r#"{"scale": -1}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_prediction_result_requires_73_landmarks() {
        let ok = PredictionResult::new(vec![[0.0; 3]; LANDMARK_COUNT], 3.5, Duration::from_millis(5));
        assert!(ok.is_ok());
        assert!(PredictionResult::new(vec![[0.0; 3]; 72], 3.5, Duration::ZERO).is_err());
        assert!(PredictionResult::new(vec![[0.0; 3]; 73], -1.0, Duration::ZERO).is_err());
        assert!(PredictionResult::new(vec![[0.0; 3]; 73], f64::NAN, Duration::ZERO).is_err());
    }

    #[test]
    fn test_success_is_strictly_below_threshold() {
        assert!(scored("a", None, 9.9).is_success(10.0));
        assert!(!scored("b", None, 10.0).is_success(10.0));
        assert_eq!(
            scored("b", None, 10.0).reason_code(10.0),
            Some(ReasonCode::AboveThreshold)
        );
        let failed = ScanRecord::failed("c", None, ReasonCode::InputError, "missing");
        assert_eq!(failed.reason_code(10.0), Some(ReasonCode::InputError));
    }

    #[test]
    fn test_report_merge_counts_and_replaces() {
        let mut report = CorpusReport::new(10.0, vec!["center".into()]);
        report.merge(scored("men/1", Some("men"), 5.0));
        report.merge(scored("men/2", Some("men"), 15.0));
        report.merge(scored("top", None, 1.0));
        assert_eq!(report.success_count, 2);
        assert_eq!(report.failure_count, 1);
        assert_eq!(report.per_category["men"], CategoryCounts { success: 1, failure: 1 });
        assert_eq!(report.per_category[UNCATEGORIZED].success, 1);

        report.merge(scored("men/2", Some("men"), 2.0));
        assert_eq!(report.len(), 3);
        assert_eq!(report.success_count, 3);
        assert_eq!(report.failure_count, 0);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_report_persist_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("reports").join("run.json");
        let mut report = CorpusReport::new(10.0, vec!["anatomical".into(), "reference".into()]);
        report.merge(scored("1", None, 4.0));
        report.finish();
        report.persist(&path).unwrap();

        let loaded = CorpusReport::load(&path).unwrap();
        assert_eq!(loaded.run_id, report.run_id);
        assert_eq!(loaded.records, report.records);
        assert_eq!(loaded.success_count, 1);

        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }
}
