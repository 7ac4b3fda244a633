#![allow(dead_code)]

use scan_prealign::pipeline::{PredictionResult, LANDMARK_COUNT};
use scan_prealign::predictor::{LandmarkPredictor, PredictionRequest, PredictorError};
use scan_prealign::PointCloud;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Predictor scripted per (file id, strategy id). Unscripted pairs fall back
/// to the per-file score, then to `default`; without any score the call fails.
#[derive(Default)]
pub struct StubPredictor {
    by_pair: HashMap<(String, String), f64>,
    by_file: HashMap<String, f64>,
    failing_files: Vec<String>,
    default: Option<f64>,
    calls: Mutex<Vec<(String, String)>>,
}

impl StubPredictor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn score(mut self, file_id: &str, strategy_id: &str, error: f64) -> Self {
        self.by_pair
            .insert((file_id.to_string(), strategy_id.to_string()), error);
        self
    }

    pub fn file_score(mut self, file_id: &str, error: f64) -> Self {
        self.by_file.insert(file_id.to_string(), error);
        self
    }

    pub fn failing(mut self, file_id: &str) -> Self {
        self.failing_files.push(file_id.to_string());
        self
    }

    pub fn default_score(mut self, error: f64) -> Self {
        self.default = Some(error);
        self
    }

    /// Strategy ids predicted for `file_id`, in call order.
    pub fn calls_for(&self, file_id: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(f, _)| f == file_id)
            .map(|(_, s)| s.clone())
            .collect()
    }
}

impl LandmarkPredictor for StubPredictor {
    fn name(&self) -> &str {
        "stub"
    }

    fn predict(&self, request: &PredictionRequest<'_>) -> Result<PredictionResult, PredictorError> {
        self.calls
            .lock()
            .unwrap()
            .push((request.file_id.to_string(), request.strategy_id.to_string()));

        if self.failing_files.iter().any(|f| f == request.file_id) {
            return Err(PredictorError::ProcessFailed {
                status: "exit status: 1".to_string(),
                output_tail: "CUDA error: out of memory".to_string(),
            });
        }

        let key = (request.file_id.to_string(), request.strategy_id.to_string());
        let error = self
            .by_pair
            .get(&key)
            .or_else(|| self.by_file.get(request.file_id))
            .copied()
            .or(self.default);

        match error {
            Some(error) => PredictionResult::new(
                vec![[0.0; 3]; LANDMARK_COUNT],
                error,
                Duration::from_millis(5),
            ),
            None => Err(PredictorError::Timeout { seconds: 300 }),
        }
    }
}

/// Box-shaped face-like cloud: tallest along Y, shallowest along Z.
pub fn face_cloud(offset: [f64; 3], scale: f64) -> PointCloud {
    let mut points = Vec::new();
    for i in 0..6 {
        for j in 0..8 {
            for k in 0..3 {
                points.push([
                    offset[0] + scale * (i as f64 * 20.0),
                    offset[1] + scale * (j as f64 * 25.0),
                    offset[2] + scale * (k as f64 * 15.0 + (i * j) as f64 * 0.1),
                ]);
            }
        }
    }
    PointCloud::from_points(points).unwrap()
}
