use std::sync::Mutex;
use std::time::Duration;

use super::{CommandPredictor, LandmarkPredictor, PredictionRequest, PredictorError};
use crate::config::PredictorSettings;
use crate::logging::global_metrics;
use crate::logging::metrics::Timer;
use crate::pipeline::PredictionResult;

/// One predictor per device. Calls on the same device are serialized; calls
/// on different devices run in parallel. The calling worker's rayon thread
/// index picks the device.
pub struct PredictorPool {
    devices: Vec<Mutex<Box<dyn LandmarkPredictor>>>,
}

impl PredictorPool {
    pub fn new(devices: Vec<Box<dyn LandmarkPredictor>>) -> Self {
        Self {
            devices: devices.into_iter().map(Mutex::new).collect(),
        }
    }

    /// Builds a command-backed pool, or `None` when no predictor program is
    /// configured.
    pub fn from_settings(settings: &PredictorSettings) -> Option<Self> {
        let program = settings.program.as_ref()?;
        let timeout = Duration::from_secs(settings.timeout_secs);
        let base = CommandPredictor::new(program, settings.args.clone(), timeout);

        let devices: Vec<Box<dyn LandmarkPredictor>> = if settings.devices.is_empty() {
            vec![Box::new(base)]
        } else {
            settings
                .devices
                .iter()
                .map(|device| {
                    Box::new(base.clone().with_env("CUDA_VISIBLE_DEVICES", device.clone()))
                        as Box<dyn LandmarkPredictor>
                })
                .collect()
        };
        Some(Self::new(devices))
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    fn device_index(&self) -> usize {
        rayon::current_thread_index().unwrap_or(0) % self.devices.len().max(1)
    }
}

impl LandmarkPredictor for PredictorPool {
    fn name(&self) -> &str {
        "pool"
    }

    fn predict(&self, request: &PredictionRequest<'_>) -> Result<PredictionResult, PredictorError> {
        let index = self.device_index();
        let device = self
            .devices
            .get(index)
            .ok_or_else(|| PredictorError::Unavailable("predictor pool is empty".to_string()))?;
        let predictor = device
            .lock()
            .map_err(|_| PredictorError::Unavailable(format!("device {} lock poisoned", index)))?;

        let timer = Timer::start(&format!("predict_{}", request.strategy_id), crate::logging::get_correlation_id())
            .with_collector(global_metrics())
            .with_metadata("device", serde_json::json!(index));
        let result = predictor.predict(request);
        timer
            .with_metadata("success", serde_json::json!(result.is_ok()))
            .stop();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::PointCloud;
    use crate::pipeline::LANDMARK_COUNT;
    use crate::predictor::PredictorConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting {
        calls: Arc<AtomicUsize>,
    }

    impl LandmarkPredictor for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn predict(&self, _request: &PredictionRequest<'_>) -> Result<PredictionResult, PredictorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            PredictionResult::new(vec![[0.0; 3]; LANDMARK_COUNT], 1.0, Duration::ZERO)
        }
    }

    #[test]
    fn test_no_program_means_no_pool() {
        assert!(PredictorPool::from_settings(&PredictorSettings::default()).is_none());
    }

    #[test]
    fn test_one_device_per_configured_gpu() {
        let settings = PredictorSettings {
            program: Some("python".into()),
            devices: vec!["0".into(), "1".into(), "2".into()],
            ..PredictorSettings::default()
        };
        assert_eq!(PredictorPool::from_settings(&settings).unwrap().device_count(), 3);
    }

    #[test]
    fn test_calls_reach_a_device() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pool = PredictorPool::new(vec![Box::new(Counting { calls: calls.clone() })]);
        let cloud = PointCloud::from_points(vec![[0.0, 0.0, 0.0]]).unwrap();
        let config = PredictorConfig::default();
        let request = PredictionRequest {
            file_id: "1",
            strategy_id: "center",
            cloud: &cloud,
            config: &config,
        };
        assert!(pool.predict(&request).is_ok());
        assert!(pool.predict(&request).is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
