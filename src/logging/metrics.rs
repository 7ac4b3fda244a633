//! Performance metrics collection
//!
//! Lightweight timing of predictor calls and other operations, with summary
//! statistics per operation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

const MAX_MEASUREMENTS: usize = 10_000;

/// Individual performance measurement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMeasurement {
    pub operation: String,
    pub duration_ms: f64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub correlation_id: Option<Uuid>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Statistical summary of performance measurements
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub operation: String,
    pub count: usize,
    pub mean_ms: f64,
    pub median_ms: f64,
    pub std_dev_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

/// Predictor timing for one strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyMetrics {
    pub strategy_id: String,
    pub predictions: usize,
    pub successful_predictions: usize,
    pub prediction_stats: Option<PerformanceStats>,
}

/// Thread-safe metrics collector
pub struct MetricsCollector {
    measurements: Arc<Mutex<Vec<PerformanceMeasurement>>>,
    enabled: bool,
}

impl MetricsCollector {
    pub fn new(enabled: bool) -> Self {
        Self {
            measurements: Arc::new(Mutex::new(Vec::new())),
            enabled,
        }
    }

    /// Record a performance measurement
    pub fn record(&self, operation: &str, duration: Duration, correlation_id: Option<Uuid>) {
        self.record_with_metadata(operation, duration, correlation_id, HashMap::new());
    }

    /// Record a measurement with additional metadata
    pub fn record_with_metadata(
        &self,
        operation: &str,
        duration: Duration,
        correlation_id: Option<Uuid>,
        metadata: HashMap<String, serde_json::Value>,
    ) {
        if !self.enabled {
            return;
        }

        let measurement = PerformanceMeasurement {
            operation: operation.to_string(),
            duration_ms: duration.as_secs_f64() * 1000.0,
            timestamp: chrono::Utc::now(),
            correlation_id,
            metadata,
        };

        if let Ok(mut measurements) = self.measurements.lock() {
            measurements.push(measurement);

            // keep memory bounded on long corpus runs
            if measurements.len() > MAX_MEASUREMENTS {
                measurements.drain(0..MAX_MEASUREMENTS / 2);
            }
        }
    }

    /// Get all measurements for a specific operation
    pub fn get_measurements(&self, operation: &str) -> Vec<PerformanceMeasurement> {
        match self.measurements.lock() {
            Ok(measurements) => measurements
                .iter()
                .filter(|m| m.operation == operation)
                .cloned()
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Get measurements by correlation ID
    pub fn get_measurements_by_correlation(&self, correlation_id: Uuid) -> Vec<PerformanceMeasurement> {
        match self.measurements.lock() {
            Ok(measurements) => measurements
                .iter()
                .filter(|m| m.correlation_id == Some(correlation_id))
                .cloned()
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Calculate performance statistics for an operation
    pub fn calculate_stats(&self, operation: &str) -> Option<PerformanceStats> {
        let measurements = self.get_measurements(operation);
        if measurements.is_empty() {
            return None;
        }

        let mut durations: Vec<f64> = measurements.iter().map(|m| m.duration_ms).collect();
        durations.sort_by(f64::total_cmp);

        let count = durations.len();
        let mean = durations.iter().sum::<f64>() / count as f64;

        let variance: f64 = durations
            .iter()
            .map(|d| {
                let diff = d - mean;
                diff * diff
            })
            .sum::<f64>()
            / count as f64;

        let median = if count % 2 == 0 {
            (durations[count / 2 - 1] + durations[count / 2]) / 2.0
        } else {
            durations[count / 2]
        };

        let p95_index = ((count as f64) * 0.95) as usize;
        let p99_index = ((count as f64) * 0.99) as usize;

        Some(PerformanceStats {
            operation: operation.to_string(),
            count,
            mean_ms: mean,
            median_ms: median,
            std_dev_ms: variance.sqrt(),
            min_ms: durations[0],
            max_ms: durations[count - 1],
            p95_ms: durations[p95_index.min(count - 1)],
            p99_ms: durations[p99_index.min(count - 1)],
        })
    }

    /// Predictor timing for a strategy, recorded under `predict_<strategy>`
    pub fn get_strategy_metrics(&self, strategy_id: &str) -> Option<StrategyMetrics> {
        let operation = format!("predict_{}", strategy_id);
        let measurements = self.get_measurements(&operation);
        if measurements.is_empty() {
            return None;
        }

        let successful_predictions = measurements
            .iter()
            .filter(|m| {
                m.metadata
                    .get("success")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(true)
            })
            .count();

        Some(StrategyMetrics {
            strategy_id: strategy_id.to_string(),
            predictions: measurements.len(),
            successful_predictions,
            prediction_stats: self.calculate_stats(&operation),
        })
    }

    pub fn clear(&self) {
        if let Ok(mut measurements) = self.measurements.lock() {
            measurements.clear();
        }
    }

    pub fn measurement_count(&self) -> usize {
        self.measurements.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Export measurements to JSON
    pub fn export_to_json(&self) -> Result<String, serde_json::Error> {
        match self.measurements.lock() {
            Ok(measurements) => serde_json::to_string_pretty(&*measurements),
            Err(_) => Ok("[]".to_string()),
        }
    }
}

/// Timer for measuring execution time
pub struct Timer<'a> {
    start: Instant,
    operation: String,
    correlation_id: Option<Uuid>,
    collector: Option<&'a MetricsCollector>,
    metadata: HashMap<String, serde_json::Value>,
}

impl<'a> Timer<'a> {
    /// Start a new timer
    pub fn start(operation: &str, correlation_id: Option<Uuid>) -> Self {
        Self {
            start: Instant::now(),
            operation: operation.to_string(),
            correlation_id,
            collector: None,
            metadata: HashMap::new(),
        }
    }

    /// Record into `collector` when stopped
    pub fn with_collector(mut self, collector: &'a MetricsCollector) -> Self {
        self.collector = Some(collector);
        self
    }

    /// Add metadata to the timer
    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Stop the timer and record the measurement
    pub fn stop(self) -> Duration {
        let duration = self.start.elapsed();

        if let Some(collector) = self.collector {
            collector.record_with_metadata(
                &self.operation,
                duration,
                self.correlation_id,
                self.metadata,
            );
        }

        tracing::debug!(
            operation = %self.operation,
            duration_ms = duration.as_millis(),
            correlation_id = ?self.correlation_id,
            "Timer completed"
        );

        duration
    }
}

lazy_static::lazy_static! {
    static ref GLOBAL_METRICS: MetricsCollector = MetricsCollector::new(true);
}

/// Get the global metrics collector
pub fn global_metrics() -> &'static MetricsCollector {
    &GLOBAL_METRICS
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_metrics_collector() {
        let collector = MetricsCollector::new(true);
        let correlation_id = Uuid::new_v4();

        collector.record("predict_center", Duration::from_millis(100), Some(correlation_id));
        collector.record("predict_center", Duration::from_millis(150), Some(correlation_id));
        collector.record("predict_center", Duration::from_millis(200), None);

        assert_eq!(collector.get_measurements("predict_center").len(), 3);
        assert_eq!(collector.get_measurements_by_correlation(correlation_id).len(), 2);

        let stats = collector.calculate_stats("predict_center").unwrap();
        assert_eq!(stats.count, 3);
        assert!((stats.mean_ms - 150.0).abs() < 1.0);
        assert!((stats.median_ms - 150.0).abs() < 1.0);
    }

    #[test]
    fn test_timer_records_strategy_metrics() {
        let collector = MetricsCollector::new(true);
        let correlation_id = Uuid::new_v4();

        let timer = Timer::start("predict_anatomical", Some(correlation_id))
            .with_collector(&collector)
            .with_metadata("success", serde_json::json!(false));
        thread::sleep(Duration::from_millis(10));
        let duration = timer.stop();
        assert!(duration >= Duration::from_millis(10));

        Timer::start("predict_anatomical", None)
            .with_collector(&collector)
            .stop();

        let metrics = collector.get_strategy_metrics("anatomical").unwrap();
        assert_eq!(metrics.predictions, 2);
        assert_eq!(metrics.successful_predictions, 1);
        assert!(collector.get_strategy_metrics("reference").is_none());
    }

    #[test]
    fn test_disabled_collector() {
        let collector = MetricsCollector::new(false);
        collector.record("test", Duration::from_millis(100), None);
        assert_eq!(collector.measurement_count(), 0);
    }
}
