//! Structured spans for hierarchical logging
//!
//! A batch span wraps scan spans, which wrap one strategy span per attempted
//! pre-alignment. Fields filled in later are declared empty up front.

use std::time::Instant;
use tracing::{field, span, Level, Span};
use uuid::Uuid;

/// Span covering one corpus run
pub struct BatchSpan {
    span: Span,
    start_time: Instant,
    run_id: Uuid,
}

impl BatchSpan {
    pub fn new(run_id: Uuid, candidates: &[String], threshold: f64, scans: usize) -> Self {
        let span = span!(
            Level::INFO,
            "batch_run",
            run_id = %run_id,
            candidates = %candidates.join(","),
            threshold = threshold,
            scans = scans,
            processed = field::Empty,
            successes = field::Empty,
            failures = field::Empty,
            duration_ms = field::Empty,
        );

        Self {
            span,
            start_time: Instant::now(),
            run_id,
        }
    }

    /// Record progress after a scan has been merged
    pub fn record_progress(&self, processed: usize, total: usize, file_id: &str, success: bool) {
        self.span.record("processed", processed);
        tracing::info!(
            parent: &self.span,
            processed = processed,
            total = total,
            file_id = file_id,
            success = success,
            "Scan merged"
        );
    }

    /// Record run completion
    pub fn record_completion(&self, successes: usize, failures: usize, cancelled: bool) {
        let duration = self.start_time.elapsed();
        self.span.record("successes", successes);
        self.span.record("failures", failures);
        self.span.record("duration_ms", duration.as_millis() as u64);

        let total = successes + failures;
        let success_rate = if total > 0 {
            successes as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        tracing::info!(
            parent: &self.span,
            successes = successes,
            failures = failures,
            success_rate = format!("{:.1}%", success_rate),
            cancelled = cancelled,
            duration_ms = duration.as_millis() as u64,
            "Batch run completed"
        );
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Enter the span context
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

/// Span covering strategy selection for one scan
pub struct ScanSpan {
    span: Span,
    start_time: Instant,
}

impl ScanSpan {
    pub fn new(file_id: &str, category: Option<&str>, correlation_id: Option<Uuid>) -> Self {
        let span = if let Some(corr_id) = correlation_id {
            span!(
                Level::INFO,
                "scan",
                file_id = file_id,
                category = category,
                correlation_id = %corr_id,
                chosen_strategy = field::Empty,
                chosen_error = field::Empty,
            )
        } else {
            span!(
                Level::INFO,
                "scan",
                file_id = file_id,
                category = category,
                chosen_strategy = field::Empty,
                chosen_error = field::Empty,
            )
        };

        Self {
            span,
            start_time: Instant::now(),
        }
    }

    /// Record the strategy kept for the scan, if any
    pub fn record_choice(&self, chosen: Option<(&str, f64)>, attempts: usize) {
        let duration = self.start_time.elapsed();
        match chosen {
            Some((strategy, error)) => {
                self.span.record("chosen_strategy", strategy);
                self.span.record("chosen_error", error);
                tracing::info!(
                    parent: &self.span,
                    strategy = strategy,
                    error = error,
                    attempts = attempts,
                    duration_ms = duration.as_millis() as u64,
                    "Strategy selected"
                );
            }
            None => tracing::warn!(
                parent: &self.span,
                attempts = attempts,
                duration_ms = duration.as_millis() as u64,
                "No strategy produced a score"
            ),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Enter the span context
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

/// Span covering one strategy attempt: parameters, transform and prediction
pub struct StrategySpan {
    span: Span,
    start_time: Instant,
}

impl StrategySpan {
    pub fn new(strategy_id: &str) -> Self {
        let span = span!(
            Level::DEBUG,
            "strategy_attempt",
            strategy = strategy_id,
            error = field::Empty,
            retried = field::Empty,
        );

        Self {
            span,
            start_time: Instant::now(),
        }
    }

    /// Record the computed pre-alignment parameters
    pub fn record_params(&self, rotation: [f64; 3], scale: f64, offset: [f64; 3], centered: bool) {
        tracing::debug!(
            parent: &self.span,
            rot_x = rotation[0],
            rot_y = rotation[1],
            rot_z = rotation[2],
            scale = scale,
            offset = ?offset,
            centered = centered,
            "Parameters computed"
        );
    }

    /// Record a predictor score
    pub fn record_prediction(&self, error: f64, retried: bool) {
        self.span.record("error", error);
        self.span.record("retried", retried);
        tracing::info!(
            parent: &self.span,
            error = error,
            retried = retried,
            duration_ms = self.start_time.elapsed().as_millis() as u64,
            "Prediction scored"
        );
    }

    /// Record an attempt that produced no score
    pub fn record_failure(&self, reason: &str, message: &str) {
        tracing::warn!(
            parent: &self.span,
            reason = reason,
            message = message,
            duration_ms = self.start_time.elapsed().as_millis() as u64,
            "Strategy attempt failed"
        );
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Enter the span context
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}
