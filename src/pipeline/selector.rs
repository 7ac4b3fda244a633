//! Per-scan strategy selection.
//!
//! Candidates are tried in priority order. The first score strictly below
//! the threshold ends the search; otherwise the lowest score wins, with ties
//! going to the earlier candidate.

use std::sync::Arc;
use tracing::{debug, warn};

use super::{
    AlignmentParams, AlignmentResult, AttemptOutcome, IntermediateWriter, PredictionResult,
    ScanFailure, ScanRecord, StrategyAttempt,
};
use crate::data::PointCloud;
use crate::error::{AlignError, ReasonCode};
use crate::logging::{self, ScanSpan, StrategySpan};
use crate::predictor::{LandmarkPredictor, PredictionRequest, PredictorConfig, PredictorError};
use crate::strategies::AlignmentStrategy;

/// Outcome of selecting a strategy for one scan.
#[derive(Debug)]
pub struct Selection {
    pub record: ScanRecord,
    /// Aligned cloud and prediction of the chosen strategy.
    pub best: Option<(AlignmentResult, PredictionResult)>,
}

impl Selection {
    pub fn chosen_strategy(&self) -> Option<&str> {
        self.record.chosen_strategy_id.as_deref()
    }
}

pub struct StrategySelector {
    predictor: Arc<dyn LandmarkPredictor>,
    predictor_config: PredictorConfig,
    writer: Option<Arc<dyn IntermediateWriter>>,
}

impl StrategySelector {
    pub fn new(predictor: Arc<dyn LandmarkPredictor>, predictor_config: PredictorConfig) -> Self {
        Self {
            predictor,
            predictor_config,
            writer: None,
        }
    }

    /// Persist aligned clouds whose parameters ask for it.
    pub fn with_writer(mut self, writer: Arc<dyn IntermediateWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn predictor_name(&self) -> &str {
        self.predictor.name()
    }

    pub fn select(
        &self,
        file_id: &str,
        category: Option<&str>,
        cloud: &PointCloud,
        candidates: &[Arc<dyn AlignmentStrategy>],
        threshold: f64,
    ) -> Selection {
        let scan_span = ScanSpan::new(file_id, category, logging::get_correlation_id());
        let _enter = scan_span.enter();

        let mut record = ScanRecord::new(file_id, category.map(String::from));
        let mut best: Option<(AlignmentResult, PredictionResult)> = None;
        let mut last_failure: Option<ScanFailure> = None;

        for strategy in candidates {
            let span = StrategySpan::new(strategy.id());
            let _strategy = span.enter();

            match self.attempt(file_id, cloud, strategy.as_ref(), &span) {
                Ok((aligned, prediction, retried)) => {
                    let error = prediction.error();
                    span.record_prediction(error, retried);
                    record.attempts.push(StrategyAttempt {
                        strategy_id: strategy.id().to_string(),
                        outcome: AttemptOutcome::Scored {
                            error,
                            elapsed_ms: prediction.elapsed().as_secs_f64() * 1000.0,
                            retried,
                        },
                    });

                    let improves = best
                        .as_ref()
                        .map_or(true, |(_, current)| error < current.error());
                    if improves {
                        best = Some((aligned, prediction));
                    }
                    if error < threshold {
                        debug!(strategy = strategy.id(), error, threshold, "Below threshold, stopping early");
                        break;
                    }
                }
                Err(failure) => {
                    span.record_failure(&failure.reason.to_string(), &failure.message);
                    record.attempts.push(StrategyAttempt {
                        strategy_id: strategy.id().to_string(),
                        outcome: AttemptOutcome::Failed {
                            reason: failure.reason,
                            message: failure.message.clone(),
                        },
                    });
                    last_failure = Some(failure);
                }
            }
        }

        match &best {
            Some((aligned, prediction)) => {
                record.chosen_strategy_id = Some(aligned.strategy_id().to_string());
                record.chosen_error = Some(prediction.error());
            }
            None => {
                record.failure = Some(last_failure.unwrap_or_else(|| ScanFailure {
                    reason: ReasonCode::ConfigError,
                    message: "no candidate strategies".to_string(),
                }));
            }
        }

        scan_span.record_choice(
            best.as_ref()
                .map(|(aligned, prediction)| (aligned.strategy_id(), prediction.error())),
            record.attempts.len(),
        );

        Selection { record, best }
    }

    /// Runs one strategy: estimate, align, predict, and on predictor failure
    /// retry once with the strategy's default parameters.
    fn attempt(
        &self,
        file_id: &str,
        cloud: &PointCloud,
        strategy: &dyn AlignmentStrategy,
        span: &StrategySpan,
    ) -> Result<(AlignmentResult, PredictionResult, bool), ScanFailure> {
        let to_failure = |e: AlignError| ScanFailure {
            reason: e.reason_code(),
            message: e.to_string(),
        };
        let params = strategy.compute_params(cloud).map_err(to_failure)?;
        record_params(span, &params);

        let aligned = strategy.apply(cloud, params).map_err(to_failure)?;
        match self.predict(file_id, &aligned) {
            Ok(prediction) => return Ok((aligned, prediction, false)),
            Err(e) => warn!(
                file_id,
                strategy = strategy.id(),
                error = %e,
                "Prediction failed, retrying with default parameters"
            ),
        }

        let defaults = strategy.default_params();
        record_params(span, &defaults);
        let aligned = strategy.apply(cloud, defaults).map_err(to_failure)?;
        self.predict(file_id, &aligned)
            .map(|prediction| (aligned, prediction, true))
            .map_err(|e| ScanFailure {
                reason: ReasonCode::PredictorError,
                message: e.to_string(),
            })
    }

    fn predict(&self, file_id: &str, aligned: &AlignmentResult) -> Result<PredictionResult, PredictorError> {
        if aligned.params().write_intermediate() {
            match &self.writer {
                Some(writer) => match writer.write(file_id, aligned) {
                    Ok(path) => debug!(path = %path.display(), "Wrote pre-aligned scan"),
                    Err(e) => warn!(file_id, error = %e, "Could not write pre-aligned scan"),
                },
                None => warn!(
                    file_id,
                    strategy = aligned.strategy_id(),
                    "Pre-aligned scan requested but no intermediate writer is configured"
                ),
            }
        }

        let config = self.predictor_config.for_strategy(aligned.strategy_id());
        self.predictor.predict(&PredictionRequest {
            file_id,
            strategy_id: aligned.strategy_id(),
            cloud: aligned.transformed(),
            config: &config,
        })
    }
}

fn record_params(span: &StrategySpan, params: &AlignmentParams) {
    span.record_params(
        params.rotation(),
        params.scale(),
        params.offset(),
        params.align_center_of_mass(),
    );
}
