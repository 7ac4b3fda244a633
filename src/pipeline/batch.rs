//! Corpus-wide strategy selection.
//!
//! Scans are processed independently, inline or on a bounded rayon pool.
//! Finished records go over a channel to a single merge loop that owns the
//! report, so the report never needs a lock.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use rayon::prelude::*;
use tracing::{info, warn};

use super::{CorpusReport, ScanRecord, StrategySelector};
use crate::analysis::TierThresholds;
use crate::data::{load_cloud, DiscoveredScan, PointCloud};
use crate::error::{AlignError, ReasonCode};
use crate::logging::{BatchSpan, CorrelationScope};
use crate::strategies::AlignmentStrategy;

/// Where a corpus item's geometry comes from.
#[derive(Debug, Clone)]
pub enum ScanSource {
    Cloud(PointCloud),
    /// Decoded by the worker; decode failures only fail this item.
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct CorpusItem {
    pub file_id: String,
    pub category: Option<String>,
    pub source: ScanSource,
}

impl CorpusItem {
    pub fn from_cloud(file_id: impl Into<String>, category: Option<String>, cloud: PointCloud) -> Self {
        Self {
            file_id: file_id.into(),
            category,
            source: ScanSource::Cloud(cloud),
        }
    }

    pub fn from_file(file_id: impl Into<String>, category: Option<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            file_id: file_id.into(),
            category,
            source: ScanSource::File(path.into()),
        }
    }
}

/// Corpus items for scans found by [`crate::data::discover_scans`].
pub fn corpus_from_discovered(scans: Vec<DiscoveredScan>) -> Vec<CorpusItem> {
    scans
        .into_iter()
        .map(|scan| CorpusItem::from_file(scan.file_id, scan.category, scan.path))
        .collect()
}

/// Keeps the items an earlier run left poor, failed or unprocessed.
pub fn retain_for_retry(
    corpus: Vec<CorpusItem>,
    previous: &CorpusReport,
    tiers: &TierThresholds,
) -> Vec<CorpusItem> {
    let wanted = previous.retry_candidates(tiers);
    corpus
        .into_iter()
        .filter(|item| wanted.contains(&item.file_id))
        .collect()
}

/// Incremental report persistence.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub path: PathBuf,
    /// Persist after every N merged records; the final report is always written.
    pub every: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub workers: usize,
    pub stop_after_failures: Option<usize>,
    pub checkpoint: Option<Checkpoint>,
    pub tiers: TierThresholds,
    /// External cancellation, e.g. Ctrl-C.
    pub cancel: Arc<AtomicBool>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            stop_after_failures: None,
            checkpoint: None,
            tiers: TierThresholds::default(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

enum Outcome {
    Done(ScanRecord),
    /// Corpus index of an item never started because the run was stopped.
    Skipped(usize),
}

pub struct BatchOrchestrator {
    selector: StrategySelector,
    options: BatchOptions,
}

impl BatchOrchestrator {
    pub fn new(selector: StrategySelector, options: BatchOptions) -> Self {
        Self { selector, options }
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Runs selection over the corpus. Per-scan failures end up in the
    /// report; only checkpoint or pool failures abort the run.
    pub fn run(
        &self,
        corpus: &[CorpusItem],
        candidates: &[Arc<dyn AlignmentStrategy>],
        threshold: f64,
    ) -> Result<CorpusReport, AlignError> {
        let ids: Vec<String> = candidates.iter().map(|s| s.id().to_string()).collect();
        let mut report = CorpusReport::new(threshold, ids.clone());
        let span = BatchSpan::new(report.run_id, &ids, threshold, corpus.len());
        let _enter = span.enter();

        info!(
            scans = corpus.len(),
            workers = self.options.workers,
            predictor = self.selector.predictor_name(),
            "Starting batch run"
        );

        let stop = AtomicBool::new(false);
        let mut merger = Merger {
            options: &self.options,
            report: &mut report,
            span: &span,
            stop: &stop,
            total: corpus.len(),
            skipped: Vec::new(),
            error: None,
        };

        if self.options.workers <= 1 {
            for (index, item) in corpus.iter().enumerate() {
                let outcome = self.process(index, item, candidates, threshold, &stop);
                merger.accept(outcome);
            }
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.options.workers)
                .thread_name(|i| format!("prealign-worker-{}", i))
                .build()
                .map_err(|e| AlignError::config(format!("cannot start worker pool: {}", e)))?;

            let (tx, rx) = mpsc::channel();
            thread::scope(|scope| {
                scope.spawn(|| {
                    pool.install(|| {
                        corpus.par_iter().enumerate().for_each_with(tx, |tx, (index, item)| {
                            let outcome = self.process(index, item, candidates, threshold, &stop);
                            // receiver only goes away when the merge loop is done
                            let _ = tx.send(outcome);
                        });
                    });
                });

                for outcome in rx {
                    merger.accept(outcome);
                }
            });
        }

        let Merger { mut skipped, error, .. } = merger;
        if let Some(error) = error {
            return Err(error);
        }

        skipped.sort_unstable();
        report.not_processed = skipped.into_iter().map(|i| corpus[i].file_id.clone()).collect();
        report.cancelled = stop.load(Ordering::SeqCst) || self.options.cancel.load(Ordering::SeqCst);
        report.finish();

        if let Some(checkpoint) = &self.options.checkpoint {
            report.persist(&checkpoint.path)?;
        }

        span.record_completion(report.success_count, report.failure_count, report.cancelled);
        Ok(report)
    }

    fn process(
        &self,
        index: usize,
        item: &CorpusItem,
        candidates: &[Arc<dyn AlignmentStrategy>],
        threshold: f64,
        stop: &AtomicBool,
    ) -> Outcome {
        if stop.load(Ordering::SeqCst) || self.options.cancel.load(Ordering::SeqCst) {
            return Outcome::Skipped(index);
        }

        let _correlation = CorrelationScope::enter();
        let record = match &item.source {
            ScanSource::Cloud(cloud) => self.select(item, cloud, candidates, threshold),
            ScanSource::File(path) => match load_cloud(path) {
                Ok(cloud) => self.select(item, &cloud, candidates, threshold),
                Err(source) => {
                    let error = AlignError::Input {
                        file_id: item.file_id.clone(),
                        source,
                    };
                    warn!(file_id = %item.file_id, error = %error, "Could not load scan");
                    ScanRecord::failed(
                        item.file_id.clone(),
                        item.category.clone(),
                        ReasonCode::InputError,
                        error.to_string(),
                    )
                }
            },
        };

        Outcome::Done(record)
    }

    fn select(
        &self,
        item: &CorpusItem,
        cloud: &PointCloud,
        candidates: &[Arc<dyn AlignmentStrategy>],
        threshold: f64,
    ) -> ScanRecord {
        self.selector
            .select(&item.file_id, item.category.as_deref(), cloud, candidates, threshold)
            .record
    }
}

/// State of the single merge loop.
struct Merger<'a> {
    options: &'a BatchOptions,
    report: &'a mut CorpusReport,
    span: &'a BatchSpan,
    stop: &'a AtomicBool,
    total: usize,
    skipped: Vec<usize>,
    error: Option<AlignError>,
}

impl Merger<'_> {
    fn accept(&mut self, outcome: Outcome) {
        let record = match outcome {
            Outcome::Done(record) => record,
            Outcome::Skipped(index) => {
                self.skipped.push(index);
                return;
            }
        };

        let tier = self.options.tiers.classify(record.chosen_error);
        let record = record.with_tier(tier);
        let file_id = record.file_id.clone();
        let success = record.is_success(self.report.threshold_used);
        self.report.merge(record);
        self.span.record_progress(self.report.len(), self.total, &file_id, success);

        if let Some(limit) = self.options.stop_after_failures {
            if self.report.failure_count >= limit && !self.stop.swap(true, Ordering::SeqCst) {
                warn!(failures = self.report.failure_count, limit, "Failure limit reached, stopping");
            }
        }

        if let Some(Checkpoint { path, every: Some(every) }) = &self.options.checkpoint {
            if self.error.is_none() && *every > 0 && self.report.len() % every == 0 {
                if let Err(e) = self.report.persist(path) {
                    warn!(error = %e, "Checkpoint failed, stopping");
                    self.stop.store(true, Ordering::SeqCst);
                    self.error = Some(e);
                }
            }
        }
    }
}
