use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::pipeline::{CorpusReport, UNCATEGORIZED};

/// Quality bucket for a chosen consensus error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceTier {
    Excellent,
    VeryGood,
    Good,
    Poor,
    Failed,
}

impl std::fmt::Display for PerformanceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            PerformanceTier::Excellent => "excellent",
            PerformanceTier::VeryGood => "very_good",
            PerformanceTier::Good => "good",
            PerformanceTier::Poor => "poor",
            PerformanceTier::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Upper bounds (exclusive) of each tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierThresholds {
    pub excellent: f64,
    pub very_good: f64,
    pub good: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            excellent: 10.0,
            very_good: 100.0,
            good: 10_000.0,
        }
    }
}

impl TierThresholds {
    pub fn classify(&self, error: Option<f64>) -> PerformanceTier {
        match error {
            None => PerformanceTier::Failed,
            Some(e) if e < self.excellent => PerformanceTier::Excellent,
            Some(e) if e < self.very_good => PerformanceTier::VeryGood,
            Some(e) if e < self.good => PerformanceTier::Good,
            Some(_) => PerformanceTier::Poor,
        }
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let bounds = [self.excellent, self.very_good, self.good];
        if bounds.iter().any(|b| !b.is_finite() || *b <= 0.0) {
            errors.push("tier bounds must be finite and > 0".to_string());
        }
        if !(self.excellent < self.very_good && self.very_good < self.good) {
            errors.push("tier bounds must increase: excellent < very_good < good".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Descriptive statistics over chosen errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorStatistics {
    pub count: usize,
    pub best: f64,
    pub worst: f64,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
}

impl ErrorStatistics {
    pub fn from_errors(errors: &[f64]) -> Option<Self> {
        if errors.is_empty() {
            return None;
        }

        let mut sorted = errors.to_vec();
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len();
        let mean = sorted.iter().sum::<f64>() / count as f64;
        let variance = sorted
            .iter()
            .map(|e| {
                let diff = e - mean;
                diff * diff
            })
            .sum::<f64>()
            / count as f64;
        let median = if count % 2 == 0 {
            (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
        } else {
            sorted[count / 2]
        };

        Some(Self {
            count,
            best: sorted[0],
            worst: sorted[count - 1],
            mean,
            median,
            std_dev: variance.sqrt(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedScan {
    pub file_id: String,
    pub category: Option<String>,
    pub strategy_id: String,
    pub error: f64,
    pub tier: PerformanceTier,
}

/// Corpus-level summary derived from a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusSummary {
    pub total: usize,
    pub successes: usize,
    pub failures: usize,
    pub not_processed: usize,
    /// Percentage of processed scans that succeeded.
    pub success_rate: f64,
    pub threshold: f64,
    pub errors: Option<ErrorStatistics>,
    pub strategy_distribution: BTreeMap<String, usize>,
    pub tier_breakdown: BTreeMap<PerformanceTier, usize>,
    pub category_mean_error: BTreeMap<String, f64>,
    /// Every scored scan, best first.
    pub ranking: Vec<RankedScan>,
    /// Scans in the poor tier, worst first.
    pub poor_performers: Vec<RankedScan>,
    pub failed_scans: Vec<String>,
}

impl CorpusSummary {
    pub fn from_report(report: &CorpusReport, tiers: &TierThresholds) -> Self {
        let mut ranking = Vec::new();
        let mut strategy_distribution = BTreeMap::new();
        let mut tier_breakdown = BTreeMap::new();
        let mut category_errors: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        let mut failed_scans = Vec::new();

        for record in report.records.values() {
            let tier = tiers.classify(record.chosen_error);
            *tier_breakdown.entry(tier).or_insert(0) += 1;

            match (&record.chosen_strategy_id, record.chosen_error) {
                (Some(strategy), Some(error)) => {
                    *strategy_distribution.entry(strategy.clone()).or_insert(0) += 1;
                    let category = record
                        .category
                        .clone()
                        .unwrap_or_else(|| UNCATEGORIZED.to_string());
                    category_errors.entry(category).or_default().push(error);
                    ranking.push(RankedScan {
                        file_id: record.file_id.clone(),
                        category: record.category.clone(),
                        strategy_id: strategy.clone(),
                        error,
                        tier,
                    });
                }
                _ => failed_scans.push(record.file_id.clone()),
            }
        }

        ranking.sort_by(|a, b| a.error.total_cmp(&b.error).then_with(|| a.file_id.cmp(&b.file_id)));

        let mut poor_performers: Vec<RankedScan> = ranking
            .iter()
            .filter(|r| r.tier == PerformanceTier::Poor)
            .cloned()
            .collect();
        poor_performers.reverse();

        let errors: Vec<f64> = ranking.iter().map(|r| r.error).collect();
        let category_mean_error = category_errors
            .into_iter()
            .map(|(category, errors)| {
                let mean = errors.iter().sum::<f64>() / errors.len() as f64;
                (category, mean)
            })
            .collect();

        let processed = report.records.len();
        let success_rate = if processed == 0 {
            0.0
        } else {
            report.success_count as f64 / processed as f64 * 100.0
        };

        Self {
            total: processed,
            successes: report.success_count,
            failures: report.failure_count,
            not_processed: report.not_processed.len(),
            success_rate,
            threshold: report.threshold_used,
            errors: ErrorStatistics::from_errors(&errors),
            strategy_distribution,
            tier_breakdown,
            category_mean_error,
            ranking,
            poor_performers,
            failed_scans,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReasonCode;
    use crate::pipeline::ScanRecord;

    fn chosen(file_id: &str, category: &str, strategy: &str, error: f64) -> ScanRecord {
        let mut record = ScanRecord::new(file_id, Some(category.to_string()));
        record.chosen_strategy_id = Some(strategy.to_string());
        record.chosen_error = Some(error);
        record
    }

    #[test]
    fn test_tier_boundaries() {
        let tiers = TierThresholds::default();
        assert_eq!(tiers.classify(Some(9.99)), PerformanceTier::Excellent);
        assert_eq!(tiers.classify(Some(10.0)), PerformanceTier::VeryGood);
        assert_eq!(tiers.classify(Some(100.0)), PerformanceTier::Good);
        assert_eq!(tiers.classify(Some(10_000.0)), PerformanceTier::Poor);
        assert_eq!(tiers.classify(None), PerformanceTier::Failed);
    }

    #[test]
    fn test_tier_validation() {
        assert!(TierThresholds::default().validate().is_ok());
        let bad = TierThresholds {
            excellent: 50.0,
            very_good: 20.0,
            good: -1.0,
        };
        assert_eq!(bad.validate().unwrap_err().len(), 2);
    }

    #[test]
    fn test_error_statistics() {
        let stats = ErrorStatistics::from_errors(&[4.0, 1.0, 3.0, 2.0]).unwrap();
        assert_eq!(stats.best, 1.0);
        assert_eq!(stats.worst, 4.0);
        assert_eq!(stats.mean, 2.5);
        assert_eq!(stats.median, 2.5);
        assert!((stats.std_dev - 1.118_033_988).abs() < 1e-6);
        assert!(ErrorStatistics::from_errors(&[]).is_none());
    }

    #[test]
    fn test_summary_from_report() {
        let mut report = CorpusReport::new(10.0, vec!["hybrid".into()]);
        report.merge(chosen("men/1", "men", "anatomical", 3.0));
        report.merge(chosen("men/2", "men", "reference", 50.0));
        report.merge(chosen("women/1", "women", "anatomical", 20_000.0));
        report.merge(chosen("women/2", "women", "anatomical", 12_000.0));
        report.merge(ScanRecord::failed(
            "women/3",
            Some("women".into()),
            ReasonCode::PredictorError,
            "timeout",
        ));

        let summary = CorpusSummary::from_report(&report, &TierThresholds::default());
        assert_eq!(summary.total, 5);
        assert_eq!(summary.successes, 1);
        assert_eq!(summary.failures, 4);
        assert!((summary.success_rate - 20.0).abs() < 1e-9);
        assert_eq!(summary.strategy_distribution["anatomical"], 3);
        assert_eq!(summary.tier_breakdown[&PerformanceTier::Poor], 2);
        assert_eq!(summary.tier_breakdown[&PerformanceTier::Failed], 1);
        assert_eq!(summary.category_mean_error["men"], 26.5);
        assert_eq!(summary.ranking[0].file_id, "men/1");
        assert_eq!(summary.poor_performers[0].file_id, "women/1");
        assert_eq!(summary.failed_scans, vec!["women/3".to_string()]);
    }
}
