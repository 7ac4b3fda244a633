use std::fmt::Write;

use crate::analysis::{CorpusSummary, PerformanceTier};
use crate::pipeline::{AttemptOutcome, ScanRecord};

/// Attempts of one scan, in evaluation order, with the choice marked.
pub fn render_record(record: &ScanRecord, threshold: f64) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Scan {} ===", record.file_id);
    if let Some(category) = &record.category {
        let _ = writeln!(out, "Category: {}", category);
    }
    let _ = writeln!(out, "| Strategy | Error | Time (ms) | Note |");
    let _ = writeln!(out, "|----------|-------|-----------|------|");

    for attempt in &record.attempts {
        let chosen = record.chosen_strategy_id.as_deref() == Some(attempt.strategy_id.as_str());
        match &attempt.outcome {
            AttemptOutcome::Scored {
                error,
                elapsed_ms,
                retried,
            } => {
                let mut note = Vec::new();
                if chosen {
                    note.push("chosen");
                }
                if *retried {
                    note.push("default params");
                }
                let _ = writeln!(
                    out,
                    "| {} | {:.4} | {:.1} | {} |",
                    attempt.strategy_id,
                    error,
                    elapsed_ms,
                    note.join(", ")
                );
            }
            AttemptOutcome::Failed { reason, message } => {
                let _ = writeln!(out, "| {} | - | - | {}: {} |", attempt.strategy_id, reason, message);
            }
        }
    }

    match record.reason_code(threshold) {
        None => {
            let _ = writeln!(out, "Result: success (threshold {})", threshold);
        }
        Some(reason) => {
            let _ = writeln!(out, "Result: failed ({})", reason);
        }
    }
    out
}

/// Best scans first, at most `limit` rows.
pub fn render_ranking(summary: &CorpusSummary, limit: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "| Rank | Scan | Category | Strategy | Error | Tier |");
    let _ = writeln!(out, "|------|------|----------|----------|-------|------|");
    for (rank, scan) in summary.ranking.iter().take(limit).enumerate() {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {:.4} | {} |",
            rank + 1,
            scan.file_id,
            scan.category.as_deref().unwrap_or("-"),
            scan.strategy_id,
            scan.error,
            scan.tier
        );
    }
    out
}

pub fn render_summary(summary: &CorpusSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Corpus Summary ===");
    let _ = writeln!(out, "Processed: {}", summary.total);
    let _ = writeln!(
        out,
        "Successes: {} ({:.1}%) below {}",
        summary.successes, summary.success_rate, summary.threshold
    );
    let _ = writeln!(out, "Failures: {}", summary.failures);
    if summary.not_processed > 0 {
        let _ = writeln!(out, "Not processed: {}", summary.not_processed);
    }

    if let Some(errors) = &summary.errors {
        let _ = writeln!(
            out,
            "Error: best {:.4}, worst {:.4}, mean {:.4}, median {:.4}, std-dev {:.4}",
            errors.best, errors.worst, errors.mean, errors.median, errors.std_dev
        );
    }

    if !summary.strategy_distribution.is_empty() {
        let _ = writeln!(out, "\nChosen strategies:");
        for (strategy, count) in &summary.strategy_distribution {
            let _ = writeln!(out, "  {:<12} {}", strategy, count);
        }
    }

    let _ = writeln!(out, "\nTiers:");
    for tier in [
        PerformanceTier::Excellent,
        PerformanceTier::VeryGood,
        PerformanceTier::Good,
        PerformanceTier::Poor,
        PerformanceTier::Failed,
    ] {
        let count = summary.tier_breakdown.get(&tier).copied().unwrap_or(0);
        let _ = writeln!(out, "  {:<12} {}", tier.to_string(), count);
    }

    if !summary.category_mean_error.is_empty() {
        let _ = writeln!(out, "\nMean error per category:");
        for (category, mean) in &summary.category_mean_error {
            let _ = writeln!(out, "  {:<12} {:.4}", category, mean);
        }
    }

    if !summary.poor_performers.is_empty() {
        let _ = writeln!(out, "\nPoor performers:");
        for scan in &summary.poor_performers {
            let _ = writeln!(out, "  {} ({}): {:.4}", scan.file_id, scan.strategy_id, scan.error);
        }
    }

    if !summary.failed_scans.is_empty() {
        let _ = writeln!(out, "\nNo strategy chosen: {}", summary.failed_scans.join(", "));
    }
    out
}

pub fn print_record(record: &ScanRecord, threshold: f64) {
    print!("{}", render_record(record, threshold));
}

pub fn print_ranking(summary: &CorpusSummary, limit: usize) {
    print!("{}", render_ranking(summary, limit));
}

pub fn print_summary(summary: &CorpusSummary) {
    print!("{}", render_summary(summary));
}
