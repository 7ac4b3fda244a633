mod common;

use common::{face_cloud, StubPredictor};
use scan_prealign::pipeline::{AlignmentParams, AttemptOutcome, StrategySelector};
use scan_prealign::predictor::PredictorConfig;
use scan_prealign::strategies::{AlignmentStrategy, Anatomical, CenterOfMass, ScaleFree};
use scan_prealign::ReasonCode;
use std::sync::Arc;

fn three_candidates() -> Vec<Arc<dyn AlignmentStrategy>> {
    vec![
        Arc::new(CenterOfMass::default()),
        Arc::new(Anatomical::new(AlignmentParams::identity(), 190.0)),
        Arc::new(ScaleFree::default()),
    ]
}

fn selector(predictor: Arc<StubPredictor>) -> StrategySelector {
    StrategySelector::new(predictor, PredictorConfig::default())
}

#[test]
fn test_first_strategy_below_threshold_wins() {
    let predictor = Arc::new(
        StubPredictor::new()
            .score("42", "center", 12.0)
            .score("42", "anatomical", 4.5)
            .score("42", "scale-free", 20.0),
    );

    let selection = selector(predictor.clone()).select(
        "42",
        None,
        &face_cloud([0.0; 3], 1.0),
        &three_candidates(),
        10.0,
    );

    assert_eq!(selection.chosen_strategy(), Some("anatomical"));
    assert_eq!(selection.record.chosen_error, Some(4.5));
    assert!(!selection.record.was_evaluated("scale-free"));
    assert_eq!(predictor.calls_for("42"), vec!["center", "anatomical"]);
    assert_eq!(selection.record.error_for("center"), Some(12.0));
}

#[test]
fn test_minimum_chosen_when_all_above_threshold() {
    let predictor = Arc::new(
        StubPredictor::new()
            .score("7", "center", 30.0)
            .score("7", "anatomical", 14.0)
            .score("7", "scale-free", 11.0),
    );

    let selection = selector(predictor).select("7", None, &face_cloud([0.0; 3], 1.0), &three_candidates(), 10.0);

    assert_eq!(selection.chosen_strategy(), Some("scale-free"));
    assert_eq!(selection.record.attempts.len(), 3);
    assert!(!selection.record.is_success(10.0));
    assert_eq!(selection.record.reason_code(10.0), Some(ReasonCode::AboveThreshold));
    // best-effort result is still returned
    assert!(selection.best.is_some());
}

#[test]
fn test_ties_go_to_first_listed_candidate() {
    let predictor = Arc::new(StubPredictor::new().file_score("t", 15.0));
    let cloud = face_cloud([3.0, -2.0, 8.0], 1.0);

    for _ in 0..5 {
        let selection = selector(predictor.clone()).select("t", None, &cloud, &three_candidates(), 10.0);
        assert_eq!(selection.chosen_strategy(), Some("center"));
    }

    let reversed: Vec<Arc<dyn AlignmentStrategy>> = three_candidates().into_iter().rev().collect();
    let selection = selector(predictor).select("t", None, &cloud, &reversed, 10.0);
    assert_eq!(selection.chosen_strategy(), Some("scale-free"));
}

#[test]
fn test_failed_prediction_is_retried_with_defaults() {
    let predictor = Arc::new(StubPredictor::new().score("r", "scale-free", 3.0));
    let candidates: Vec<Arc<dyn AlignmentStrategy>> = vec![
        Arc::new(CenterOfMass::default()),
        Arc::new(ScaleFree::default()),
    ];

    let selection = selector(predictor.clone()).select("r", Some("women"), &face_cloud([0.0; 3], 2.0), &candidates, 10.0);

    assert_eq!(predictor.calls_for("r"), vec!["center", "center", "scale-free"]);
    match &selection.record.attempts[0].outcome {
        AttemptOutcome::Failed { reason, message } => {
            assert_eq!(*reason, ReasonCode::PredictorError);
            assert!(message.contains("timed out"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(selection.chosen_strategy(), Some("scale-free"));
    assert_eq!(selection.record.category.as_deref(), Some("women"));
}

#[test]
fn test_nothing_scored_means_no_choice() {
    let predictor = Arc::new(StubPredictor::new().failing("x"));

    let selection = selector(predictor.clone()).select("x", None, &face_cloud([0.0; 3], 1.0), &three_candidates(), 10.0);

    assert!(selection.best.is_none());
    assert!(selection.record.chosen_strategy_id.is_none());
    assert_eq!(selection.record.attempts.len(), 3);
    assert_eq!(predictor.calls_for("x").len(), 6);
    assert_eq!(selection.record.reason_code(10.0), Some(ReasonCode::PredictorError));
}

#[test]
fn test_chosen_cloud_is_the_strategy_output() {
    let predictor = Arc::new(StubPredictor::new().score("c", "center", 1.0));
    let cloud = face_cloud([100.0, 50.0, -20.0], 1.0);

    let selection = selector(predictor).select("c", None, &cloud, &three_candidates(), 10.0);
    let (aligned, prediction) = selection.best.unwrap();

    let centroid = aligned.transformed().centroid();
    assert!(centroid.iter().all(|c| c.abs() < 1e-9));
    assert_eq!(prediction.landmarks().len(), 73);
    // input untouched
    assert_eq!(cloud, face_cloud([100.0, 50.0, -20.0], 1.0));
}
