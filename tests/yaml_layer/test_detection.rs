use stepline::core::yaml_layer::dialect::strategy_for;
use stepline::core::ErrorCategory;
use stepline::core::yaml_layer::normalizer::load_tree;
use stepline::core::yaml_layer::{detect, Dialect, DetectorConfig, FormatDetector};

fn detect_text(text: &str) -> stepline::core::yaml_layer::Detection {
    detect(&load_tree(text).expect("yaml"))
}

#[test]
fn every_dialect_example_detects_as_itself() {
    for dialect in Dialect::ALL {
        let example = strategy_for(dialect).example();
        let detection = detect_text(example);
        assert_eq!(detection.dialect, dialect, "example for {}", dialect);
        assert_eq!(
            detection.decide(&DetectorConfig::default()).expect("decided"),
            dialect
        );
    }
}

#[test]
fn compact_document_reports_scores_and_signals() {
    let detection = detect_text(
        "test: Login\nnav: https://x.test\ndo:\n  - c: Login\n  - ch: Welcome\n",
    );
    assert_eq!(detection.dialect, Dialect::Compact);
    assert_eq!(detection.confidence, 0.95);
    let names: Vec<&str> = detection.signals.iter().map(|signal| signal.name).collect();
    assert!(names.contains(&"has_test_field"));
    assert!(names.contains(&"majority_compact_actions"));
    assert_eq!(detection.scores.len(), 3);
}

#[test]
fn yaml_with_numeric_keys_is_still_scored() {
    // Integer keys are stringified before detection.
    let detection = detect_text("test: Keys\ndo:\n  - c: \"#a\"\n  - select: {\"#size\": 2}\n1: stray\n");
    assert_eq!(detection.dialect, Dialect::Compact);
}

#[test]
fn non_mapping_documents_are_rejected() {
    let detection = detect_text("- just\n- a\n- list\n");
    let err = detection
        .decide(&DetectorConfig::default())
        .expect_err("unrecognized");
    assert_eq!(err.category, ErrorCategory::DetectionError);
    assert_eq!(detection.confidence, 0.0);
    assert!(!err.recovery_suggestions.is_empty());
}

#[test]
fn stricter_thresholds_reject_weak_documents() {
    let tree = load_tree("name: Partial\nsteps:\n  - type: navigate\n    target: /\n").expect("yaml");
    let strict = FormatDetector::new(DetectorConfig {
        min_confidence: 0.99,
        ambiguity_epsilon: 0.1,
    });
    assert!(strict.detect(&tree).is_err());
    assert!(FormatDetector::default().detect(&tree).is_ok());
}

#[test]
fn detection_is_deterministic_across_runs() {
    let text = strategy_for(Dialect::Extended).example();
    let first = detect_text(text);
    for _ in 0..10 {
        assert_eq!(detect_text(text), first);
    }
}
