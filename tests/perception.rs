//! Perception adapter integration tests
//!
//! Classifier and OCR fallbacks feeding the stabilizer, without any real backend

use std::collections::BTreeMap;
use std::io::Write;

use aisle_guide::perception::{
    BanknoteEngine, Classification, LabelSet, NoOcr, PriceEngine, QueryType,
    UnavailableClassifier, probe_classifier,
};
use aisle_guide::speech::phrases;
use aisle_guide::stabilizer::{Stabilizer, StabilizerConfig};

mod common;

use common::{FixedClassifier, FixedOcr};

fn stabilizer(min_samples_for_stable: usize) -> Stabilizer {
    Stabilizer::new(StabilizerConfig {
        majority_threshold: 0.5,
        min_samples_for_stable,
        windows: BTreeMap::new(),
    })
}

#[test]
fn test_ocr_fallback_reaches_stable_value() {
    let mut engine = BanknoteEngine::new(
        Box::new(UnavailableClassifier::new("no model")),
        Box::new(FixedOcr("20".to_string())),
        LabelSet::default(),
    );
    let mut s = stabilizer(3);

    for i in 0..3 {
        let sample = engine.observe(&common::frame(i), None);
        assert_eq!(sample.label, "20");
        s.ingest(QueryType::Banknote, sample);
    }

    let result = s.current_result(QueryType::Banknote);
    assert_eq!(result.label, "20");
    assert!(result.is_announceable());
    assert_eq!(phrases::describe(&result), "20 euro");
}

#[test]
fn test_classifier_value_wins_over_ocr() {
    let mut engine = BanknoteEngine::new(
        Box::new(FixedClassifier(Classification::Value {
            label: "50".to_string(),
            confidence: 0.9,
        })),
        Box::new(FixedOcr("20".to_string())),
        LabelSet::default(),
    );
    let sample = engine.observe(&common::frame(0), None);
    assert_eq!(sample.label, "50");
    assert!((sample.confidence - 0.9).abs() < f32::EPSILON);
}

#[test]
fn test_unknown_ocr_value_is_no_observation() {
    let mut engine = BanknoteEngine::new(
        Box::new(UnavailableClassifier::new("no model")),
        Box::new(FixedOcr("7".to_string())),
        LabelSet::default(),
    );
    assert!(engine.observe(&common::frame(0), None).is_sentinel());
}

#[test]
fn test_everything_missing_is_stable_unavailable() {
    let labels = LabelSet::default();
    let classifier = probe_classifier(
        std::path::Path::new("/nonexistent/banknote.tflite"),
        None,
        &labels,
        0.6,
        0.2,
    );
    let mut engine = BanknoteEngine::new(classifier, Box::new(NoOcr::new("disabled")), labels);
    let mut s = stabilizer(3);
    for i in 0..3 {
        s.ingest(QueryType::Banknote, engine.observe(&common::frame(i), None));
    }

    let result = s.current_result(QueryType::Banknote);
    assert_eq!(result.label, "unavailable");
    assert!(result.is_stable);
    assert!(!result.is_announceable());
}

#[test]
fn test_label_file_with_indices() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "0 no-money\n1 5\n2 10\n3 20\n4 50\n5 100\n6 200").unwrap();

    let labels = LabelSet::load(file.path()).unwrap();
    assert_eq!(labels.len(), 7);
    assert_eq!(labels.get(0), Some("no-money"));
    assert!(labels.contains("200"));

    let mut engine = BanknoteEngine::new(
        Box::new(UnavailableClassifier::new("no model")),
        Box::new(FixedOcr("200".to_string())),
        labels,
    );
    assert_eq!(engine.observe(&common::frame(0), None).label, "200");
}

#[test]
fn test_price_ocr_to_phrase() {
    let mut engine = PriceEngine::new(Box::new(FixedOcr("EUR 2,49".to_string())));
    let mut s = stabilizer(2);
    for i in 0..2 {
        s.ingest(QueryType::Price, engine.observe(&common::frame(i), None));
    }

    let result = s.current_result(QueryType::Price);
    assert_eq!(result.label, "2.49");
    assert_eq!(phrases::describe(&result), "Price 2 euro 49");
}
