//! Stabilizer integration tests
//!
//! Voting behavior over whole frame sequences, including dummy-mode batches

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use aisle_guide::camera::Frame;
use aisle_guide::perception::{
    BanknoteEngine, DetectionSample, LabelSet, NoOcr, Perception, PriceEngine, QueryType, Reducer,
    ReducerConfig, UnavailableClassifier, VisionEngine,
};
use aisle_guide::stabilizer::{Stabilizer, StabilizerConfig, WindowBound};

mod common;

fn stabilizer(majority_threshold: f64, min_samples_for_stable: usize) -> Stabilizer {
    Stabilizer::new(StabilizerConfig {
        majority_threshold,
        min_samples_for_stable,
        windows: BTreeMap::new(),
    })
}

fn dummy_perception() -> Perception {
    Perception::new(
        VisionEngine::dummy(),
        Reducer::new(ReducerConfig::default()),
        BanknoteEngine::new(
            Box::new(UnavailableClassifier::new("test")),
            Box::new(NoOcr::new("test")),
            LabelSet::default(),
        ),
        PriceEngine::new(Box::new(NoOcr::new("test"))),
        1,
    )
}

#[test]
fn test_majority_threshold_decides_stability() {
    let now = Instant::now();
    let labels = ["cat", "cat", "dog"];

    let mut lenient = stabilizer(0.6, 3);
    let mut strict = stabilizer(0.7, 3);
    for label in labels {
        lenient.ingest(QueryType::Identify, common::identify(label, now));
        strict.ingest(QueryType::Identify, common::identify(label, now));
    }

    let result = lenient.current_result(QueryType::Identify);
    assert_eq!(result.label, "cat");
    assert_eq!(result.support_count, 2);
    assert_eq!(result.window_size, 3);
    assert!(result.is_stable);

    let result = strict.current_result(QueryType::Identify);
    assert_eq!(result.label, "cat");
    assert!(!result.is_stable);
}

#[test]
fn test_too_few_samples_never_stable() {
    let now = Instant::now();
    let mut s = stabilizer(0.5, 5);
    for _ in 0..4 {
        s.ingest(QueryType::Identify, common::identify("apple", now));
    }
    let result = s.current_result(QueryType::Identify);
    assert_eq!(result.label, "apple");
    assert!(!result.is_stable);
    assert!(!result.is_announceable());
}

#[test]
fn test_label_is_mode_of_window() {
    let now = Instant::now();
    let mut s = stabilizer(0.5, 1);
    for label in ["milk", "bread", "milk", "eggs", "milk", "bread"] {
        s.ingest(QueryType::Identify, common::identify(label, now));
    }
    let result = s.current_result(QueryType::Identify);
    assert_eq!(result.label, "milk");
    assert_eq!(result.support_count, 3);
    assert!(result.is_stable);
}

#[test]
fn test_count_mode_in_dummy_mode() {
    let now = Instant::now();
    for min_samples in 1..=4 {
        let mut s = stabilizer(0.5, min_samples);
        for n in [2, 2, 2, 3] {
            s.ingest(
                QueryType::Count,
                DetectionSample::counted("dummy_item", n, 0.5, now),
            );
        }
        let result = s.current_result(QueryType::Count);
        assert_eq!(result.count, Some(2));
        assert_eq!(result.label, "2");
        assert_eq!(result.subject.as_deref(), Some("dummy_item"));
        assert!(result.is_stable, "min_samples = {min_samples}");
    }

    let mut s = stabilizer(0.5, 5);
    for n in [2, 2, 2, 3] {
        s.ingest(QueryType::Count, DetectionSample::counted("dummy_item", n, 0.5, now));
    }
    assert!(!s.current_result(QueryType::Count).is_stable);
}

#[test]
fn test_tied_counts_resolve_to_median() {
    let now = Instant::now();
    let mut s = stabilizer(0.0, 1);
    for n in [4, 1, 3, 4, 1, 3] {
        s.ingest(QueryType::Count, DetectionSample::counted("can", n, 0.9, now));
    }
    assert_eq!(s.current_result(QueryType::Count).count, Some(3));
}

#[test]
fn test_ingest_never_fails_on_empty_or_dummy_batches() {
    let mut s = stabilizer(0.5, 5);
    s.ingest_all(Vec::new());
    assert_eq!(s.current_result(QueryType::Identify).window_size, 0);

    let mut perception = dummy_perception();
    let empty = Frame::uniform(0, 0, 0, 0, Instant::now());
    s.ingest_all(perception.observe(&empty));
    for i in 1..=6 {
        s.ingest_all(perception.observe(&common::frame(i)));
    }

    let identify = s.current_result(QueryType::Identify);
    assert_eq!(identify.label, "dummy_item");
    assert!(identify.is_stable);

    let banknote = s.current_result(QueryType::Banknote);
    assert_eq!(banknote.label, "unavailable");
    assert!(!banknote.is_announceable());
}

#[test]
fn test_window_never_exceeds_bound() {
    let mut windows = BTreeMap::new();
    windows.insert(QueryType::Identify, WindowBound::Samples(4));
    windows.insert(QueryType::Obstacle, WindowBound::Age(Duration::from_millis(100)));
    let mut s = Stabilizer::new(StabilizerConfig {
        majority_threshold: 0.5,
        min_samples_for_stable: 1,
        windows,
    });

    let start = Instant::now();
    for i in 0..20u64 {
        let at = start + Duration::from_millis(i * 50);
        s.ingest(QueryType::Identify, common::identify("box", at));
        s.ingest(
            QueryType::Obstacle,
            DetectionSample::labelled(QueryType::Obstacle, "clear", 1.0, None, at),
        );
        assert!(s.window(QueryType::Identify).unwrap().len() <= 4);
        assert!(s.window(QueryType::Obstacle).unwrap().len() <= 3);
    }
}
