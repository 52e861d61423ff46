//! Object detection adapter with dummy fallback

use std::collections::HashSet;
use std::path::Path;

use super::{BoundingBox, Detection};
use crate::camera::Frame;

/// Label fabricated in dummy mode
pub const DUMMY_LABEL: &str = "dummy_item";

/// Confidence fabricated in dummy mode
const DUMMY_CONFIDENCE: f32 = 0.5;

/// Fraction of each frame edge covered by the dummy box
const DUMMY_BOX_FRACTION: f32 = 0.3;

/// A loaded object-detection model
pub trait DetectionModel: Send {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Run inference on one frame
    fn detect(&mut self, frame: &Frame) -> Vec<Detection>;
}

/// Fabricates one centered detection per frame
#[derive(Debug, Default)]
pub struct DummyModel;

impl DetectionModel for DummyModel {
    fn name(&self) -> &'static str {
        "dummy"
    }

    fn detect(&mut self, frame: &Frame) -> Vec<Detection> {
        if frame.is_empty() {
            return Vec::new();
        }
        let margin = (1.0 - DUMMY_BOX_FRACTION) / 2.0;
        vec![Detection::new(
            DUMMY_LABEL,
            DUMMY_CONFIDENCE,
            BoundingBox::new(margin, margin, 1.0 - margin, 1.0 - margin),
        )]
    }
}

/// Detector facade: a real model when one is loaded, dummy detections otherwise
pub struct VisionEngine {
    model: Box<dyn DetectionModel>,
    dummy: bool,
    allowed_labels: Option<HashSet<String>>,
}

impl VisionEngine {
    /// Wrap a loaded model
    #[must_use]
    pub fn with_model(model: Box<dyn DetectionModel>, allowed_labels: &[String]) -> Self {
        tracing::info!(backend = model.name(), "object detector loaded");
        Self {
            model,
            dummy: false,
            allowed_labels: normalize_labels(allowed_labels),
        }
    }

    /// Run in dummy mode
    #[must_use]
    pub fn dummy() -> Self {
        Self {
            model: Box::new(DummyModel),
            dummy: true,
            allowed_labels: None,
        }
    }

    /// Pick a backend given the weights path and an optional loaded model
    ///
    /// Missing weights, or weights without a model to run them, fall back to dummy
    /// mode with a warning. `force_dummy` overrides detection either way.
    #[must_use]
    pub fn resolve(
        weights: &Path,
        model: Option<Box<dyn DetectionModel>>,
        allowed_labels: &[String],
        force_dummy: Option<bool>,
    ) -> Self {
        match (force_dummy, model) {
            (Some(true), _) => {
                tracing::info!("dummy mode forced by configuration");
                Self::dummy()
            }
            (_, Some(model)) => Self::with_model(model, allowed_labels),
            (Some(false), None) => {
                tracing::warn!(
                    weights = %weights.display(),
                    "dummy mode disabled but no detection model is loaded, falling back to dummy mode"
                );
                Self::dummy()
            }
            (None, None) => {
                if weights.exists() {
                    tracing::warn!(
                        weights = %weights.display(),
                        "weights present but no detection backend is available, running in dummy mode"
                    );
                } else {
                    tracing::warn!(
                        weights = %weights.display(),
                        "detector weights not found, running in dummy mode"
                    );
                }
                Self::dummy()
            }
        }
    }

    /// Whether detections are fabricated
    #[must_use]
    pub const fn is_dummy(&self) -> bool {
        self.dummy
    }

    /// Detect objects in a frame, dropping labels outside the allow-list
    pub fn detect(&mut self, frame: &Frame) -> Vec<Detection> {
        if frame.is_empty() {
            return Vec::new();
        }
        let mut detections = self.model.detect(frame);
        if let Some(allowed) = &self.allowed_labels {
            detections.retain(|d| allowed.contains(&d.label.to_lowercase()));
        }
        detections
    }
}

fn normalize_labels(labels: &[String]) -> Option<HashSet<String>> {
    let set: HashSet<String> = labels
        .iter()
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty())
        .collect();
    if set.is_empty() { None } else { Some(set) }
}
