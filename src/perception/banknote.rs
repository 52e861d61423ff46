//! Banknote recognition: classifier first, OCR second, "unavailable" last
//!
//! Both backends are optional. Whatever happens, [`BanknoteEngine::observe`] returns a
//! plain [`DetectionSample`], so downstream code never branches on which backend
//! produced it.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use super::{BoundingBox, DetectionSample, OcrEngine, OcrOutput, QueryType};
use crate::camera::Frame;
use crate::{Error, Result};

/// Built-in vocabulary, used when no label file is present
const DEFAULT_LABELS: [&str; 6] = ["no-money", "5", "10", "20", "50", "100"];

/// Confidence assigned to a banknote value read by OCR
const OCR_CONFIDENCE: f32 = 0.6;

static DIGIT_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));

/// Ordered banknote label vocabulary
///
/// The classifier's output index `i` maps to `labels[i]`. Nothing else about the set
/// (its size, order or contents) is assumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    labels: Vec<String>,
}

impl Default for LabelSet {
    fn default() -> Self {
        Self {
            labels: DEFAULT_LABELS.iter().map(ToString::to_string).collect(),
        }
    }
}

impl LabelSet {
    /// Build from raw lines; blank lines are skipped and `"<index> <label>"` is stripped
    /// down to `<label>`
    ///
    /// # Errors
    ///
    /// Returns error if no labels remain
    pub fn parse(content: &str) -> Result<Self> {
        let labels: Vec<String> = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(normalize_label_line)
            .collect();

        if labels.is_empty() {
            return Err(Error::Config("banknote label file is empty".to_string()));
        }
        Ok(Self { labels })
    }

    /// Load a label file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or holds no labels
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let set = Self::parse(&content)?;
        tracing::info!(path = %path.display(), labels = set.len(), "loaded banknote labels");
        Ok(set)
    }

    /// Load `path` if it exists, otherwise fall back to the built-in vocabulary
    #[must_use]
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no banknote label file, using defaults");
            return Self::default();
        }
        match Self::load(path) {
            Ok(set) => set,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "bad banknote label file, using defaults");
                Self::default()
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Labels in vocabulary order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

fn normalize_label_line(line: &str) -> String {
    match line.split_once(char::is_whitespace) {
        Some((index, rest)) if index.chars().all(|c| c.is_ascii_digit()) && !rest.trim().is_empty() => {
            rest.trim().to_string()
        }
        _ => line.to_string(),
    }
}

/// Outcome of one classifier pass
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// A confident label from the vocabulary
    Value { label: String, confidence: f32 },
    /// The classifier ran but is not sure
    Uncertain,
    /// The classifier cannot run at all
    Unavailable(String),
}

/// Anything that classifies a crop into a banknote label
pub trait ValueClassifier: Send {
    fn classify(&mut self, frame: &Frame, roi: Option<BoundingBox>) -> Classification;
}

/// Classifier that reports itself unavailable
#[derive(Debug, Clone)]
pub struct UnavailableClassifier {
    reason: String,
}

impl UnavailableClassifier {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl ValueClassifier for UnavailableClassifier {
    fn classify(&mut self, _frame: &Frame, _roi: Option<BoundingBox>) -> Classification {
        Classification::Unavailable(self.reason.clone())
    }
}

/// Raw per-label scores from an image model, one score per vocabulary entry
pub trait LabelScores: Send {
    /// Scores aligned with the label set, or an error if inference failed
    ///
    /// # Errors
    ///
    /// Returns error if the model could not run on this frame
    fn scores(&mut self, frame: &Frame, roi: Option<BoundingBox>) -> Result<Vec<f32>>;
}

/// Turns raw scores into a [`Classification`] using a confidence floor and a top-two
/// margin
pub struct ScoredClassifier {
    model: Box<dyn LabelScores>,
    labels: LabelSet,
    confidence_threshold: f32,
    margin: f32,
}

impl ScoredClassifier {
    #[must_use]
    pub fn new(
        model: Box<dyn LabelScores>,
        labels: LabelSet,
        confidence_threshold: f32,
        margin: f32,
    ) -> Self {
        Self {
            model,
            labels,
            confidence_threshold,
            margin,
        }
    }
}

impl ValueClassifier for ScoredClassifier {
    fn classify(&mut self, frame: &Frame, roi: Option<BoundingBox>) -> Classification {
        let scores = match self.model.scores(frame, roi) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "banknote inference failed");
                return Classification::Unavailable(e.to_string());
            }
        };

        if scores.len() != self.labels.len() {
            tracing::warn!(
                scores = scores.len(),
                labels = self.labels.len(),
                "banknote model output does not match label count"
            );
        }

        let mut ranked: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let Some(&(best_idx, best)) = ranked.first() else {
            return Classification::Uncertain;
        };
        let runner_up = ranked.get(1).map_or(0.0, |r| r.1);

        if best < self.confidence_threshold || best - runner_up < self.margin {
            tracing::trace!(best, runner_up, "banknote classification uncertain");
            return Classification::Uncertain;
        }

        match self.labels.get(best_idx) {
            Some(label) => Classification::Value {
                label: label.to_string(),
                confidence: best,
            },
            None => Classification::Uncertain,
        }
    }
}

/// Pick a banknote classifier
///
/// No inference runtime is bundled; a caller that has one passes its scorer in.
/// Without a scorer, or without the model file, the classifier is unavailable and
/// the OCR fallback takes over.
#[must_use]
pub fn probe_classifier(
    model_path: &Path,
    scorer: Option<Box<dyn LabelScores>>,
    labels: &LabelSet,
    confidence_threshold: f32,
    margin: f32,
) -> Box<dyn ValueClassifier> {
    if !model_path.exists() {
        let reason = format!("model missing: {}", model_path.display());
        tracing::warn!(reason = %reason, "banknote classifier unavailable");
        return Box::new(UnavailableClassifier::new(reason));
    }
    match scorer {
        Some(model) => {
            tracing::info!(model = %model_path.display(), "banknote classifier loaded");
            Box::new(ScoredClassifier::new(
                model,
                labels.clone(),
                confidence_threshold,
                margin,
            ))
        }
        None => {
            let reason = "no inference runtime for banknote model".to_string();
            tracing::warn!(reason = %reason, "banknote classifier unavailable");
            Box::new(UnavailableClassifier::new(reason))
        }
    }
}

/// Banknote adapter: classifier, then OCR, then "unavailable"
pub struct BanknoteEngine {
    classifier: Box<dyn ValueClassifier>,
    ocr: Box<dyn OcrEngine>,
    labels: LabelSet,
    classifier_down: bool,
}

impl BanknoteEngine {
    #[must_use]
    pub fn new(classifier: Box<dyn ValueClassifier>, ocr: Box<dyn OcrEngine>, labels: LabelSet) -> Self {
        Self {
            classifier,
            ocr,
            labels,
            classifier_down: false,
        }
    }

    /// Label vocabulary in use
    #[must_use]
    pub const fn labels(&self) -> &LabelSet {
        &self.labels
    }

    /// One banknote vote for this frame
    pub fn observe(&mut self, frame: &Frame, roi: Option<BoundingBox>) -> DetectionSample {
        let at = frame.captured_at;

        match self.classifier.classify(frame, roi) {
            Classification::Value { label, confidence } => {
                return DetectionSample::labelled(QueryType::Banknote, label, confidence, roi, at);
            }
            Classification::Uncertain => {
                return DetectionSample::no_observation(QueryType::Banknote, at);
            }
            Classification::Unavailable(reason) => {
                if !self.classifier_down {
                    tracing::info!(reason = %reason, "banknote classifier unavailable, using ocr fallback");
                    self.classifier_down = true;
                }
            }
        }

        match self.ocr.read_text(frame, roi) {
            OcrOutput::Text(text) => match self.match_value(&text) {
                Some(label) => DetectionSample::labelled(QueryType::Banknote, label, OCR_CONFIDENCE, roi, at),
                None => DetectionSample::no_observation(QueryType::Banknote, at),
            },
            OcrOutput::Unavailable(reason) => {
                tracing::trace!(reason = %reason, "banknote ocr unavailable");
                DetectionSample::unavailable(QueryType::Banknote, at)
            }
        }
    }

    /// First digit run in `text` that names a label in the vocabulary
    fn match_value(&self, text: &str) -> Option<String> {
        DIGIT_RUN
            .find_iter(text)
            .map(|m| m.as_str().trim_start_matches('0'))
            .find(|digits| !digits.is_empty() && self.labels.contains(digits))
            .map(ToString::to_string)
    }
}
