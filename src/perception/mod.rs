//! Perception adapters
//!
//! Everything that looks at a frame lives here: the object detector (with its dummy
//! fallback), the banknote classifier/OCR chain, price OCR and label text OCR. Whatever
//! the backend, each adapter's output is reduced to one [`DetectionSample`] per query
//! type, so the stabilizer never has to know which sensor produced a vote.

mod banknote;
mod ocr;
mod price;
mod reduce;
mod text;
mod vision;

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::camera::Frame;

pub use banknote::{
    BanknoteEngine, Classification, LabelScores, LabelSet, ScoredClassifier,
    UnavailableClassifier, ValueClassifier, probe_classifier,
};
pub use ocr::{NoOcr, OcrEngine, OcrOutput, OcrWord, OcrWords, TesseractCli, probe_ocr};
pub use price::{PriceEngine, parse_price, price_label};
pub use reduce::{Reducer, ReducerConfig};
pub use text::{Beverage, Carbonation, TextEngine, TextReading, classify_beverage};
pub use vision::{DUMMY_LABEL, DetectionModel, DummyModel, VisionEngine};

/// Label used when a frame produced nothing worth voting for
pub const NO_OBSERVATION: &str = "no-observation";

/// Label used when the backend for a query is missing altogether
pub const UNAVAILABLE: &str = "unavailable";

/// Label used by the obstacle query when the path ahead is clear
pub const CLEAR_PATH: &str = "clear";

/// Category of decision being stabilized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Identify,
    Count,
    Obstacle,
    Banknote,
    Price,
    /// Free label text read by OCR
    Text,
}

impl QueryType {
    /// All query types, in key order
    pub const ALL: [Self; 6] = [
        Self::Identify,
        Self::Count,
        Self::Obstacle,
        Self::Banknote,
        Self::Price,
        Self::Text,
    ];

    /// Stable lowercase name (used in config keys and logs)
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Identify => "identify",
            Self::Count => "count",
            Self::Obstacle => "obstacle",
            Self::Banknote => "banknote",
            Self::Price => "price",
            Self::Text => "text",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Axis-aligned box in normalized frame coordinates (`0.0..=1.0`)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// Horizontal third of the frame a box sits in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Left,
    Center,
    Right,
}

impl BoundingBox {
    /// Build a box, clamping every edge into the unit square
    #[must_use]
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1: x1.clamp(0.0, 1.0),
            y1: y1.clamp(0.0, 1.0),
            x2: x2.clamp(0.0, 1.0),
            y2: y2.clamp(0.0, 1.0),
        }
    }

    /// Build a normalized box from pixel coordinates
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn from_pixels(x1: u32, y1: u32, x2: u32, y2: u32, width: u32, height: u32) -> Self {
        let w = width.max(1) as f32;
        let h = height.max(1) as f32;
        Self::new(x1 as f32 / w, y1 as f32 / h, x2 as f32 / w, y2 as f32 / h)
    }

    /// Fraction of the frame covered by this box
    #[must_use]
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Intersection over union with another box
    #[must_use]
    pub fn iou(&self, other: &Self) -> f32 {
        let ix = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let iy = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = ix * iy;
        if inter <= 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        if union <= 0.0 { 0.0 } else { inter / union }
    }

    /// Which third of the frame the box center falls into
    #[must_use]
    pub fn position(&self) -> Position {
        let center = f32::midpoint(self.x1, self.x2);
        if center < 1.0 / 3.0 {
            Position::Left
        } else if center > 2.0 / 3.0 {
            Position::Right
        } else {
            Position::Center
        }
    }
}

/// One raw detection from the object model
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    #[must_use]
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
            bbox,
        }
    }
}

/// A single per-frame vote for one query type
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSample {
    pub label: String,
    pub confidence: f32,
    pub bbox: Option<BoundingBox>,
    pub timestamp: Instant,
    pub query: QueryType,
    /// Observed item count, only set for [`QueryType::Count`]
    pub count: Option<u32>,
}

impl DetectionSample {
    /// A labelled vote
    #[must_use]
    pub fn labelled(
        query: QueryType,
        label: impl Into<String>,
        confidence: f32,
        bbox: Option<BoundingBox>,
        timestamp: Instant,
    ) -> Self {
        Self {
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
            bbox,
            timestamp,
            query,
            count: None,
        }
    }

    /// A count vote; `label` names what was counted
    #[must_use]
    pub fn counted(
        label: impl Into<String>,
        count: u32,
        confidence: f32,
        timestamp: Instant,
    ) -> Self {
        Self {
            count: Some(count),
            ..Self::labelled(QueryType::Count, label, confidence, None, timestamp)
        }
    }

    /// Nothing usable was seen in this frame
    #[must_use]
    pub fn no_observation(query: QueryType, timestamp: Instant) -> Self {
        Self::labelled(query, NO_OBSERVATION, 0.0, None, timestamp)
    }

    /// The backend for this query is missing
    #[must_use]
    pub fn unavailable(query: QueryType, timestamp: Instant) -> Self {
        Self::labelled(query, UNAVAILABLE, 0.0, None, timestamp)
    }

    /// True for `no-observation` and `unavailable` votes
    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        is_sentinel_label(&self.label)
    }
}

/// True for the reserved labels that carry no announceable content
#[must_use]
pub fn is_sentinel_label(label: &str) -> bool {
    label == NO_OBSERVATION || label == UNAVAILABLE
}

/// Runs every adapter over a frame and yields one sample per query type
///
/// Vision queries are sampled every frame. Banknote, price and text go through OCR,
/// which is far slower than inference, so they run every `value_stride` frames.
pub struct Perception {
    vision: VisionEngine,
    reducer: Reducer,
    banknote: BanknoteEngine,
    price: PriceEngine,
    text: Option<TextEngine>,
    value_stride: u64,
}

impl Perception {
    #[must_use]
    pub fn new(
        vision: VisionEngine,
        reducer: Reducer,
        banknote: BanknoteEngine,
        price: PriceEngine,
        value_stride: u64,
    ) -> Self {
        Self {
            vision,
            reducer,
            banknote,
            price,
            text: None,
            value_stride: value_stride.max(1),
        }
    }

    /// Also read label text on OCR frames
    #[must_use]
    pub fn with_text(mut self, text: TextEngine) -> Self {
        self.text = Some(text);
        self
    }

    /// Whether the object detector is fabricating detections
    #[must_use]
    pub fn dummy_mode(&self) -> bool {
        self.vision.is_dummy()
    }

    /// The banknote label vocabulary in use
    #[must_use]
    pub fn banknote_labels(&self) -> &LabelSet {
        self.banknote.labels()
    }

    /// Observe one frame
    pub fn observe(&mut self, frame: &Frame) -> Vec<DetectionSample> {
        let at = frame.captured_at;
        let detections = self.vision.detect(frame);
        tracing::trace!(
            frame = frame.index,
            detections = detections.len(),
            "vision pass"
        );

        let mut samples = vec![
            self.reducer.identify(&detections, at),
            self.reducer.count(&detections, at),
            self.reducer.obstacle(&detections, at),
        ];

        if frame.index % self.value_stride == 0 {
            let roi = Reducer::region_of_interest(&detections);
            samples.push(self.banknote.observe(frame, roi));
            samples.push(self.price.observe(frame, roi));
            if let Some(text) = &mut self.text {
                samples.push(text.observe(frame, roi));
            }
        }

        samples
    }
}
