//! Per-frame reduction of raw detections into one vote per vision query

use std::collections::HashMap;
use std::time::Instant;

use super::{BoundingBox, CLEAR_PATH, Detection, DetectionSample, Position, QueryType};

/// Two detections closer than this are treated as the same object when counting
const DUPLICATE_IOU: f32 = 0.5;

/// Top-two confidence gap under which two different labels are ambiguous
const AMBIGUITY_MARGIN: f32 = 0.05;

/// Thresholds for turning raw detections into votes
#[derive(Debug, Clone, Copy)]
pub struct ReducerConfig {
    /// Detections below this confidence are ignored
    pub confidence_threshold: f32,
    /// Minimum box area (fraction of frame) for something to count as an obstacle
    pub obstacle_area_threshold: f32,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.4,
            obstacle_area_threshold: 0.18,
        }
    }
}

/// Stateless reducer; all smoothing happens later in the stabilizer
#[derive(Debug, Clone, Copy, Default)]
pub struct Reducer {
    config: ReducerConfig,
}

impl Reducer {
    #[must_use]
    pub const fn new(config: ReducerConfig) -> Self {
        Self { config }
    }

    /// Identify: the single most confident object, unless two different labels tie
    #[must_use]
    pub fn identify(&self, detections: &[Detection], at: Instant) -> DetectionSample {
        let mut ranked: Vec<&Detection> = detections.iter().collect();
        ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let Some(top) = ranked.first() else {
            return DetectionSample::no_observation(QueryType::Identify, at);
        };

        if let Some(second) = ranked.get(1) {
            if top.label != second.label && top.confidence - second.confidence < AMBIGUITY_MARGIN {
                tracing::trace!(
                    top = %top.label,
                    second = %second.label,
                    "ambiguous identify frame"
                );
                return DetectionSample::no_observation(QueryType::Identify, at);
            }
        }

        if top.confidence < self.config.confidence_threshold {
            return DetectionSample::no_observation(QueryType::Identify, at);
        }

        DetectionSample::labelled(
            QueryType::Identify,
            top.label.clone(),
            top.confidence,
            Some(top.bbox),
            at,
        )
    }

    /// Count: distinct confident objects of the dominant label
    #[must_use]
    pub fn count(&self, detections: &[Detection], at: Instant) -> DetectionSample {
        let mut ranked: Vec<&Detection> = detections
            .iter()
            .filter(|d| d.confidence >= self.config.confidence_threshold)
            .collect();
        ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let mut kept: Vec<&Detection> = Vec::new();
        for det in ranked {
            if !kept.iter().any(|k| k.bbox.iou(&det.bbox) > DUPLICATE_IOU) {
                kept.push(det);
            }
        }

        if kept.is_empty() {
            return DetectionSample::no_observation(QueryType::Count, at);
        }

        // label -> (count, confidence sum, first rank)
        let mut per_label: HashMap<&str, (u32, f32, usize)> = HashMap::new();
        for (rank, det) in kept.iter().enumerate() {
            let entry = per_label.entry(det.label.as_str()).or_insert((0, 0.0, rank));
            entry.0 += 1;
            entry.1 += det.confidence;
        }

        let Some((label, (count, conf_sum, _))) = per_label
            .into_iter()
            .max_by(|a, b| a.1.0.cmp(&b.1.0).then(b.1.2.cmp(&a.1.2)))
        else {
            return DetectionSample::no_observation(QueryType::Count, at);
        };

        #[allow(clippy::cast_precision_loss)]
        let mean = conf_sum / count as f32;
        DetectionSample::counted(label, count, mean, at)
    }

    /// Obstacle: the biggest confident box above the area threshold, or a clear path
    #[must_use]
    pub fn obstacle(&self, detections: &[Detection], at: Instant) -> DetectionSample {
        let best = detections
            .iter()
            .filter(|d| d.confidence >= self.config.confidence_threshold)
            .filter(|d| d.bbox.area() >= self.config.obstacle_area_threshold)
            .max_by(|a, b| {
                (a.bbox.area() * a.confidence).total_cmp(&(b.bbox.area() * b.confidence))
            });

        match best {
            Some(det) => DetectionSample::labelled(
                QueryType::Obstacle,
                obstacle_label(&det.bbox),
                det.confidence,
                Some(det.bbox),
                at,
            ),
            None => DetectionSample::labelled(QueryType::Obstacle, CLEAR_PATH, 1.0, None, at),
        }
    }

    /// Largest detection box, expanded by 10% per side, for banknote/price crops
    #[must_use]
    pub fn region_of_interest(detections: &[Detection]) -> Option<BoundingBox> {
        let best = detections
            .iter()
            .max_by(|a, b| a.bbox.area().total_cmp(&b.bbox.area()))?;
        let b = best.bbox;
        let dx = (b.x2 - b.x1) * 0.1;
        let dy = (b.y2 - b.y1) * 0.1;
        let roi = BoundingBox::new(b.x1 - dx, b.y1 - dy, b.x2 + dx, b.y2 + dy);
        (roi.area() > 0.0).then_some(roi)
    }
}

/// Obstacle vote label: `obstacle:<distance>:<side>`
///
/// Votes are keyed by distance band and side so the stabilizer only settles
/// once the obstacle stays put.
fn obstacle_label(bbox: &BoundingBox) -> String {
    let area = bbox.area();
    let distance = if area > 0.25 {
        "very-close"
    } else if area > 0.1 {
        "near"
    } else {
        "ahead"
    };
    let side = match bbox.position() {
        Position::Left => "left",
        Position::Center => "center",
        Position::Right => "right",
    };
    format!("obstacle:{distance}:{side}")
}
