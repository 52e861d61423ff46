//! Label text reading via word-level OCR
//!
//! Words below a confidence floor or made mostly of punctuation are dropped, the rest
//! are grouped back into layout lines, and the best couple of lines become the vote.
//! Drink labels get a short category sentence in front (`Sparkling water.`).

use std::collections::BTreeMap;
use std::fmt;

use super::{BoundingBox, DetectionSample, OcrEngine, OcrWord, OcrWords, QueryType};
use crate::camera::Frame;

/// Words below this engine confidence (0-100) are ignored
const MIN_WORD_CONFIDENCE: f32 = 40.0;

/// Readings below this confidence (0-1) vote `no-observation`
pub const SPEAK_CONFIDENCE: f32 = 0.45;

const MAX_LINES: usize = 2;
const MAX_CHARS: usize = 120;

/// Fewer selected characters than this is treated as a weak reading
const MIN_CHARS: usize = 6;
const SHORT_READING_PENALTY: f32 = 0.6;

/// Drink category recognized from label words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beverage {
    AppleSpritzer,
    SparklingWater,
    StillWater,
    MineralWater,
    Juice,
}

impl Beverage {
    const fn name(self) -> &'static str {
        match self {
            Self::AppleSpritzer => "Apple spritzer",
            Self::SparklingWater => "Sparkling water",
            Self::StillWater => "Still water",
            Self::MineralWater => "Mineral water",
            Self::Juice => "Juice",
        }
    }

    /// Water names already say whether it is carbonated
    const fn names_carbonation(self) -> bool {
        matches!(self, Self::SparklingWater | Self::StillWater)
    }
}

impl fmt::Display for Beverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Carbonation {
    Sparkling,
    Still,
}

impl fmt::Display for Carbonation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sparkling => "Sparkling",
            Self::Still => "Still",
        })
    }
}

const SPRITZER: &[&str] = &["apfelschorle", "apfel schorle", "schorle", "spritzer"];
const WATER: &[&str] = &["mineralwasser", "wasser", "quellwasser", "tafelwasser", "water"];
const JUICE: &[&str] = &["saft", "fruchtsaft", "nektar", "juice", "nectar"];
const STILL: &[&str] = &["ohne kohlensaeure", "still", "non-carbonated", "naturelle"];
const SPARKLING: &[&str] = &[
    "sprudel",
    "classic",
    "medium",
    "mit kohlensaeure",
    "kohlensaeure",
    "carbonated",
    "sparkling",
];

/// Drink category and carbonation named anywhere in `raw`
///
/// German label words are matched with umlauts folded (`ä` to `ae`), alongside their
/// English equivalents.
#[must_use]
pub fn classify_beverage(raw: &str) -> (Option<Beverage>, Option<Carbonation>) {
    let text = normalize(raw);
    let has_any = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    // "ohne kohlensäure" also contains "kohlensaeure", so still is checked first
    let carbonation = if has_any(STILL) {
        Some(Carbonation::Still)
    } else if has_any(SPARKLING) {
        Some(Carbonation::Sparkling)
    } else {
        None
    };

    let beverage = if has_any(SPRITZER) {
        Some(Beverage::AppleSpritzer)
    } else if has_any(WATER) {
        Some(match carbonation {
            Some(Carbonation::Sparkling) => Beverage::SparklingWater,
            Some(Carbonation::Still) => Beverage::StillWater,
            None => Beverage::MineralWater,
        })
    } else if has_any(JUICE) {
        Some(Beverage::Juice)
    } else {
        None
    };

    (beverage, carbonation)
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .replace('ä', "ae")
        .replace('ö', "oe")
        .replace('ü', "ue")
        .replace('ß', "ss")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// At least two characters, mostly letters or digits
fn is_meaningful(token: &str) -> bool {
    let len = token.chars().count();
    let alnum = token.chars().filter(|c| c.is_alphanumeric()).count();
    len >= 2 && alnum >= (len / 2).max(2)
}

#[derive(Debug)]
struct Line {
    text: String,
    confidence: f32,
}

impl Line {
    #[allow(clippy::cast_precision_loss)]
    fn weight(&self) -> f32 {
        self.confidence * self.text.chars().count().max(1) as f32
    }
}

fn group_lines(words: &[OcrWord]) -> Vec<Line> {
    let mut grouped: BTreeMap<(u32, u32, u32), Vec<&OcrWord>> = BTreeMap::new();
    for word in words
        .iter()
        .filter(|w| w.confidence >= MIN_WORD_CONFIDENCE && is_meaningful(&w.text))
    {
        grouped
            .entry((word.block, word.paragraph, word.line))
            .or_default()
            .push(word);
    }

    grouped
        .into_values()
        .map(|mut line| {
            line.sort_by_key(|w| w.left);
            let text = line.iter().map(|w| w.text.as_str()).collect::<Vec<_>>().join(" ");
            #[allow(clippy::cast_precision_loss)]
            let confidence = line.iter().map(|w| w.confidence).sum::<f32>() / line.len() as f32;
            Line { text, confidence }
        })
        .collect()
}

/// What one frame's label text says
#[derive(Debug, Clone, PartialEq)]
pub struct TextReading {
    /// Sentence to speak; empty when nothing was read
    pub text: String,
    /// `0.0..=1.0`
    pub confidence: f32,
    pub beverage: Option<Beverage>,
    pub carbonation: Option<Carbonation>,
}

impl TextReading {
    /// Build a reading from word-level OCR output
    #[must_use]
    pub fn from_words(words: &[OcrWord]) -> Self {
        let lines = group_lines(words);
        let raw = lines.iter().map(|l| l.text.as_str()).collect::<Vec<_>>().join("\n");
        let (beverage, carbonation) = classify_beverage(&raw);

        let mut ranked: Vec<&Line> = lines.iter().collect();
        ranked.sort_by(|a, b| b.weight().total_cmp(&a.weight()));

        let mut selected: Vec<&Line> = Vec::new();
        let mut total_chars = 0;
        for line in ranked {
            if selected.len() >= MAX_LINES {
                break;
            }
            let chars = line.text.chars().count();
            if total_chars + chars > MAX_CHARS {
                continue;
            }
            total_chars += chars;
            selected.push(line);
        }

        #[allow(clippy::cast_precision_loss)]
        let mut confidence = if selected.is_empty() {
            0.0
        } else {
            selected.iter().map(|l| l.confidence).sum::<f32>() / selected.len() as f32 / 100.0
        };
        if total_chars < MIN_CHARS {
            confidence *= SHORT_READING_PENALTY;
        }

        let lines_text = selected.iter().map(|l| l.text.as_str()).collect::<Vec<_>>().join(" ");
        Self {
            text: compose(&lines_text, beverage, carbonation),
            confidence: confidence.clamp(0.0, 1.0),
            beverage,
            carbonation,
        }
    }
}

fn compose(lines_text: &str, beverage: Option<Beverage>, carbonation: Option<Carbonation>) -> String {
    let Some(beverage) = beverage else {
        return lines_text.to_string();
    };
    let category = match carbonation {
        Some(c) if !beverage.names_carbonation() => format!("{beverage}. {c}."),
        _ => format!("{beverage}."),
    };
    if lines_text.is_empty() || lines_text.to_lowercase().contains(&category.to_lowercase()) {
        category
    } else {
        format!("{category} {lines_text}")
    }
}

/// Text adapter: word OCR to a text vote
pub struct TextEngine {
    ocr: Box<dyn OcrEngine>,
}

impl TextEngine {
    #[must_use]
    pub fn new(ocr: Box<dyn OcrEngine>) -> Self {
        Self { ocr }
    }

    /// One text vote for this frame
    pub fn observe(&mut self, frame: &Frame, roi: Option<BoundingBox>) -> DetectionSample {
        let at = frame.captured_at;
        let words = match self.ocr.read_words(frame, roi) {
            OcrWords::Words(words) => words,
            OcrWords::Unavailable(reason) => {
                tracing::trace!(reason = %reason, "text ocr unavailable");
                return DetectionSample::unavailable(QueryType::Text, at);
            }
        };

        let reading = TextReading::from_words(&words);
        tracing::trace!(
            text = %reading.text,
            confidence = reading.confidence,
            beverage = ?reading.beverage,
            "text reading"
        );
        if reading.text.is_empty() || reading.confidence < SPEAK_CONFIDENCE {
            return DetectionSample::no_observation(QueryType::Text, at);
        }
        DetectionSample::labelled(QueryType::Text, reading.text, reading.confidence, roi, at)
    }
}
