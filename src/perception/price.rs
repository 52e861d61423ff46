//! Price tag reading via OCR

use std::sync::LazyLock;

use regex::Regex;

use super::{BoundingBox, DetectionSample, OcrEngine, OcrOutput, QueryType};
use crate::camera::Frame;

/// Confidence assigned to a price read by OCR
const OCR_CONFIDENCE: f32 = 0.6;

/// Accepted price range, in cents
const MIN_CENTS: u32 = 10;
const MAX_CENTS: u32 = 100_000;

static DECIMAL_PRICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,4})\s*[.,]\s*(\d{1,2})").expect("valid regex")
});

static CENT_PRICE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d{1,4})\s*(?:cent|ct)").expect("valid regex"));

static WHOLE_PRICE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{1,4}").expect("valid regex"));

/// Extract a price from OCR text, in cents
///
/// Decimal amounts (`2,49`, `2.5`) win over explicit cents (`99 cent`), which win over a
/// bare whole number. Anything outside 0.10 to 1000.00 is rejected.
#[must_use]
pub fn parse_price(text: &str) -> Option<u32> {
    if DECIMAL_PRICE.is_match(text) {
        return DECIMAL_PRICE.captures_iter(text).find_map(|caps| {
            let euros: u32 = caps[1].parse().ok()?;
            let frac = &caps[2];
            let mut cents: u32 = frac.parse().ok()?;
            if frac.len() == 1 {
                cents *= 10;
            }
            in_range(euros * 100 + cents)
        });
    }

    if CENT_PRICE.is_match(text) {
        return CENT_PRICE
            .captures_iter(text)
            .find_map(|caps| caps[1].parse::<u32>().ok().and_then(in_range));
    }

    WHOLE_PRICE
        .find_iter(text)
        .find_map(|m| m.as_str().parse::<u32>().ok().and_then(|e| in_range(e * 100)))
}

/// Canonical vote label for a price: `"<euros>.<cents>"`
#[must_use]
pub fn price_label(cents: u32) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}

fn in_range(cents: u32) -> Option<u32> {
    (MIN_CENTS..=MAX_CENTS).contains(&cents).then_some(cents)
}

/// Price adapter: OCR text to a price vote
pub struct PriceEngine {
    ocr: Box<dyn OcrEngine>,
}

impl PriceEngine {
    #[must_use]
    pub fn new(ocr: Box<dyn OcrEngine>) -> Self {
        Self { ocr }
    }

    /// One price vote for this frame
    pub fn observe(&mut self, frame: &Frame, roi: Option<BoundingBox>) -> DetectionSample {
        let at = frame.captured_at;
        match self.ocr.read_text(frame, roi) {
            OcrOutput::Text(text) => match parse_price(&text) {
                Some(cents) => {
                    tracing::debug!(text = %text, cents, "price read");
                    DetectionSample::labelled(
                        QueryType::Price,
                        price_label(cents),
                        OCR_CONFIDENCE,
                        roi,
                        at,
                    )
                }
                None => DetectionSample::no_observation(QueryType::Price, at),
            },
            OcrOutput::Unavailable(_) => DetectionSample::unavailable(QueryType::Price, at),
        }
    }
}
