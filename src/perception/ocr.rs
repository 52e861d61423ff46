//! Offline OCR backends

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::BoundingBox;
use crate::camera::Frame;
use crate::{Error, Result};

/// Characters tesseract is allowed to emit (digits and price separators)
const CHAR_WHITELIST: &str = "0123456789,.-";

/// Result of one OCR pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OcrOutput {
    /// Recognized text, possibly empty
    Text(String),
    /// No OCR engine can run; the reason is for logs only
    Unavailable(String),
}

/// One recognized word with its layout position
#[derive(Debug, Clone, PartialEq)]
pub struct OcrWord {
    pub text: String,
    /// Engine confidence, `0.0..=100.0`
    pub confidence: f32,
    pub block: u32,
    pub paragraph: u32,
    pub line: u32,
    /// Left edge in pixels, for ordering words within a line
    pub left: u32,
}

/// Result of one word-level OCR pass
#[derive(Debug, Clone, PartialEq)]
pub enum OcrWords {
    Words(Vec<OcrWord>),
    Unavailable(String),
}

/// Reads text off a frame (or a crop of it)
pub trait OcrEngine: Send {
    /// Recognize digits and price separators inside `roi`, or the whole frame when `roi`
    /// is `None`
    fn read_text(&mut self, frame: &Frame, roi: Option<BoundingBox>) -> OcrOutput;

    /// Recognize free text word by word
    fn read_words(&mut self, _frame: &Frame, _roi: Option<BoundingBox>) -> OcrWords {
        OcrWords::Unavailable("engine has no word-level output".to_string())
    }
}

/// OCR engine that is never available
#[derive(Debug, Clone)]
pub struct NoOcr {
    reason: String,
}

impl NoOcr {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl OcrEngine for NoOcr {
    fn read_text(&mut self, _frame: &Frame, _roi: Option<BoundingBox>) -> OcrOutput {
        OcrOutput::Unavailable(self.reason.clone())
    }

    fn read_words(&mut self, _frame: &Frame, _roi: Option<BoundingBox>) -> OcrWords {
        OcrWords::Unavailable(self.reason.clone())
    }
}

/// Tesseract invoked as an external process on a temporary PGM file
#[derive(Debug, Clone)]
pub struct TesseractCli {
    binary: PathBuf,
}

impl TesseractCli {
    /// Use a specific tesseract binary
    #[must_use]
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }

    /// Locate `name` on `PATH`
    ///
    /// # Errors
    ///
    /// Returns error if the binary cannot be found
    pub fn locate(name: &str) -> Result<Self> {
        let binary = which::which(name).map_err(|e| Error::Ocr(format!("{name}: {e}")))?;
        Ok(Self::new(binary))
    }

    fn run(&self, frame: &Frame, extra: &[String]) -> Result<String> {
        let mut image = tempfile::Builder::new()
            .prefix("aisle-ocr-")
            .suffix(".pgm")
            .tempfile()?;
        image.write_all(&frame.to_pgm())?;
        image.flush()?;

        let output = Command::new(&self.binary)
            .arg(image.path())
            .arg("stdout")
            .args(["--psm", "6"])
            .args(extra)
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Ocr(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl OcrEngine for TesseractCli {
    fn read_text(&mut self, frame: &Frame, roi: Option<BoundingBox>) -> OcrOutput {
        let crop = roi.map_or_else(|| frame.clone(), |r| crop_frame(frame, r));
        if crop.is_empty() {
            return OcrOutput::Text(String::new());
        }
        let whitelist = ["-c".to_string(), format!("tessedit_char_whitelist={CHAR_WHITELIST}")];
        match self.run(&crop, &whitelist) {
            Ok(text) => {
                tracing::trace!(text = %text, "ocr pass");
                OcrOutput::Text(text)
            }
            Err(e) => {
                tracing::warn!(error = %e, "ocr failed");
                OcrOutput::Unavailable(e.to_string())
            }
        }
    }

    fn read_words(&mut self, frame: &Frame, roi: Option<BoundingBox>) -> OcrWords {
        let crop = roi.map_or_else(|| frame.clone(), |r| crop_frame(frame, r));
        if crop.is_empty() {
            return OcrWords::Words(Vec::new());
        }
        match self.run(&crop, &["tsv".to_string()]) {
            Ok(tsv) => {
                let words = parse_tsv(&tsv);
                tracing::trace!(words = words.len(), "word ocr pass");
                OcrWords::Words(words)
            }
            Err(e) => {
                tracing::warn!(error = %e, "word ocr failed");
                OcrWords::Unavailable(e.to_string())
            }
        }
    }
}

/// Word rows (level 5) of tesseract's TSV output
///
/// Columns: level, page, block, paragraph, line, word, left, top, width, height, conf,
/// text. Rows without text or with a negative confidence are skipped.
#[must_use]
fn parse_tsv(tsv: &str) -> Vec<OcrWord> {
    tsv.lines()
        .filter_map(|row| {
            let cols: Vec<&str> = row.split('\t').collect();
            if cols.len() < 12 || cols[0] != "5" {
                return None;
            }
            let text = cols[11].trim();
            let confidence: f32 = cols[10].trim().parse().ok()?;
            if text.is_empty() || confidence < 0.0 {
                return None;
            }
            Some(OcrWord {
                text: text.to_string(),
                confidence,
                block: cols[2].parse().ok()?,
                paragraph: cols[3].parse().ok()?,
                line: cols[4].parse().ok()?,
                left: cols[6].parse().ok()?,
            })
        })
        .collect()
}

/// Pick an OCR engine: tesseract when enabled and installed, otherwise none
#[must_use]
pub fn probe_ocr(enabled: bool, binary: Option<&Path>) -> Box<dyn OcrEngine> {
    if !enabled {
        tracing::info!("ocr disabled by configuration");
        return Box::new(NoOcr::new("ocr disabled"));
    }

    let located = binary.map_or_else(
        || TesseractCli::locate("tesseract"),
        |path| {
            if path.exists() {
                Ok(TesseractCli::new(path.to_path_buf()))
            } else {
                Err(Error::Ocr(format!("{} not found", path.display())))
            }
        },
    );

    match located {
        Ok(engine) => {
            tracing::info!(binary = %engine.binary.display(), "ocr engine available");
            Box::new(engine)
        }
        Err(e) => {
            tracing::warn!(error = %e, "ocr engine unavailable");
            Box::new(NoOcr::new(e.to_string()))
        }
    }
}

/// Copy the pixels inside a normalized box into a new frame
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn crop_frame(frame: &Frame, roi: BoundingBox) -> Frame {
    let w = frame.width as f32;
    let h = frame.height as f32;
    let x1 = (roi.x1 * w) as u32;
    let y1 = (roi.y1 * h) as u32;
    let x2 = ((roi.x2 * w) as u32).min(frame.width);
    let y2 = ((roi.y2 * h) as u32).min(frame.height);
    let cw = x2.saturating_sub(x1);
    let ch = y2.saturating_sub(y1);

    let mut rgb = Vec::with_capacity(cw as usize * ch as usize * 3);
    for y in y1..y1 + ch {
        let start = (y as usize * frame.width as usize + x1 as usize) * 3;
        let end = start + cw as usize * 3;
        rgb.extend_from_slice(&frame.rgb[start..end]);
    }

    Frame {
        index: frame.index,
        width: cw,
        height: ch,
        rgb: rgb.into(),
        captured_at: frame.captured_at,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn test_disabled_ocr_is_unavailable() {
        let mut ocr = probe_ocr(false, None);
        let frame = Frame::uniform(0, 4, 4, 0, Instant::now());
        assert!(matches!(ocr.read_text(&frame, None), OcrOutput::Unavailable(_)));
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        let mut ocr = probe_ocr(true, Some(Path::new("/nonexistent/tesseract")));
        let frame = Frame::uniform(0, 4, 4, 0, Instant::now());
        assert!(matches!(ocr.read_text(&frame, None), OcrOutput::Unavailable(_)));
    }

    #[test]
    fn test_parse_tsv_keeps_word_rows() {
        let tsv = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
                   1\t1\t0\t0\t0\t0\t0\t0\t640\t480\t-1\t\n\
                   4\t1\t1\t1\t1\t0\t10\t20\t200\t30\t-1\t\n\
                   5\t1\t1\t1\t1\t1\t10\t20\t80\t30\t91.5\tMineral\n\
                   5\t1\t1\t1\t1\t2\t95\t20\t80\t30\t88\twater\n\
                   5\t1\t1\t1\t2\t1\t10\t60\t40\t30\t-1\t \n";
        let words = parse_tsv(tsv);
        assert_eq!(words.len(), 2);
        assert_eq!(words[0].text, "Mineral");
        assert!((words[0].confidence - 91.5).abs() < f32::EPSILON);
        assert_eq!((words[1].block, words[1].paragraph, words[1].line), (1, 1, 1));
        assert_eq!(words[1].left, 95);
    }

    #[test]
    fn test_disabled_ocr_has_no_words() {
        let mut ocr = probe_ocr(false, None);
        let frame = Frame::uniform(0, 4, 4, 0, Instant::now());
        assert!(matches!(ocr.read_words(&frame, None), OcrWords::Unavailable(_)));
    }

    #[test]
    fn test_crop_frame_dimensions() {
        let frame = Frame::uniform(3, 8, 8, 7, Instant::now());
        let crop = crop_frame(&frame, BoundingBox::new(0.25, 0.25, 0.75, 0.5));
        assert_eq!(crop.width, 4);
        assert_eq!(crop.height, 2);
        assert_eq!(crop.rgb.len(), 4 * 2 * 3);
        assert_eq!(crop.index, 3);
    }
}
