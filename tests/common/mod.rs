//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use aisle_guide::{Error, Result};
use aisle_guide::camera::Frame;
use aisle_guide::dispatch::{
    Announcement, AnnouncementOutcome, AnnouncementReport, Announcer, ShutdownPolicy,
};
use aisle_guide::perception::{
    BoundingBox, Classification, DetectionSample, OcrEngine, OcrOutput, QueryType,
    ValueClassifier,
};
use aisle_guide::speech::{Interrupt, PlaybackEnd, SpeechSink};

/// A small gray frame
#[must_use]
pub fn frame(index: u64) -> Frame {
    Frame::uniform(index, 16, 16, 128, Instant::now())
}

/// Labelled identify sample
#[must_use]
pub fn identify(label: &str, at: Instant) -> DetectionSample {
    DetectionSample::labelled(QueryType::Identify, label, 0.8, None, at)
}

/// Announcer that records hand-offs and completes them only when told to
#[derive(Default)]
pub struct ScriptedAnnouncer {
    pub begun: Vec<Announcement>,
    pub finished: VecDeque<AnnouncementReport>,
    pub shutdown_policy: Option<ShutdownPolicy>,
    /// Refuse the next hand-off, as a dead speech thread would
    pub refuse_next: bool,
}

impl ScriptedAnnouncer {
    /// Mark the most recent announcement as finished
    pub fn complete_last(&mut self) {
        self.finish_last(AnnouncementOutcome::Completed);
    }

    /// Report the most recent announcement as failed in the sink
    pub fn fail_last(&mut self, reason: &str) {
        self.finish_last(AnnouncementOutcome::Failed(reason.to_string()));
    }

    fn finish_last(&mut self, outcome: AnnouncementOutcome) {
        if let Some(a) = self.begun.last() {
            self.finished.push_back(AnnouncementReport {
                id: a.id,
                command: a.command,
                outcome,
                finished_at: Instant::now(),
            });
        }
    }
}

impl Announcer for ScriptedAnnouncer {
    fn begin(&mut self, announcement: Announcement) -> Result<()> {
        if std::mem::take(&mut self.refuse_next) {
            return Err(Error::Speech("speech worker is gone".to_string()));
        }
        self.begun.push(announcement);
        Ok(())
    }

    fn poll_finished(&mut self) -> Option<AnnouncementReport> {
        self.finished.pop_front()
    }

    fn shutdown(&mut self, policy: ShutdownPolicy) -> Result<()> {
        self.shutdown_policy = Some(policy);
        Ok(())
    }
}

/// Classifier that always answers the same
pub struct FixedClassifier(pub Classification);

impl ValueClassifier for FixedClassifier {
    fn classify(&mut self, _frame: &Frame, _roi: Option<BoundingBox>) -> Classification {
        self.0.clone()
    }
}

/// OCR engine that always reads the same text
pub struct FixedOcr(pub String);

impl OcrEngine for FixedOcr {
    fn read_text(&mut self, _frame: &Frame, _roi: Option<BoundingBox>) -> OcrOutput {
        OcrOutput::Text(self.0.clone())
    }
}

/// Speech sink that takes a while and records how each utterance ended
pub struct SlowSink {
    pub duration: Duration,
    pub ends: Arc<Mutex<Vec<PlaybackEnd>>>,
}

impl SlowSink {
    #[must_use]
    pub fn new(duration: Duration) -> (Self, Arc<Mutex<Vec<PlaybackEnd>>>) {
        let ends = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                duration,
                ends: Arc::clone(&ends),
            },
            ends,
        )
    }
}

impl SpeechSink for SlowSink {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn speak(&mut self, _text: &str, interrupt: &Interrupt) -> Result<PlaybackEnd> {
        let deadline = Instant::now() + self.duration;
        let end = loop {
            if interrupt.is_raised() {
                break PlaybackEnd::Interrupted;
            }
            if Instant::now() >= deadline {
                break PlaybackEnd::Finished;
            }
            std::thread::sleep(Duration::from_millis(5));
        };
        self.ends.lock().unwrap().push(end);
        Ok(end)
    }
}
