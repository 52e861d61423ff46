//! Speech output
//!
//! The audio device is owned by exactly one [`SpeechSink`], which lives on the
//! [`SpeechWorker`] thread. The dispatcher talks to the worker only through the
//! [`Announcer`](crate::dispatch::Announcer) seam, so the frame loop never waits on audio.

pub mod phrases;
mod playback;
mod resample;
mod sink;
mod worker;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub use playback::{AudioPlayback, PlaybackEnd};
pub use resample::resample;
pub use sink::{EspeakSink, LogSink, SpeechBackend, SpeechSink, decode_wav, probe_sink};
pub use worker::SpeechWorker;

/// Shared stop flag for in-flight speech
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
