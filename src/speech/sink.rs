//! Speech output backends

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};

use super::Interrupt;
use super::playback::{AudioPlayback, PlaybackEnd};
use crate::{Error, Result};

/// Which speech backend to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeechBackend {
    /// `espeak-ng` synthesis played through the default output device
    #[default]
    Espeak,
    /// Write utterances to the log only
    Log,
}

/// Something that can say a sentence out loud
///
/// Only the speech worker calls this, one utterance at a time.
pub trait SpeechSink: Send {
    fn name(&self) -> &str;

    /// Say `text`, blocking until done or interrupted
    ///
    /// # Errors
    ///
    /// Returns error if synthesis or playback failed
    fn speak(&mut self, text: &str, interrupt: &Interrupt) -> Result<PlaybackEnd>;

    /// Release the audio device
    fn release(&mut self) {}
}

/// Sink that only logs
#[derive(Debug, Default)]
pub struct LogSink {
    spoken: usize,
}

impl SpeechSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn speak(&mut self, text: &str, interrupt: &Interrupt) -> Result<PlaybackEnd> {
        if interrupt.is_raised() {
            return Ok(PlaybackEnd::Interrupted);
        }
        self.spoken += 1;
        tracing::info!(utterance = self.spoken, text = %text, "speak");
        Ok(PlaybackEnd::Finished)
    }
}

/// `espeak-ng` rendered to a WAV file, decoded with hound and played with cpal
pub struct EspeakSink {
    binary: PathBuf,
    voice: String,
    rate: u32,
    playback: Option<AudioPlayback>,
}

impl EspeakSink {
    /// Find `espeak-ng` (or the given binary)
    ///
    /// # Errors
    ///
    /// Returns error if the binary cannot be found
    pub fn locate(binary: Option<&Path>, voice: impl Into<String>, rate: u32) -> Result<Self> {
        let binary = match binary {
            Some(path) if path.exists() => path.to_path_buf(),
            Some(path) => {
                return Err(Error::Speech(format!("{} not found", path.display())));
            }
            None => which::which("espeak-ng")
                .or_else(|_| which::which("espeak"))
                .map_err(|e| Error::Speech(format!("espeak-ng: {e}")))?,
        };
        Ok(Self {
            binary,
            voice: voice.into(),
            rate,
            playback: None,
        })
    }

    fn synthesize(&self, text: &str) -> Result<(Vec<f32>, u32)> {
        let wav = tempfile::Builder::new()
            .prefix("aisle-speech-")
            .suffix(".wav")
            .tempfile()?;

        let output = Command::new(&self.binary)
            .arg("-v")
            .arg(&self.voice)
            .arg("-s")
            .arg(self.rate.to_string())
            .arg("-w")
            .arg(wav.path())
            .arg(text)
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Speech(format!(
                "{} exited with {}: {}",
                self.binary.display(),
                output.status,
                stderr.trim()
            )));
        }

        decode_wav(wav.path())
    }

    fn playback_for(&mut self, sample_rate: u32) -> Result<&AudioPlayback> {
        if self.playback.as_ref().is_some_and(|p| p.requested_rate() != sample_rate) {
            self.playback = None;
        }
        if self.playback.is_none() {
            self.playback = Some(AudioPlayback::open(sample_rate)?);
        }
        self.playback
            .as_ref()
            .ok_or_else(|| Error::Audio("playback not initialized".to_string()))
    }
}

impl SpeechSink for EspeakSink {
    fn name(&self) -> &'static str {
        "espeak"
    }

    fn speak(&mut self, text: &str, interrupt: &Interrupt) -> Result<PlaybackEnd> {
        let (samples, sample_rate) = self.synthesize(text)?;
        if interrupt.is_raised() {
            return Ok(PlaybackEnd::Interrupted);
        }
        let playback = self.playback_for(sample_rate)?;
        playback.play(samples, sample_rate, interrupt)
    }

    fn release(&mut self) {
        if self.playback.take().is_some() {
            tracing::debug!("audio device released");
        }
    }
}

/// Decode a WAV file to mono f32 samples
///
/// # Errors
///
/// Returns error if the file is not a readable WAV
#[allow(clippy::cast_precision_loss)]
pub fn decode_wav(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    Ok((mono, spec.sample_rate))
}

/// Pick a speech sink, falling back to [`LogSink`] when the backend is missing
#[must_use]
pub fn probe_sink(
    backend: SpeechBackend,
    binary: Option<&Path>,
    voice: &str,
    rate: u32,
) -> Box<dyn SpeechSink> {
    match backend {
        SpeechBackend::Log => Box::new(LogSink::default()),
        SpeechBackend::Espeak => match EspeakSink::locate(binary, voice, rate) {
            Ok(sink) => {
                tracing::info!(binary = %sink.binary.display(), voice, rate, "speech backend ready");
                Box::new(sink)
            }
            Err(e) => {
                tracing::warn!(error = %e, "speech backend unavailable, logging utterances instead");
                Box::new(LogSink::default())
            }
        },
    }
}
