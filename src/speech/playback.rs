//! Audio playback to speakers

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};

use super::Interrupt;
use super::resample::resample;
use crate::{Error, Result};

/// How playback ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEnd {
    Finished,
    Interrupted,
}

/// Plays mono samples on the default output device
///
/// Audio at a rate the device cannot take natively is resampled to the device's default
/// rate before playback.
pub struct AudioPlayback {
    device: Device,
    config: StreamConfig,
    requested_rate: u32,
}

impl AudioPlayback {
    /// Open the default output device, at `sample_rate` if it is supported
    ///
    /// # Errors
    ///
    /// Returns error if there is no output device or it reports no usable config
    pub fn open(sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let rate = SampleRate(sample_rate);
        let native = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| c.channels() == 1 && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2 && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
                })
            });

        let config = match native {
            Some(supported) => supported.with_sample_rate(rate).config(),
            None => {
                let fallback = device
                    .default_output_config()
                    .map_err(|e| Error::Audio(format!("no output config: {e}")))?
                    .config();
                tracing::info!(
                    requested = sample_rate,
                    device_rate = fallback.sample_rate.0,
                    "output rate not supported, resampling"
                );
                fallback
            }
        };

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self {
            device,
            config,
            requested_rate: sample_rate,
        })
    }

    /// Rate the device runs at
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Rate this playback was opened for
    #[must_use]
    pub const fn requested_rate(&self) -> u32 {
        self.requested_rate
    }

    /// Play samples recorded at `source_rate` to the end, or until `interrupt` is raised
    ///
    /// # Errors
    ///
    /// Returns error if resampling fails or the output stream cannot be built or started
    pub fn play(&self, samples: Vec<f32>, source_rate: u32, interrupt: &Interrupt) -> Result<PlaybackEnd> {
        if samples.is_empty() {
            return Ok(PlaybackEnd::Finished);
        }
        let samples = if source_rate == self.sample_rate() {
            samples
        } else {
            resample(&samples, source_rate, self.sample_rate())?
        };

        let channels = usize::from(self.config.channels);
        let sample_count = samples.len();
        let samples: Arc<[f32]> = samples.into();
        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let stream = {
            let samples = Arc::clone(&samples);
            let position = Arc::clone(&position);
            let finished = Arc::clone(&finished);
            self.device
                .build_output_stream(
                    &self.config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut pos = position.load(Ordering::Relaxed);
                        for frame in data.chunks_mut(channels) {
                            let sample = samples.get(pos).copied().unwrap_or_else(|| {
                                finished.store(true, Ordering::Release);
                                0.0
                            });
                            frame.fill(sample);
                            if pos < samples.len() {
                                pos += 1;
                            }
                        }
                        position.store(pos, Ordering::Relaxed);
                    },
                    |err| {
                        tracing::error!(error = %err, "audio playback error");
                    },
                    None,
                )
                .map_err(|e| Error::Audio(e.to_string()))?
        };

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let duration_ms = (sample_count as u64 * 1000) / u64::from(self.sample_rate().max(1));
        let start = Instant::now();
        let timeout = Duration::from_millis(duration_ms + 500);

        let mut end = PlaybackEnd::Finished;
        while !finished.load(Ordering::Acquire) {
            if interrupt.is_raised() {
                end = PlaybackEnd::Interrupted;
                break;
            }
            if start.elapsed() > timeout {
                tracing::warn!(samples = sample_count, "playback timed out");
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }

        if end == PlaybackEnd::Finished {
            // Let the device drain its last buffer
            std::thread::sleep(Duration::from_millis(100));
        }

        drop(stream);
        tracing::debug!(samples = sample_count, ?end, "playback complete");

        Ok(end)
    }
}
