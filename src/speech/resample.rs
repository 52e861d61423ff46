//! Sample rate conversion for playback

use rubato::{FftFixedIn, Resampler};

use crate::{Error, Result};

const CHUNK_SIZE: usize = 1024;
const SUB_CHUNKS: usize = 2;

/// Resample mono audio from `from_rate` to `to_rate`
///
/// The output is trimmed to the resampler's delay, so it starts in step with the input
/// and has `len * to_rate / from_rate` samples.
///
/// # Errors
///
/// Returns error if either rate is zero or the resampler fails
#[allow(clippy::cast_possible_truncation)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    if from_rate == 0 || to_rate == 0 {
        return Err(Error::Audio(format!("cannot resample {from_rate} Hz to {to_rate} Hz")));
    }

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, SUB_CHUNKS, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;
    let delay = resampler.output_delay();
    let expected = (samples.len() as u64 * u64::from(to_rate) / u64::from(from_rate)) as usize;

    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    let mut output: Vec<f64> = Vec::with_capacity(delay + expected + CHUNK_SIZE);

    // The resampler may round the chunk size to fit the rate ratio
    let mut pos = 0;
    while input.len() - pos >= resampler.input_frames_next() {
        let end = pos + resampler.input_frames_next();
        let out = resampler
            .process(&[&input[pos..end]], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend_from_slice(&out[0]);
        pos = end;
    }
    if pos < input.len() {
        let rest: &[&[f64]] = &[&input[pos..]];
        let out = resampler
            .process_partial(Some(rest), None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend_from_slice(&out[0]);
    }

    // Flush what is still held back by the filter delay
    while output.len() < delay + expected {
        let out = resampler
            .process_partial::<Vec<f64>>(None, None)
            .map_err(|e| Error::Audio(format!("resample flush failed: {e}")))?;
        if out[0].is_empty() {
            break;
        }
        output.extend_from_slice(&out[0]);
    }

    Ok(output
        .iter()
        .skip(delay)
        .take(expected)
        .map(|&s| s as f32)
        .collect())
}
