use rubato::{FftFixedIn, Resampler};
use tracing::debug;

use super::AudioError;

/// Target sample rate for feature extraction
pub const TARGET_SAMPLE_RATE: u32 = 16000;

/// Requested chunk size; rubato rounds it to a multiple of the rate ratio
const CHUNK_FRAMES: usize = 1024;

/// Offline resampler for whole mono clips
pub struct AudioResampler {
    resampler: FftFixedIn<f32>,
    input_buffer: Vec<Vec<f32>>,
    output_buffer: Vec<Vec<f32>>,
    chunk_frames: usize,
    ratio: f64,
}

impl AudioResampler {
    /// Create a mono resampler from `from_rate` to `to_rate`
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self, AudioError> {
        let ratio = to_rate as f64 / from_rate as f64;

        debug!(
            "Creating resampler: {} Hz -> {} Hz (ratio: {:.4})",
            from_rate, to_rate, ratio
        );

        let resampler = FftFixedIn::new(
            from_rate as usize,
            to_rate as usize,
            CHUNK_FRAMES,
            2, // sub_chunks for quality
            1,
        )
        .map_err(|e| AudioError::Resample(e.to_string()))?;

        let chunk_frames = resampler.input_frames_next();
        let input_buffer = vec![vec![0.0f32; chunk_frames]; 1];
        let output_buffer = resampler.output_buffer_allocate(true);

        Ok(Self {
            resampler,
            input_buffer,
            output_buffer,
            chunk_frames,
            ratio,
        })
    }

    /// Resample a complete clip.
    ///
    /// The tail is zero-padded to a full chunk and the resampler delay is
    /// trimmed, so the output length is `round(input.len() * ratio)`.
    pub fn process_all(&mut self, input: &[f32]) -> Result<Vec<f32>, AudioError> {
        let delay = self.resampler.output_delay();
        let expected = (input.len() as f64 * self.ratio).round() as usize;
        let mut output = Vec::with_capacity(expected + delay + self.output_buffer[0].len());

        let mut pos = 0;
        while output.len() < expected + delay {
            let end = (pos + self.chunk_frames).min(input.len());
            let chunk = &mut self.input_buffer[0];
            chunk.fill(0.0);
            if pos < end {
                chunk[..end - pos].copy_from_slice(&input[pos..end]);
            }

            let (_, output_frames) = self
                .resampler
                .process_into_buffer(&self.input_buffer, &mut self.output_buffer, None)
                .map_err(|e| AudioError::Resample(e.to_string()))?;
            output.extend_from_slice(&self.output_buffer[0][..output_frames]);
            pos += self.chunk_frames;
        }

        output.drain(..delay.min(output.len()));
        output.truncate(expected);
        self.resampler.reset();
        Ok(output)
    }
}

/// Resample `input` from `from_rate` to `to_rate`, passing it through when equal
pub fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, AudioError> {
    if from_rate == to_rate {
        return Ok(input.to_vec());
    }
    AudioResampler::new(from_rate, to_rate)?.process_all(input)
}
