use hound::{SampleFormat, WavReader};
use std::path::Path;
use tracing::debug;

use super::resampler::resample;
use super::AudioError;

/// Decoded mono clip
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioClip {
    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Read a WAV file and downmix it to mono f32 in [-1, 1]
pub fn read_wav(path: &Path) -> Result<AudioClip, AudioError> {
    if !path.exists() {
        return Err(AudioError::NotFound(path.to_path_buf()));
    }

    let mut reader = WavReader::open(path).map_err(|e| AudioError::Decode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let decode_err = |e: hound::Error| AudioError::Decode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(decode_err)?,
        (SampleFormat::Int, bits) if (8..=32).contains(&bits) => {
            let scale = 1.0 / (1i64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()
                .map_err(decode_err)?
        }
        (format, bits) => {
            return Err(AudioError::UnsupportedFormat(format!(
                "{:?} {}-bit",
                format, bits
            )))
        }
    };

    let samples: Vec<f32> = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    debug!(
        "Read {:?}: {} Hz, {} channels, {} frames",
        path,
        spec.sample_rate,
        channels,
        samples.len()
    );

    Ok(AudioClip {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Read a WAV file as mono audio at `target_rate`
pub fn load_audio(path: &Path, target_rate: u32) -> Result<AudioClip, AudioError> {
    let clip = read_wav(path)?;
    let samples = resample(&clip.samples, clip.sample_rate, target_rate)?;
    Ok(AudioClip {
        samples,
        sample_rate: target_rate,
    })
}
