pub mod loader;
pub mod resampler;

pub use loader::{load_audio, read_wav, AudioClip};
pub use resampler::{resample, AudioResampler, TARGET_SAMPLE_RATE};

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading audio
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Audio file not found: {0:?}")]
    NotFound(PathBuf),

    #[error("Failed to decode {path:?}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("Unsupported WAV sample format: {0}")]
    UnsupportedFormat(String),

    #[error("Resampling failed: {0}")]
    Resample(String),
}
