//! Voice-source descriptors: F0, harmonic amplitudes and harmonicity.

use pitch_detection::detector::mcleod::McLeodDetector;
use pitch_detection::detector::PitchDetector;
use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use std::f64::consts::PI;
use std::sync::Arc;

use super::FeatureError;

/// Power threshold for pitch detection
const POWER_THRESHOLD: f32 = 0.8;

/// Clarity threshold for pitch detection
const CLARITY_THRESHOLD: f32 = 0.6;

/// Reference frequency of the semitone scale
pub const SEMITONE_REFERENCE_HZ: f64 = 27.5;

/// Magnitude floor for dB conversion
const DB_FLOOR: f64 = 1e-10;

/// F0 tracker over fixed-size frames
pub struct PitchTracker {
    detector: McLeodDetector<f32>,
    sample_rate: u32,
    min_hz: f64,
    max_hz: f64,
}

impl PitchTracker {
    pub fn new(frame_size: usize, sample_rate: u32, min_hz: f64, max_hz: f64) -> Self {
        Self {
            detector: McLeodDetector::new(frame_size, frame_size / 2),
            sample_rate,
            min_hz,
            max_hz,
        }
    }

    /// F0 in Hz of one frame, `None` when unvoiced or out of range
    pub fn pitch(&mut self, frame: &[f32]) -> Option<f64> {
        let pitch = self.detector.get_pitch(
            frame,
            self.sample_rate as usize,
            POWER_THRESHOLD,
            CLARITY_THRESHOLD,
        )?;
        let hz = pitch.frequency as f64;
        (hz >= self.min_hz && hz <= self.max_hz).then_some(hz)
    }
}

/// F0 in semitones relative to 27.5 Hz
pub fn hz_to_semitone(hz: f64) -> f64 {
    12.0 * (hz / SEMITONE_REFERENCE_HZ).log2()
}

/// Magnitude spectrum of a long (pitch-sized) frame for harmonic measurements
pub struct HarmonicAnalyzer {
    fft: Arc<dyn RealToComplex<f64>>,
    window: Vec<f64>,
    bin_hz: f64,
    fft_input: Vec<f64>,
    fft_output: Vec<Complex<f64>>,
}

impl HarmonicAnalyzer {
    pub fn new(frame_size: usize, sample_rate: u32) -> Self {
        let n_fft = frame_size.next_power_of_two();
        let window = (0..frame_size)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / (frame_size - 1) as f64).cos()))
            .collect();
        let mut planner = RealFftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(n_fft);

        Self {
            fft,
            window,
            bin_hz: sample_rate as f64 / n_fft as f64,
            fft_input: vec![0.0; n_fft],
            fft_output: vec![Complex::new(0.0, 0.0); n_fft / 2 + 1],
        }
    }

    /// Log magnitude spectrum (dB) of a frame
    pub fn spectrum_db(&mut self, frame: &[f32]) -> Result<HarmonicSpectrum, FeatureError> {
        self.fft_input.fill(0.0);
        for ((dst, &s), w) in self.fft_input.iter_mut().zip(frame).zip(&self.window) {
            *dst = s as f64 * w;
        }
        self.fft
            .process(&mut self.fft_input, &mut self.fft_output)
            .map_err(|e| FeatureError::Fft(e.to_string()))?;

        Ok(HarmonicSpectrum {
            db: self
                .fft_output
                .iter()
                .map(|c| 20.0 * (c.norm() + DB_FLOOR).log10())
                .collect(),
            bin_hz: self.bin_hz,
        })
    }
}

pub struct HarmonicSpectrum {
    db: Vec<f64>,
    bin_hz: f64,
}

impl HarmonicSpectrum {
    /// Peak level (dB) within one bin of `hz`
    pub fn level_at(&self, hz: f64) -> f64 {
        let center = (hz / self.bin_hz).round() as isize;
        let last = self.db.len() as isize - 1;
        ((center - 1).max(0)..=(center + 1).min(last))
            .map(|b| self.db[b as usize])
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Level of the harmonic of `f0` closest to `hz`
    pub fn harmonic_level_near(&self, f0: f64, hz: f64) -> f64 {
        let harmonic = (hz / f0).round().max(1.0);
        self.level_at(harmonic * f0)
    }
}

/// Harmonics-to-noise ratio (dB) from the normalised autocorrelation at the
/// pitch period
pub fn hnr_db(frame: &[f32], f0: f64, sample_rate: u32) -> Option<f64> {
    let energy: f64 = frame.iter().map(|&s| (s as f64).powi(2)).sum();
    if energy <= 1e-12 {
        return None;
    }

    let period = (sample_rate as f64 / f0).round() as usize;
    let lo = period.saturating_sub(2).max(1);
    let hi = (period + 2).min(frame.len() - 1);
    if lo > hi {
        return None;
    }

    let r = (lo..=hi)
        .map(|lag| {
            let head = &frame[..frame.len() - lag];
            let tail = &frame[lag..];
            let cross: f64 = head.iter().zip(tail).map(|(a, b)| *a as f64 * *b as f64).sum();
            let e1: f64 = head.iter().map(|&s| (s as f64).powi(2)).sum();
            let e2: f64 = tail.iter().map(|&s| (s as f64).powi(2)).sum();
            cross / (e1 * e2).sqrt().max(1e-12)
        })
        .fold(f64::NEG_INFINITY, f64::max)
        .clamp(1e-4, 1.0 - 1e-4);

    Some(10.0 * (r / (1.0 - r)).log10())
}

/// Peak absolute amplitude of a frame
pub fn peak_amplitude(frame: &[f32]) -> f64 {
    frame.iter().fold(0.0f64, |m, &s| m.max((s as f64).abs()))
}
