//! Acoustic functional features.
//!
//! Each clip is reduced to a fixed 88-dimensional vector following the
//! layout of the extended Geneva minimalistic acoustic parameter set:
//! frame-level descriptors (pitch, loudness, spectral shape, formants,
//! voice quality) are smoothed with a 3-frame moving average and then
//! summarised by functionals over all, voiced, or unvoiced frames.

mod functionals;
mod lpc;
mod spectral;
mod voice;

use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::audio::{load_audio, AudioError};
use functionals as fx;
use spectral::{SpectralAnalyzer, SpectralFrame, N_MFCC};
use voice::{HarmonicAnalyzer, PitchTracker};

/// Length of every feature vector
pub const FEATURE_COUNT: usize = 88;

/// Feature names in vector order
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "F0semitoneFrom27.5Hz_sma3nz_amean",
    "F0semitoneFrom27.5Hz_sma3nz_stddevNorm",
    "F0semitoneFrom27.5Hz_sma3nz_percentile20.0",
    "F0semitoneFrom27.5Hz_sma3nz_percentile50.0",
    "F0semitoneFrom27.5Hz_sma3nz_percentile80.0",
    "F0semitoneFrom27.5Hz_sma3nz_pctlrange0-2",
    "F0semitoneFrom27.5Hz_sma3nz_meanRisingSlope",
    "F0semitoneFrom27.5Hz_sma3nz_stddevRisingSlope",
    "F0semitoneFrom27.5Hz_sma3nz_meanFallingSlope",
    "F0semitoneFrom27.5Hz_sma3nz_stddevFallingSlope",
    "loudness_sma3_amean",
    "loudness_sma3_stddevNorm",
    "loudness_sma3_percentile20.0",
    "loudness_sma3_percentile50.0",
    "loudness_sma3_percentile80.0",
    "loudness_sma3_pctlrange0-2",
    "loudness_sma3_meanRisingSlope",
    "loudness_sma3_stddevRisingSlope",
    "loudness_sma3_meanFallingSlope",
    "loudness_sma3_stddevFallingSlope",
    "spectralFlux_sma3_amean",
    "spectralFlux_sma3_stddevNorm",
    "mfcc1_sma3_amean",
    "mfcc1_sma3_stddevNorm",
    "mfcc2_sma3_amean",
    "mfcc2_sma3_stddevNorm",
    "mfcc3_sma3_amean",
    "mfcc3_sma3_stddevNorm",
    "mfcc4_sma3_amean",
    "mfcc4_sma3_stddevNorm",
    "jitterLocal_sma3nz_amean",
    "jitterLocal_sma3nz_stddevNorm",
    "shimmerLocaldB_sma3nz_amean",
    "shimmerLocaldB_sma3nz_stddevNorm",
    "HNRdBACF_sma3nz_amean",
    "HNRdBACF_sma3nz_stddevNorm",
    "logRelF0-H1-H2_sma3nz_amean",
    "logRelF0-H1-H2_sma3nz_stddevNorm",
    "logRelF0-H1-A3_sma3nz_amean",
    "logRelF0-H1-A3_sma3nz_stddevNorm",
    "F1frequency_sma3nz_amean",
    "F1frequency_sma3nz_stddevNorm",
    "F1bandwidth_sma3nz_amean",
    "F1bandwidth_sma3nz_stddevNorm",
    "F1amplitudeLogRelF0_sma3nz_amean",
    "F1amplitudeLogRelF0_sma3nz_stddevNorm",
    "F2frequency_sma3nz_amean",
    "F2frequency_sma3nz_stddevNorm",
    "F2bandwidth_sma3nz_amean",
    "F2bandwidth_sma3nz_stddevNorm",
    "F2amplitudeLogRelF0_sma3nz_amean",
    "F2amplitudeLogRelF0_sma3nz_stddevNorm",
    "F3frequency_sma3nz_amean",
    "F3frequency_sma3nz_stddevNorm",
    "F3bandwidth_sma3nz_amean",
    "F3bandwidth_sma3nz_stddevNorm",
    "F3amplitudeLogRelF0_sma3nz_amean",
    "F3amplitudeLogRelF0_sma3nz_stddevNorm",
    "alphaRatioV_sma3nz_amean",
    "alphaRatioV_sma3nz_stddevNorm",
    "hammarbergIndexV_sma3nz_amean",
    "hammarbergIndexV_sma3nz_stddevNorm",
    "slopeV0-500_sma3nz_amean",
    "slopeV0-500_sma3nz_stddevNorm",
    "slopeV500-1500_sma3nz_amean",
    "slopeV500-1500_sma3nz_stddevNorm",
    "spectralFluxV_sma3nz_amean",
    "spectralFluxV_sma3nz_stddevNorm",
    "mfcc1V_sma3nz_amean",
    "mfcc1V_sma3nz_stddevNorm",
    "mfcc2V_sma3nz_amean",
    "mfcc2V_sma3nz_stddevNorm",
    "mfcc3V_sma3nz_amean",
    "mfcc3V_sma3nz_stddevNorm",
    "mfcc4V_sma3nz_amean",
    "mfcc4V_sma3nz_stddevNorm",
    "alphaRatioUV_sma3nz_amean",
    "hammarbergIndexUV_sma3nz_amean",
    "slopeUV0-500_sma3nz_amean",
    "slopeUV500-1500_sma3nz_amean",
    "spectralFluxUV_sma3nz_amean",
    "loudnessPeaksPerSec",
    "VoicedSegmentsPerSec",
    "MeanVoicedSegmentLengthSec",
    "StddevVoicedSegmentLengthSec",
    "MeanUnvoicedSegmentLength",
    "StddevUnvoicedSegmentLength",
    "equivalentSoundLevel_dBp",
];

/// Errors that can occur during feature extraction
#[derive(Debug, Error)]
pub enum FeatureError {
    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error("Clip too short: {samples} samples, need at least {required}")]
    TooShort { samples: usize, required: usize },

    #[error("FFT failed: {0}")]
    Fft(String),

    #[error("Feature matrix shape mismatch: {0}")]
    Shape(String),

    #[error("Failed to build worker pool: {0}")]
    ThreadPool(String),

    #[error("{path:?}: {source}")]
    File {
        path: PathBuf,
        source: Box<FeatureError>,
    },
}

/// Extractor configuration; persisted with the model so inference matches training
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Rate every clip is resampled to before analysis
    pub sample_rate: u32,
    /// Frame step in milliseconds
    pub hop_ms: u32,
    /// Spectral analysis window in milliseconds
    pub spectral_window_ms: u32,
    /// Pitch analysis window in samples
    pub pitch_window: usize,
    /// Lowest accepted F0 in Hz
    pub f0_min_hz: f64,
    /// Highest accepted F0 in Hz
    pub f0_max_hz: f64,
    /// Worker threads for batch extraction (0 = all cores)
    pub n_jobs: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            hop_ms: 10,
            spectral_window_ms: 25,
            pitch_window: 1024,
            f0_min_hz: 55.0,
            f0_max_hz: 1000.0,
            n_jobs: 0,
        }
    }
}

impl FeatureConfig {
    fn hop_samples(&self) -> usize {
        (self.sample_rate as usize * self.hop_ms as usize / 1000).max(1)
    }

    fn spectral_window(&self) -> usize {
        (self.sample_rate as usize * self.spectral_window_ms as usize / 1000).max(2)
    }
}

/// Functional feature vector of one clip
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    /// Pairs of feature name and value
    pub fn named(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        FEATURE_NAMES.iter().copied().zip(self.values.iter().copied())
    }
}

/// Frame-level descriptor contours of one clip
#[derive(Default)]
struct Contours {
    voiced: Vec<bool>,
    f0_semitone: Vec<f64>,
    loudness: Vec<f64>,
    flux: Vec<f64>,
    mfcc: [Vec<f64>; N_MFCC],
    alpha_ratio: Vec<f64>,
    hammarberg: Vec<f64>,
    slope_0_500: Vec<f64>,
    slope_500_1500: Vec<f64>,
    energy: Vec<f64>,
    // Voiced-frame only
    jitter: Vec<f64>,
    shimmer: Vec<f64>,
    hnr: Vec<f64>,
    h1_h2: Vec<f64>,
    h1_a3: Vec<f64>,
    formant_freq: [Vec<f64>; 3],
    formant_bw: [Vec<f64>; 3],
    formant_amp: [Vec<f64>; 3],
}

impl Contours {
    fn push_spectral(&mut self, frame: &SpectralFrame) {
        self.loudness.push(frame.loudness);
        self.flux.push(frame.flux);
        for (contour, value) in self.mfcc.iter_mut().zip(frame.mfcc) {
            contour.push(value);
        }
        self.alpha_ratio.push(frame.alpha_ratio);
        self.hammarberg.push(frame.hammarberg);
        self.slope_0_500.push(frame.slope_0_500);
        self.slope_500_1500.push(frame.slope_500_1500);
    }
}

/// Converts audio into functional feature vectors
#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor {
    config: FeatureConfig,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    /// Decode, resample and extract one audio file
    pub fn extract_file(&self, path: &Path) -> Result<FeatureVector, FeatureError> {
        let wrap = |source: FeatureError| FeatureError::File {
            path: path.to_path_buf(),
            source: Box::new(source),
        };
        let clip = load_audio(path, self.config.sample_rate).map_err(|e| wrap(e.into()))?;
        self.extract(&clip.samples).map_err(wrap)
    }

    /// Extract a batch of files in parallel; rows keep the input order
    pub fn extract_batch(&self, paths: &[PathBuf]) -> Result<Array2<f64>, FeatureError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.n_jobs)
            .build()
            .map_err(|e| FeatureError::ThreadPool(e.to_string()))?;

        info!(
            "Extracting features for {} files on {} workers",
            paths.len(),
            pool.current_num_threads()
        );

        let rows: Vec<FeatureVector> = pool.install(|| {
            paths
                .par_iter()
                .map(|path| self.extract_file(path))
                .collect::<Result<Vec<_>, _>>()
        })?;

        let flat: Vec<f64> = rows.into_iter().flat_map(|r| r.into_values()).collect();
        Array2::from_shape_vec((paths.len(), FEATURE_COUNT), flat)
            .map_err(|e| FeatureError::Shape(e.to_string()))
    }

    /// Extract features from mono samples at the configured rate
    pub fn extract(&self, samples: &[f32]) -> Result<FeatureVector, FeatureError> {
        let config = &self.config;
        if samples.len() < config.pitch_window {
            return Err(FeatureError::TooShort {
                samples: samples.len(),
                required: config.pitch_window,
            });
        }

        let contours = self.contours(samples)?;
        let hop_secs = config.hop_samples() as f64 / config.sample_rate as f64;
        let duration_secs = samples.len() as f64 / config.sample_rate as f64;
        let values = assemble(&contours, hop_secs, duration_secs);

        debug!(
            "Extracted {} features from {} frames ({} voiced)",
            values.len(),
            contours.voiced.len(),
            contours.voiced.iter().filter(|v| **v).count()
        );

        Ok(FeatureVector { values })
    }

    fn contours(&self, samples: &[f32]) -> Result<Contours, FeatureError> {
        let config = &self.config;
        let hop = config.hop_samples();
        let pitch_window = config.pitch_window;
        let spectral_window = config.spectral_window().min(pitch_window);
        let n_frames = 1 + (samples.len() - pitch_window) / hop;

        let mut pitch = PitchTracker::new(
            pitch_window,
            config.sample_rate,
            config.f0_min_hz,
            config.f0_max_hz,
        );
        let mut harmonics = HarmonicAnalyzer::new(pitch_window, config.sample_rate);
        let mut spectral = SpectralAnalyzer::new(spectral_window, config.sample_rate);

        let mut c = Contours::default();
        let mut prev_voiced: Option<(f64, f64)> = None; // (period, peak amplitude)

        for i in 0..n_frames {
            let start = i * hop;
            let pitch_frame = &samples[start..start + pitch_window];
            let spec_start = start + (pitch_window - spectral_window) / 2;
            let spec_frame = &samples[spec_start..spec_start + spectral_window];

            let spec = spectral.analyze(spec_frame)?;
            c.push_spectral(&spec);
            c.energy.push(
                spec_frame.iter().map(|&s| (s as f64).powi(2)).sum::<f64>()
                    / spectral_window as f64,
            );

            let f0 = pitch.pitch(pitch_frame);
            c.voiced.push(f0.is_some());
            let Some(f0) = f0 else {
                c.f0_semitone.push(0.0);
                prev_voiced = None;
                continue;
            };
            c.f0_semitone.push(voice::hz_to_semitone(f0));

            let period = 1.0 / f0;
            let amplitude = voice::peak_amplitude(pitch_frame);
            if let Some((prev_period, prev_amplitude)) = prev_voiced {
                c.jitter
                    .push((period - prev_period).abs() / ((period + prev_period) / 2.0));
                if prev_amplitude > 0.0 && amplitude > 0.0 {
                    c.shimmer
                        .push((20.0 * (amplitude / prev_amplitude).log10()).abs());
                }
            }
            prev_voiced = Some((period, amplitude));

            if let Some(hnr) = voice::hnr_db(pitch_frame, f0, config.sample_rate) {
                c.hnr.push(hnr);
            }

            let spectrum = harmonics.spectrum_db(pitch_frame)?;
            let h1 = spectrum.level_at(f0);
            c.h1_h2.push(h1 - spectrum.level_at(2.0 * f0));

            let found = lpc::formants(spec_frame, config.sample_rate);
            for (k, formant) in found.iter().take(3).enumerate() {
                c.formant_freq[k].push(formant.frequency);
                c.formant_bw[k].push(formant.bandwidth);
                c.formant_amp[k].push(spectrum.harmonic_level_near(f0, formant.frequency) - h1);
            }
            if let Some(f3) = found.get(2) {
                c.h1_a3.push(h1 - spectrum.harmonic_level_near(f0, f3.frequency));
            }
        }

        Ok(c)
    }
}

/// 3-frame symmetric moving average
fn smooth3(values: &[f64]) -> Vec<f64> {
    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(1);
            let hi = (i + 2).min(values.len());
            fx::mean(&values[lo..hi])
        })
        .collect()
}

/// Smooth each voiced segment independently
fn smooth3_segments(segments: Vec<Vec<f64>>) -> Vec<Vec<f64>> {
    segments.iter().map(|s| smooth3(s)).collect()
}

fn select(values: &[f64], mask: &[bool], keep: bool) -> Vec<f64> {
    values
        .iter()
        .zip(mask)
        .filter(|(_, m)| **m == keep)
        .map(|(v, _)| *v)
        .collect()
}

fn push_mean_cv(out: &mut Vec<f64>, values: &[f64]) {
    out.push(fx::mean(values));
    out.push(fx::stddev_norm(values));
}

fn push_contour_functionals(out: &mut Vec<f64>, segments: &[Vec<f64>], hop_secs: f64) {
    let all: Vec<f64> = segments.iter().flatten().copied().collect();
    let p20 = fx::percentile(&all, 20.0);
    let p80 = fx::percentile(&all, 80.0);
    let slopes = fx::slopes(segments, hop_secs);

    out.push(fx::mean(&all));
    out.push(fx::stddev_norm(&all));
    out.push(p20);
    out.push(fx::percentile(&all, 50.0));
    out.push(p80);
    out.push(p80 - p20);
    out.push(slopes.rising_mean);
    out.push(slopes.rising_std);
    out.push(slopes.falling_mean);
    out.push(slopes.falling_std);
}

fn assemble(c: &Contours, hop_secs: f64, duration_secs: f64) -> Vec<f64> {
    let voiced = &c.voiced;
    let mut out = Vec::with_capacity(FEATURE_COUNT);

    let f0_segments = smooth3_segments(fx::masked_segments(&c.f0_semitone, voiced));
    push_contour_functionals(&mut out, &f0_segments, hop_secs);

    let loudness = smooth3(&c.loudness);
    push_contour_functionals(&mut out, &[loudness.clone()], hop_secs);

    let flux = smooth3(&c.flux);
    push_mean_cv(&mut out, &flux);
    let mfcc: Vec<Vec<f64>> = c.mfcc.iter().map(|m| smooth3(m)).collect();
    for m in &mfcc {
        push_mean_cv(&mut out, m);
    }

    for contour in [&c.jitter, &c.shimmer, &c.hnr, &c.h1_h2, &c.h1_a3] {
        push_mean_cv(&mut out, &smooth3(contour));
    }
    for k in 0..3 {
        push_mean_cv(&mut out, &smooth3(&c.formant_freq[k]));
        push_mean_cv(&mut out, &smooth3(&c.formant_bw[k]));
        push_mean_cv(&mut out, &smooth3(&c.formant_amp[k]));
    }

    let alpha = smooth3(&c.alpha_ratio);
    let hammarberg = smooth3(&c.hammarberg);
    let slope_lo = smooth3(&c.slope_0_500);
    let slope_hi = smooth3(&c.slope_500_1500);

    for contour in [&alpha, &hammarberg, &slope_lo, &slope_hi, &flux] {
        push_mean_cv(&mut out, &select(contour, voiced, true));
    }
    for m in &mfcc {
        push_mean_cv(&mut out, &select(m, voiced, true));
    }
    for contour in [&alpha, &hammarberg, &slope_lo, &slope_hi, &flux] {
        out.push(fx::mean(&select(contour, voiced, false)));
    }

    let voiced_runs: Vec<f64> = fx::run_lengths(voiced, true)
        .into_iter()
        .map(|n| n as f64 * hop_secs)
        .collect();
    let unvoiced_runs: Vec<f64> = fx::run_lengths(voiced, false)
        .into_iter()
        .map(|n| n as f64 * hop_secs)
        .collect();

    out.push(fx::count_peaks(&loudness) as f64 / duration_secs);
    out.push(voiced_runs.len() as f64 / duration_secs);
    out.push(fx::mean(&voiced_runs));
    out.push(fx::stddev(&voiced_runs));
    out.push(fx::mean(&unvoiced_runs));
    out.push(fx::stddev(&unvoiced_runs));

    out.push(10.0 * (fx::mean(&c.energy) + 1e-10).log10());

    debug_assert_eq!(out.len(), FEATURE_COUNT);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use std::f32::consts::PI;
    use tempfile::tempdir;

    /// Vowel-like signal: gliding fundamental plus decaying harmonics
    fn voiced_signal(f0_start: f32, f0_end: f32, duration_ms: u32) -> Vec<f32> {
        let n = (16 * duration_ms) as usize;
        let mut phase = 0.0f32;
        (0..n)
            .map(|i| {
                let f0 = f0_start + (f0_end - f0_start) * i as f32 / n as f32;
                phase += 2.0 * PI * f0 / 16000.0;
                (1..=5)
                    .map(|h| (phase * h as f32).sin() * 0.4 / h as f32)
                    .sum::<f32>()
            })
            .collect()
    }

    #[test]
    fn test_names_are_unique() {
        let mut names = FEATURE_NAMES.to_vec();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), FEATURE_COUNT);
    }

    #[test]
    fn test_vector_has_fixed_length() {
        let extractor = FeatureExtractor::default();
        let features = extractor.extract(&voiced_signal(150.0, 220.0, 800)).unwrap();
        assert_eq!(features.values().len(), FEATURE_COUNT);
        assert!(features.values().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_silence_yields_finite_zero_pitch() {
        let extractor = FeatureExtractor::default();
        let features = extractor.extract(&vec![0.0; 16000]).unwrap();
        assert_eq!(features.values().len(), FEATURE_COUNT);
        assert!(features.values().iter().all(|v| v.is_finite()));
        // No voiced frames: F0 mean and voiced segment rate are zero
        assert_eq!(features.values()[0], 0.0);
        assert_eq!(features.values()[82], 0.0);
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let extractor = FeatureExtractor::default();
        let signal = voiced_signal(180.0, 140.0, 600);
        assert_eq!(
            extractor.extract(&signal).unwrap(),
            extractor.extract(&signal).unwrap()
        );
    }

    #[test]
    fn test_pitch_features_track_f0() {
        let extractor = FeatureExtractor::default();
        let low = extractor.extract(&voiced_signal(120.0, 120.0, 600)).unwrap();
        let high = extractor.extract(&voiced_signal(240.0, 240.0, 600)).unwrap();
        // One octave apart = 12 semitones
        let diff = high.values()[0] - low.values()[0];
        assert!((diff - 12.0).abs() < 1.0, "semitone difference {}", diff);
        assert!(low.values()[83] > 0.0, "expected voiced segments");
    }

    #[test]
    fn test_rising_glide_has_rising_slope() {
        let extractor = FeatureExtractor::default();
        let features = extractor.extract(&voiced_signal(120.0, 240.0, 800)).unwrap();
        let values = features.values();
        assert!(values[6] > values[8], "rising {} falling {}", values[6], values[8]);
    }

    #[test]
    fn test_too_short() {
        let extractor = FeatureExtractor::default();
        let err = extractor.extract(&[0.0; 100]).unwrap_err();
        assert!(matches!(err, FeatureError::TooShort { samples: 100, .. }));
    }

    #[test]
    fn test_extract_batch_keeps_order() {
        let dir = tempdir().unwrap();
        let spec = WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut paths = Vec::new();
        for (i, f0) in [110.0f32, 220.0].iter().enumerate() {
            let path = dir.path().join(format!("clip{}.wav", i));
            let mut writer = WavWriter::create(&path, spec).unwrap();
            for s in voiced_signal(*f0, *f0, 500) {
                writer.write_sample((s * 20000.0) as i16).unwrap();
            }
            writer.finalize().unwrap();
            paths.push(path);
        }

        let extractor = FeatureExtractor::new(FeatureConfig {
            n_jobs: 2,
            ..Default::default()
        });
        let matrix = extractor.extract_batch(&paths).unwrap();
        assert_eq!(matrix.dim(), (2, FEATURE_COUNT));
        assert!(matrix[[0, 0]] < matrix[[1, 0]]);

        let single = extractor.extract_file(&paths[1]).unwrap();
        assert_eq!(matrix.row(1).to_vec(), single.into_values());
    }

    #[test]
    fn test_missing_file_names_path() {
        let extractor = FeatureExtractor::default();
        let err = extractor
            .extract_file(Path::new("/nonexistent/a.wav"))
            .unwrap_err();
        assert!(err.to_string().contains("a.wav"));
    }
}
