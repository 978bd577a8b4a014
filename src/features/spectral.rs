//! Short-time spectral descriptors.
//!
//! One [`SpectralAnalyzer`] is created per clip; it owns the FFT plan, the
//! analysis window and the mel filterbank, and keeps the previous frame's
//! normalised magnitude spectrum for spectral flux.

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use std::f64::consts::PI;
use std::sync::Arc;

use super::FeatureError;

/// Number of mel bands used for loudness and MFCCs
const N_MELS: usize = 26;

/// Number of cepstral coefficients kept (1..=4, c0 dropped)
pub const N_MFCC: usize = 4;

/// Floor added before taking logarithms
const LOG_FLOOR: f64 = 1e-10;

/// Descriptors of one spectral frame
#[derive(Debug, Clone, Default)]
pub struct SpectralFrame {
    pub loudness: f64,
    pub flux: f64,
    pub mfcc: [f64; N_MFCC],
    pub alpha_ratio: f64,
    pub hammarberg: f64,
    pub slope_0_500: f64,
    pub slope_500_1500: f64,
}

pub struct SpectralAnalyzer {
    fft: Arc<dyn RealToComplex<f64>>,
    window: Vec<f64>,
    mel_filterbank: Vec<Vec<f64>>,
    bin_hz: f64,
    fft_input: Vec<f64>,
    fft_output: Vec<Complex<f64>>,
    prev_magnitude: Option<Vec<f64>>,
}

impl SpectralAnalyzer {
    /// Create an analyzer for frames of `win_length` samples
    pub fn new(win_length: usize, sample_rate: u32) -> Self {
        let n_fft = win_length.next_power_of_two();

        // Hamming window
        let window: Vec<f64> = (0..win_length)
            .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / (win_length - 1) as f64).cos())
            .collect();

        let n_bins = n_fft / 2 + 1;
        let mel_filterbank = create_mel_filterbank(
            N_MELS,
            n_bins,
            sample_rate as f64,
            20.0,
            sample_rate as f64 / 2.0,
        );

        let mut planner = RealFftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(n_fft);

        Self {
            fft,
            window,
            mel_filterbank,
            bin_hz: sample_rate as f64 / n_fft as f64,
            fft_input: vec![0.0; n_fft],
            fft_output: vec![Complex::new(0.0, 0.0); n_bins],
            prev_magnitude: None,
        }
    }

    /// Analyse one frame; frames must be passed in time order
    pub fn analyze(&mut self, frame: &[f32]) -> Result<SpectralFrame, FeatureError> {
        self.fft_input.fill(0.0);
        for ((dst, &s), w) in self.fft_input.iter_mut().zip(frame).zip(&self.window) {
            *dst = s as f64 * w;
        }

        self.fft
            .process(&mut self.fft_input, &mut self.fft_output)
            .map_err(|e| FeatureError::Fft(e.to_string()))?;

        let power: Vec<f64> = self.fft_output.iter().map(|c| c.norm_sqr()).collect();
        let magnitude: Vec<f64> = power.iter().map(|p| p.sqrt()).collect();

        let mel_energies: Vec<f64> = self
            .mel_filterbank
            .iter()
            .map(|filter| filter.iter().zip(&power).map(|(f, p)| f * p).sum())
            .collect();

        // Power-law compressed band energies as a loudness proxy
        let loudness = mel_energies.iter().map(|e| e.powf(0.3)).sum();

        let flux = self.spectral_flux(&magnitude);

        Ok(SpectralFrame {
            loudness,
            flux,
            mfcc: mfcc(&mel_energies),
            alpha_ratio: self.alpha_ratio(&power),
            hammarberg: self.hammarberg(&power),
            slope_0_500: self.band_slope(&power, 0.0, 500.0),
            slope_500_1500: self.band_slope(&power, 500.0, 1500.0),
        })
    }

    fn bin_range(&self, lo_hz: f64, hi_hz: f64) -> std::ops::Range<usize> {
        let lo = (lo_hz / self.bin_hz).ceil() as usize;
        let hi = ((hi_hz / self.bin_hz).floor() as usize + 1).min(self.fft_output.len());
        lo.min(hi)..hi
    }

    fn spectral_flux(&mut self, magnitude: &[f64]) -> f64 {
        let total: f64 = magnitude.iter().sum();
        let normalized: Vec<f64> = if total > LOG_FLOOR {
            magnitude.iter().map(|m| m / total).collect()
        } else {
            vec![0.0; magnitude.len()]
        };

        let flux = match &self.prev_magnitude {
            Some(prev) => normalized
                .iter()
                .zip(prev)
                .map(|(a, b)| (a - b).powi(2))
                .sum(),
            None => 0.0,
        };
        self.prev_magnitude = Some(normalized);
        flux
    }

    /// Energy ratio 50-1000 Hz over 1-5 kHz, in dB
    fn alpha_ratio(&self, power: &[f64]) -> f64 {
        let low: f64 = power[self.bin_range(50.0, 1000.0)].iter().sum();
        let high: f64 = power[self.bin_range(1000.0, 5000.0)].iter().sum();
        10.0 * ((low + LOG_FLOOR) / (high + LOG_FLOOR)).log10()
    }

    /// Strongest peak 0-2 kHz over strongest peak 2-5 kHz, in dB
    fn hammarberg(&self, power: &[f64]) -> f64 {
        let max_in = |r: std::ops::Range<usize>| power[r].iter().cloned().fold(0.0, f64::max);
        let low = max_in(self.bin_range(0.0, 2000.0));
        let high = max_in(self.bin_range(2000.0, 5000.0));
        10.0 * ((low + LOG_FLOOR) / (high + LOG_FLOOR)).log10()
    }

    /// Least-squares slope of the log power spectrum (dB per Hz) within a band
    fn band_slope(&self, power: &[f64], lo_hz: f64, hi_hz: f64) -> f64 {
        let range = self.bin_range(lo_hz, hi_hz);
        let points: Vec<(f64, f64)> = range
            .map(|bin| {
                (
                    bin as f64 * self.bin_hz,
                    10.0 * (power[bin] + LOG_FLOOR).log10(),
                )
            })
            .collect();
        linear_slope(&points)
    }
}

fn linear_slope(points: &[(f64, f64)]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let n = points.len() as f64;
    let mx = points.iter().map(|p| p.0).sum::<f64>() / n;
    let my = points.iter().map(|p| p.1).sum::<f64>() / n;
    let sxy: f64 = points.iter().map(|(x, y)| (x - mx) * (y - my)).sum();
    let sxx: f64 = points.iter().map(|(x, _)| (x - mx).powi(2)).sum();
    if sxx <= 0.0 {
        0.0
    } else {
        sxy / sxx
    }
}

/// Cepstral coefficients 1..=N_MFCC of the log mel spectrum (DCT-II)
fn mfcc(mel_energies: &[f64]) -> [f64; N_MFCC] {
    let n = mel_energies.len() as f64;
    let log_mel: Vec<f64> = mel_energies.iter().map(|e| (e + LOG_FLOOR).ln()).collect();

    let mut coeffs = [0.0; N_MFCC];
    for (k, c) in coeffs.iter_mut().enumerate() {
        let order = (k + 1) as f64;
        *c = log_mel
            .iter()
            .enumerate()
            .map(|(b, v)| v * (PI * order * (b as f64 + 0.5) / n).cos())
            .sum::<f64>()
            * (2.0 / n).sqrt();
    }
    coeffs
}

fn hz_to_mel(hz: f64) -> f64 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10.0_f64.powf(mel / 2595.0) - 1.0)
}

/// Triangular filters equally spaced on the mel scale
fn create_mel_filterbank(
    n_mels: usize,
    n_fft_bins: usize,
    sample_rate: f64,
    fmin: f64,
    fmax: f64,
) -> Vec<Vec<f64>> {
    let mel_min = hz_to_mel(fmin);
    let mel_max = hz_to_mel(fmax);

    let bin_points: Vec<f64> = (0..=n_mels + 1)
        .map(|i| mel_min + (mel_max - mel_min) * i as f64 / (n_mels + 1) as f64)
        .map(mel_to_hz)
        .map(|hz| (n_fft_bins as f64 - 1.0) * hz / (sample_rate / 2.0))
        .collect();

    (0..n_mels)
        .map(|i| {
            let (left, center, right) = (bin_points[i], bin_points[i + 1], bin_points[i + 2]);
            (0..n_fft_bins)
                .map(|bin| {
                    let b = bin as f64;
                    if b >= left && b < center {
                        (b - left) / (center - left)
                    } else if b >= center && b <= right {
                        (right - b) / (right - center)
                    } else {
                        0.0
                    }
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI as PI32;

    fn sine(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI32 * freq * i as f32 / 16000.0).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_mel_roundtrip() {
        for hz in [100.0, 1000.0, 4000.0, 8000.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 1e-6);
        }
    }

    #[test]
    fn test_filterbank_shape() {
        let fb = create_mel_filterbank(26, 257, 16000.0, 20.0, 8000.0);
        assert_eq!(fb.len(), 26);
        for filter in &fb {
            assert_eq!(filter.len(), 257);
            assert!(filter.iter().all(|w| *w >= 0.0));
            assert!(filter.iter().sum::<f64>() > 0.0);
        }
    }

    #[test]
    fn test_low_tone_has_positive_alpha_ratio() {
        let mut analyzer = SpectralAnalyzer::new(400, 16000);
        let frame = analyzer.analyze(&sine(300.0, 400)).unwrap();
        assert!(frame.alpha_ratio > 10.0, "alpha ratio {}", frame.alpha_ratio);
        assert!(frame.hammarberg > 10.0, "hammarberg {}", frame.hammarberg);

        let frame = analyzer.analyze(&sine(3000.0, 400)).unwrap();
        assert!(frame.alpha_ratio < -10.0, "alpha ratio {}", frame.alpha_ratio);
    }

    #[test]
    fn test_flux_zero_for_stationary_signal() {
        let mut analyzer = SpectralAnalyzer::new(400, 16000);
        let tone = sine(500.0, 400);
        let first = analyzer.analyze(&tone).unwrap();
        let second = analyzer.analyze(&tone).unwrap();
        assert_eq!(first.flux, 0.0);
        assert!(second.flux < 1e-12);

        let changed = analyzer.analyze(&sine(2500.0, 400)).unwrap();
        assert!(changed.flux > second.flux);
    }

    #[test]
    fn test_silence_is_finite() {
        let mut analyzer = SpectralAnalyzer::new(400, 16000);
        let frame = analyzer.analyze(&vec![0.0; 400]).unwrap();
        assert_eq!(frame.loudness, 0.0);
        assert!(frame.mfcc.iter().all(|c| c.is_finite()));
        assert!(frame.slope_0_500.abs() < 1e-9);
    }

    #[test]
    fn test_linear_slope() {
        let points: Vec<(f64, f64)> = (0..10).map(|i| (i as f64, 3.0 * i as f64 + 1.0)).collect();
        assert!((linear_slope(&points) - 3.0).abs() < 1e-12);
    }
}
