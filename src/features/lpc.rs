//! Linear prediction and formant estimation.
//!
//! Formants are the resonances of the LPC all-pole model: the roots of the
//! prediction polynomial in the upper half plane give centre frequency
//! (root angle) and bandwidth (root radius).

use realfft::num_complex::Complex;
use std::f64::consts::PI;

/// Prediction order at 16 kHz
pub const LPC_ORDER: usize = 12;

/// Lowest accepted formant frequency in Hz
const MIN_FORMANT_HZ: f64 = 90.0;

/// Highest accepted formant frequency in Hz
const MAX_FORMANT_HZ: f64 = 5500.0;

/// Widest accepted formant bandwidth in Hz
const MAX_BANDWIDTH_HZ: f64 = 1000.0;

const PRE_EMPHASIS: f64 = 0.97;

const MAX_ROOT_ITERATIONS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Formant {
    pub frequency: f64,
    pub bandwidth: f64,
}

/// LPC coefficients `[1, a1, .., ap]` via Levinson-Durbin.
///
/// Returns `None` for silent frames or an unstable recursion.
pub fn lpc(frame: &[f64], order: usize) -> Option<Vec<f64>> {
    if frame.len() <= order {
        return None;
    }

    let autocorr: Vec<f64> = (0..=order)
        .map(|lag| {
            frame[lag..]
                .iter()
                .zip(frame)
                .map(|(a, b)| a * b)
                .sum()
        })
        .collect();

    if autocorr[0] <= 1e-12 {
        return None;
    }

    let mut a = vec![0.0; order + 1];
    a[0] = 1.0;
    let mut error = autocorr[0];

    for i in 1..=order {
        let acc: f64 = autocorr[i] + (1..i).map(|j| a[j] * autocorr[i - j]).sum::<f64>();
        let k = -acc / error;

        let prev = a.clone();
        for j in 1..i {
            a[j] = prev[j] + k * prev[i - j];
        }
        a[i] = k;

        error *= 1.0 - k * k;
        if error <= 0.0 {
            return None;
        }
    }

    Some(a)
}

/// Roots of a monic polynomial (coefficients highest degree first) by
/// Durand-Kerner iteration
pub fn polynomial_roots(coeffs: &[f64]) -> Vec<Complex<f64>> {
    let degree = coeffs.len().saturating_sub(1);
    if degree == 0 {
        return Vec::new();
    }

    let eval = |z: Complex<f64>| {
        coeffs
            .iter()
            .fold(Complex::new(0.0, 0.0), |acc, &c| acc * z + c)
    };

    let seed = Complex::new(0.4, 0.9);
    let mut roots: Vec<Complex<f64>> = (0..degree).map(|k| seed.powu(k as u32)).collect();

    for _ in 0..MAX_ROOT_ITERATIONS {
        let mut max_delta = 0.0f64;
        for i in 0..degree {
            let zi = roots[i];
            let denom = roots
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .fold(Complex::new(1.0, 0.0), |acc, (_, zj)| acc * (zi - zj));
            if denom.norm() < 1e-300 {
                continue;
            }
            let delta = eval(zi) / denom;
            roots[i] = zi - delta;
            max_delta = max_delta.max(delta.norm());
        }
        if max_delta < 1e-12 {
            break;
        }
    }

    roots
}

/// Estimate formants of a windowed frame, lowest frequency first
pub fn formants(frame: &[f32], sample_rate: u32) -> Vec<Formant> {
    let n = frame.len();
    if n < 2 {
        return Vec::new();
    }

    // Pre-emphasis followed by a Hamming window
    let mut emphasized: Vec<f64> = Vec::with_capacity(n);
    emphasized.push(frame[0] as f64);
    for i in 1..n {
        emphasized.push(frame[i] as f64 - PRE_EMPHASIS * frame[i - 1] as f64);
    }
    for (i, s) in emphasized.iter_mut().enumerate() {
        *s *= 0.54 - 0.46 * (2.0 * PI * i as f64 / (n - 1) as f64).cos();
    }

    let Some(coeffs) = lpc(&emphasized, LPC_ORDER) else {
        return Vec::new();
    };

    let fs = sample_rate as f64;
    let mut found: Vec<Formant> = polynomial_roots(&coeffs)
        .into_iter()
        .filter(|r| r.im > 0.0)
        .map(|r| Formant {
            frequency: r.im.atan2(r.re) * fs / (2.0 * PI),
            bandwidth: -r.norm().ln() * fs / PI,
        })
        .filter(|f| {
            f.frequency > MIN_FORMANT_HZ
                && f.frequency < MAX_FORMANT_HZ.min(fs / 2.0 - MIN_FORMANT_HZ)
                && f.bandwidth > 0.0
                && f.bandwidth < MAX_BANDWIDTH_HZ
        })
        .collect();

    found.sort_by(|a, b| a.frequency.total_cmp(&b.frequency));
    found
}
