//! Butterworth low-pass / high-pass design.
//!
//! Coefficients come from the bilinear transform with the cutoff pre-warped,
//! so the -3 dB point lands exactly on the requested frequency. The filter is
//! stored as a cascade of second-order sections rather than one high-order
//! polynomial; at the low cutoffs used here (150-800 Hz at 44.1 kHz) the
//! direct-form polynomial is numerically fragile.

use rustfft::num_complex::Complex;
use serde::Serialize;
use std::f64::consts::PI;
use std::fmt;

use crate::error::FilterDesignError;

pub const DEFAULT_ORDER: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterClass {
    Lowpass,
    Highpass,
}

impl FilterClass {
    pub fn other(self) -> Self {
        match self {
            FilterClass::Lowpass => FilterClass::Highpass,
            FilterClass::Highpass => FilterClass::Lowpass,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FilterClass::Lowpass => "lowpass",
            FilterClass::Highpass => "highpass",
        }
    }
}

impl fmt::Display for FilterClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One second-order section, normalised so that `a0 == 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Biquad {
    fn response(&self, z_inv: Complex<f64>) -> Complex<f64> {
        let z_inv2 = z_inv * z_inv;
        let num = Complex::new(self.b0, 0.0) + z_inv * self.b1 + z_inv2 * self.b2;
        let den = Complex::new(1.0, 0.0) + z_inv * self.a1 + z_inv2 * self.a2;
        num / den
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterCoefficients {
    pub class: FilterClass,
    pub cutoff_hz: f64,
    pub sample_rate: u32,
    pub sections: Vec<Biquad>,
}

impl FilterCoefficients {
    pub fn order(&self) -> usize {
        self.sections.len() * 2
    }

    /// Expand the cascade into `(b, a)` transfer-function polynomials in z^-1.
    pub fn transfer_function(&self) -> (Vec<f64>, Vec<f64>) {
        let mut b = vec![1.0];
        let mut a = vec![1.0];
        for s in &self.sections {
            b = poly_mul(&b, &[s.b0, s.b1, s.b2]);
            a = poly_mul(&a, &[1.0, s.a1, s.a2]);
        }
        (b, a)
    }

    /// Magnitude of the frequency response at `freq_hz`.
    pub fn magnitude_at(&self, freq_hz: f64) -> f64 {
        let w = 2.0 * PI * freq_hz / self.sample_rate as f64;
        let z_inv = Complex::new(w.cos(), -w.sin());
        self.sections
            .iter()
            .fold(Complex::new(1.0, 0.0), |acc, s| acc * s.response(z_inv))
            .norm()
    }
}

/// Design a Butterworth filter of the given even `order`.
///
/// Fails when the cutoff is not strictly inside (0, Nyquist).
pub fn design(
    class: FilterClass,
    cutoff_hz: f64,
    sample_rate: u32,
    order: usize,
) -> Result<FilterCoefficients, FilterDesignError> {
    if order == 0 || order % 2 != 0 {
        return Err(FilterDesignError::InvalidOrder(order));
    }
    let nyquist_hz = sample_rate as f64 / 2.0;
    if !cutoff_hz.is_finite() || cutoff_hz <= 0.0 || cutoff_hz >= nyquist_hz {
        return Err(FilterDesignError::InvalidCutoff { cutoff_hz, nyquist_hz });
    }

    // Pre-warped analog frequency, in units of 2*fs
    let k = (PI * cutoff_hz / sample_rate as f64).tan();
    let k2 = k * k;

    let sections = (0..order / 2)
        .map(|i| {
            // Pole pair angle gives the section Q: 0.5412 and 1.3066 for order 4
            let theta = PI * (2 * i + 1) as f64 / (2 * order) as f64;
            let q = 1.0 / (2.0 * theta.cos());
            let norm = 1.0 / (1.0 + k / q + k2);
            let a1 = 2.0 * (k2 - 1.0) * norm;
            let a2 = (1.0 - k / q + k2) * norm;
            match class {
                FilterClass::Lowpass => {
                    let b0 = k2 * norm;
                    Biquad { b0, b1: 2.0 * b0, b2: b0, a1, a2 }
                }
                FilterClass::Highpass => Biquad { b0: norm, b1: -2.0 * norm, b2: norm, a1, a2 },
            }
        })
        .collect();

    Ok(FilterCoefficients {
        class,
        cutoff_hz,
        sample_rate,
        sections,
    })
}

fn poly_mul(x: &[f64], y: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; x.len() + y.len() - 1];
    for (i, &xi) in x.iter().enumerate() {
        for (j, &yj) in y.iter().enumerate() {
            out[i + j] += xi * yj;
        }
    }
    out
}
