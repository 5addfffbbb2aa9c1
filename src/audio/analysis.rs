//! Tempo and duration estimation.
//!
//! The metadata cache only needs "signal in, tempo + duration out", so the
//! analyzer sits behind [`TempoAnalyzer`]. The default implementation tracks
//! onsets through spectral flux and takes the median inter-onset interval.

use anyhow::Result;
use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};

use super::decode::AudioData;

const FFT_SIZE: usize = 2048;
const HOP_SIZE: usize = 1024;
const DEFAULT_TEMPO: f64 = 120.0;

/// Tempo as reported by an analyzer: either one value or a per-window series.
#[derive(Debug, Clone, PartialEq)]
pub enum TempoEstimate {
    Scalar(f64),
    Series(Vec<f64>),
}

impl TempoEstimate {
    /// Collapse to a plain BPM value; a series contributes its first element.
    pub fn into_bpm(self) -> Option<f64> {
        match self {
            TempoEstimate::Scalar(bpm) => Some(bpm),
            TempoEstimate::Series(values) => values.first().copied(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackAnalysis {
    pub tempo: TempoEstimate,
    pub duration: f64,
}

pub trait TempoAnalyzer: Send + Sync {
    fn analyze(&self, audio: &AudioData) -> Result<TrackAnalysis>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SpectralFluxAnalyzer;

impl TempoAnalyzer for SpectralFluxAnalyzer {
    fn analyze(&self, audio: &AudioData) -> Result<TrackAnalysis> {
        if audio.sample_rate == 0 {
            anyhow::bail!("sample rate is zero");
        }
        let flux = spectral_flux(&audio.samples, audio.sample_rate);
        let onsets = detect_onsets(&flux);
        let tempo = estimate_tempo(&onsets);

        log::debug!("Onsets: {}, tempo: {:.1} BPM", onsets.len(), tempo);

        Ok(TrackAnalysis {
            tempo: TempoEstimate::Scalar(tempo),
            duration: audio.duration_secs(),
        })
    }
}

/// `(time, flux)` per hop.
fn spectral_flux(samples: &[f32], sample_rate: u32) -> Vec<(f64, f32)> {
    if samples.len() < FFT_SIZE {
        return Vec::new();
    }
    let hann = hann_window(FFT_SIZE);
    let positions: Vec<usize> = (0..=samples.len() - FFT_SIZE).step_by(HOP_SIZE).collect();

    let spectra: Vec<Vec<f32>> = positions
        .par_iter()
        .map_init(
            || FftPlanner::<f32>::new().plan_fft_forward(FFT_SIZE),
            |fft, &pos| {
                let mut buffer: Vec<Complex<f32>> = samples[pos..pos + FFT_SIZE]
                    .iter()
                    .zip(&hann)
                    .map(|(&s, &w)| Complex::new(s * w, 0.0))
                    .collect();
                fft.process(&mut buffer);
                buffer[..FFT_SIZE / 2].iter().map(|c| c.norm()).collect()
            },
        )
        .collect();

    let mut prev = vec![0.0f32; FFT_SIZE / 2];
    positions
        .iter()
        .zip(spectra)
        .map(|(&pos, magnitudes)| {
            let flux: f32 = magnitudes
                .iter()
                .zip(&prev)
                .map(|(cur, prev)| (cur - prev).max(0.0))
                .sum();
            prev = magnitudes;
            (pos as f64 / sample_rate as f64, flux)
        })
        .collect()
}

fn detect_onsets(flux_values: &[(f64, f32)]) -> Vec<f64> {
    let window = 20; // ~200ms either side at 44.1kHz
    let mut onsets: Vec<f64> = Vec::new();

    for i in 0..flux_values.len() {
        let start = i.saturating_sub(window);
        let end = (i + window + 1).min(flux_values.len());
        let local_mean: f32 =
            flux_values[start..end].iter().map(|(_, f)| f).sum::<f32>() / (end - start) as f32;
        let threshold = local_mean * 1.5 + 0.01;

        let (time, flux) = flux_values[i];
        if flux <= threshold {
            continue;
        }
        let is_peak = (i == 0 || flux >= flux_values[i - 1].1)
            && (i == flux_values.len() - 1 || flux >= flux_values[i + 1].1);
        // Minimum gap between onsets (100ms)
        let far_enough = onsets.last().map_or(true, |&last| time - last > 0.1);

        if is_peak && far_enough {
            onsets.push(time);
        }
    }

    onsets
}

fn estimate_tempo(onsets: &[f64]) -> f64 {
    // 60-200 BPM → 0.3-1.0s intervals
    let mut intervals: Vec<f64> = onsets
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|&i| (0.3..=1.0).contains(&i))
        .collect();

    if intervals.is_empty() {
        return DEFAULT_TEMPO;
    }

    intervals.sort_by(f64::total_cmp);
    60.0 / intervals[intervals.len() / 2]
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click_track(bpm: f64, sample_rate: u32, seconds: f64) -> Vec<f32> {
        let len = (seconds * sample_rate as f64) as usize;
        let period = (60.0 / bpm * sample_rate as f64) as usize;
        let mut samples = vec![0.0f32; len];
        for start in (0..len).step_by(period) {
            for j in 0..400.min(len - start) {
                let decay = (-(j as f32) / 80.0).exp();
                samples[start + j] = (j as f32 * 0.3).sin() * decay;
            }
        }
        samples
    }

    #[test]
    fn series_collapses_to_first_value() {
        assert_eq!(TempoEstimate::Scalar(97.5).into_bpm(), Some(97.5));
        assert_eq!(TempoEstimate::Series(vec![110.0, 90.0]).into_bpm(), Some(110.0));
        assert_eq!(TempoEstimate::Series(vec![]).into_bpm(), None);
    }

    #[test]
    fn finds_click_track_tempo() {
        let audio = AudioData {
            samples: click_track(120.0, 22050, 12.0),
            sample_rate: 22050,
        };
        let analysis = SpectralFluxAnalyzer.analyze(&audio).unwrap();
        let bpm = analysis.tempo.into_bpm().unwrap();
        assert!((105.0..=135.0).contains(&bpm), "bpm = {bpm}");
        assert!((analysis.duration - 12.0).abs() < 1e-6);
    }

    #[test]
    fn silence_falls_back_to_default() {
        let audio = AudioData {
            samples: vec![0.0; 44100],
            sample_rate: 44100,
        };
        let analysis = SpectralFluxAnalyzer.analyze(&audio).unwrap();
        assert_eq!(analysis.tempo, TempoEstimate::Scalar(DEFAULT_TEMPO));
        assert!((analysis.duration - 1.0).abs() < 1e-9);
    }

    #[test]
    fn short_signal_still_reports_duration() {
        let audio = AudioData {
            samples: vec![0.1; 100],
            sample_rate: 1000,
        };
        let analysis = SpectralFluxAnalyzer.analyze(&audio).unwrap();
        assert!((analysis.duration - 0.1).abs() < 1e-9);
    }

    #[test]
    fn median_interval_drives_tempo() {
        let onsets = [0.0, 0.5, 1.0, 1.5, 2.0, 2.05, 3.5];
        // intervals in range: 0.5 x4 → 120
        assert!((estimate_tempo(&onsets) - 120.0).abs() < 1e-9);
        assert_eq!(estimate_tempo(&[1.0]), DEFAULT_TEMPO);
    }
}
