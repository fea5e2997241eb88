use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};

use crate::error::{ModemError, Result};
use crate::spectrum::{BinMapping, SpectrumCapture};

pub const DEFAULT_FFT_SIZE: usize = 2048;

/// Exponential smoothing between successive spectra. Web Audio defaults to
/// 0.8, which smears one symbol into the next at 60 ticks per second.
pub const DEFAULT_SMOOTHING: f32 = 0.0;

/// Reported level for bins with no energy at all.
pub const FLOOR_DECIBELS: f32 = -200.0;

const MIN_FFT_SIZE: usize = 32;
const MAX_FFT_SIZE: usize = 32768;

// Blackman window coefficients (alpha = 0.16), as used by AnalyserNode.
const BLACKMAN_A0: f32 = 0.42;
const BLACKMAN_A1: f32 = 0.5;
const BLACKMAN_A2: f32 = 0.08;

/// Offline spectrum analyser modelled on the Web Audio `AnalyserNode`.
///
/// Keeps the most recent `fft_size` samples. Each call to
/// [`compute`](SpectrumAnalyser::compute) windows them (Blackman), runs a real
/// FFT, normalizes by the FFT size, applies optional smoothing and reports
/// `fft_size / 2` magnitudes in dB.
pub struct SpectrumAnalyser {
    mapping: BinMapping,
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    samples: VecDeque<f32>,
    input: Vec<f32>,
    output: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    smoothing: f32,
}

impl SpectrumAnalyser {
    pub fn new(sample_rate: u32, fft_size: usize) -> Result<Self> {
        if !fft_size.is_power_of_two() || !(MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&fft_size) {
            return Err(ModemError::Configuration(format!(
                "FFT size must be a power of two in {MIN_FFT_SIZE}..={MAX_FFT_SIZE}, got {fft_size}"
            )));
        }
        if sample_rate == 0 {
            return Err(ModemError::Configuration("sample rate must be positive".into()));
        }

        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let input = fft.make_input_vec();
        let output = fft.make_output_vec();

        Ok(Self {
            mapping: BinMapping::for_fft(sample_rate as f32, fft_size),
            window: blackman_window(fft_size),
            samples: VecDeque::from(vec![0.0; fft_size]),
            smoothed: vec![0.0; fft_size / 2],
            smoothing: DEFAULT_SMOOTHING,
            fft,
            input,
            output,
        })
    }

    pub fn fft_size(&self) -> usize {
        self.window.len()
    }

    /// Smoothing constant, clamped to `[0, 1)`.
    pub fn set_smoothing(&mut self, smoothing: f32) {
        self.smoothing = if smoothing.is_nan() {
            DEFAULT_SMOOTHING
        } else {
            smoothing.clamp(0.0, 0.99)
        };
    }

    pub fn smoothing(&self) -> f32 {
        self.smoothing
    }

    /// Append new audio, keeping only the latest `fft_size` samples.
    pub fn push(&mut self, samples: &[f32]) {
        let size = self.fft_size();
        let fresh = &samples[samples.len().saturating_sub(size)..];
        let overflow = (self.samples.len() + fresh.len()).saturating_sub(size);
        self.samples.drain(..overflow);
        self.samples.extend(fresh.iter().copied());
    }

    /// Compute the magnitude spectrum (dB) of the buffered samples.
    pub fn compute(&mut self, spectrum: &mut [f32]) -> Result<()> {
        let bins = self.mapping.bin_count();
        if spectrum.len() != bins {
            return Err(ModemError::SpectrumMismatch {
                expected: bins,
                actual: spectrum.len(),
            });
        }

        for ((dst, &sample), &weight) in self.input.iter_mut().zip(self.samples.iter()).zip(self.window.iter()) {
            *dst = sample * weight;
        }
        self.fft
            .process(&mut self.input, &mut self.output)
            .map_err(|e| ModemError::FftError(format!("forward FFT failed: {e:?}")))?;

        let scale = 1.0 / self.fft_size() as f32;
        let tau = self.smoothing;
        for ((out, smoothed), bin) in spectrum.iter_mut().zip(self.smoothed.iter_mut()).zip(self.output.iter()) {
            let magnitude = bin.norm() * scale;
            *smoothed = tau * *smoothed + (1.0 - tau) * magnitude;
            *out = if *smoothed > 0.0 {
                (20.0 * smoothed.log10()).max(FLOOR_DECIBELS)
            } else {
                FLOOR_DECIBELS
            };
        }
        Ok(())
    }
}

impl SpectrumCapture for SpectrumAnalyser {
    fn bin_mapping(&self) -> BinMapping {
        self.mapping
    }

    fn sample(&mut self, spectrum: &mut [f32]) -> Result<()> {
        self.compute(spectrum)
    }
}

/// Smallest power-of-two FFT size of at least `at_least` whose bins are
/// narrower than `max_resolution` Hz at `sample_rate`, or `None` if even the
/// largest supported size is too coarse.
pub fn fft_size_for(sample_rate: f32, max_resolution: f32, at_least: usize) -> Option<usize> {
    if !sample_rate.is_finite() || sample_rate <= 0.0 || !max_resolution.is_finite() || max_resolution <= 0.0 {
        return None;
    }
    let mut size = at_least.max(MIN_FFT_SIZE).checked_next_power_of_two()?;
    while size <= MAX_FFT_SIZE {
        if sample_rate / (size as f32) < max_resolution {
            return Some(size);
        }
        size *= 2;
    }
    None
}

fn blackman_window(len: usize) -> Vec<f32> {
    let n = len as f32;
    (0..len)
        .map(|i| {
            let x = i as f32 / n;
            BLACKMAN_A0 - BLACKMAN_A1 * (2.0 * PI * x).cos() + BLACKMAN_A2 * (4.0 * PI * x).cos()
        })
        .collect()
}
