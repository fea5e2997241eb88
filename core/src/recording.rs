use std::sync::Arc;
use std::time::Duration;

use crate::analyser::{SpectrumAnalyser, DEFAULT_FFT_SIZE, DEFAULT_SMOOTHING};
use crate::clock::Clock;
use crate::error::Result;
use crate::spectrum::{BinMapping, SpectrumCapture, SpectrumSource};

/// Plays a recorded signal into an analyser as if it were a live microphone.
///
/// The clock decides how much of the recording has "arrived": a capture
/// sampled at time `t` has heard everything up to `t * sample_rate`. A fresh
/// capture only hears audio from the moment it was created, like a real
/// device reopened mid-stream.
pub struct RecordingSource<C: Clock + Clone> {
    samples: Arc<[f32]>,
    sample_rate: u32,
    fft_size: usize,
    smoothing: f32,
    clock: C,
}

impl<C: Clock + Clone> RecordingSource<C> {
    pub fn new(samples: impl Into<Arc<[f32]>>, sample_rate: u32, clock: C) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            fft_size: DEFAULT_FFT_SIZE,
            smoothing: DEFAULT_SMOOTHING,
            clock,
        }
    }

    pub fn with_fft_size(mut self, fft_size: usize) -> Self {
        self.fft_size = fft_size;
        self
    }

    pub fn with_smoothing(mut self, smoothing: f32) -> Self {
        self.smoothing = smoothing;
        self
    }

    pub fn bin_mapping(&self) -> BinMapping {
        BinMapping::for_fft(self.sample_rate as f32, self.fft_size)
    }

    /// Length of the recording.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

impl<C: Clock + Clone> SpectrumSource for RecordingSource<C> {
    type Capture = RecordingCapture<C>;

    fn capture(&mut self) -> Result<Self::Capture> {
        let mut analyser = SpectrumAnalyser::new(self.sample_rate, self.fft_size)?;
        analyser.set_smoothing(self.smoothing);
        let position = heard_until(&self.clock, self.sample_rate, self.samples.len());
        Ok(RecordingCapture {
            samples: Arc::clone(&self.samples),
            sample_rate: self.sample_rate,
            position,
            analyser,
            clock: self.clock.clone(),
        })
    }
}

pub struct RecordingCapture<C: Clock> {
    samples: Arc<[f32]>,
    sample_rate: u32,
    position: usize,
    analyser: SpectrumAnalyser,
    clock: C,
}

impl<C: Clock> SpectrumCapture for RecordingCapture<C> {
    fn bin_mapping(&self) -> BinMapping {
        self.analyser.bin_mapping()
    }

    fn sample(&mut self, spectrum: &mut [f32]) -> Result<()> {
        let target = heard_until(&self.clock, self.sample_rate, self.samples.len());
        if target > self.position {
            self.analyser.push(&self.samples[self.position..target]);
            self.position = target;
        }
        self.analyser.compute(spectrum)
    }
}

fn heard_until<C: Clock>(clock: &C, sample_rate: u32, len: usize) -> usize {
    let position = (clock.now().as_secs_f64() * sample_rate as f64).floor() as usize;
    position.min(len)
}
