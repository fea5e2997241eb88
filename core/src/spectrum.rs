use crate::error::Result;

/// Relation between spectrum bin indices and frequencies for one session.
///
/// A spectrum of `bin_count` bins covers `0..nyquist`, so bin `i` sits at
/// `nyquist / bin_count * i`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinMapping {
    sample_rate: f32,
    bin_count: usize,
}

impl BinMapping {
    pub fn new(sample_rate: f32, bin_count: usize) -> Self {
        Self {
            sample_rate,
            bin_count,
        }
    }

    /// Mapping produced by an FFT of `fft_size` samples (half as many bins).
    pub fn for_fft(sample_rate: f32, fft_size: usize) -> Self {
        Self::new(sample_rate, fft_size / 2)
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn bin_count(&self) -> usize {
        self.bin_count
    }

    pub fn nyquist(&self) -> f32 {
        self.sample_rate / 2.0
    }

    /// Width of one bin in Hz.
    pub fn resolution(&self) -> f32 {
        self.nyquist() / self.bin_count as f32
    }

    pub fn index_to_freq(&self, index: usize) -> f32 {
        self.resolution() * index as f32
    }

    pub fn freq_to_index(&self, freq: f32) -> usize {
        let index = (freq / self.nyquist() * self.bin_count as f32).round();
        if index.is_nan() || index <= 0.0 {
            0
        } else {
            index as usize
        }
    }
}

/// An acquired microphone + analysis pipeline.
///
/// Dropping the capture releases the input device.
pub trait SpectrumCapture {
    fn bin_mapping(&self) -> BinMapping;

    /// Copy the latest magnitude spectrum (dB) into `spectrum`, whose length
    /// equals `bin_mapping().bin_count()`. Must not block.
    fn sample(&mut self, spectrum: &mut [f32]) -> Result<()>;
}

/// Something that can hand out spectrum captures, typically a microphone.
pub trait SpectrumSource {
    type Capture: SpectrumCapture;

    /// Acquire the input device and build the analysis pipeline.
    ///
    /// Fails with [`crate::ModemError::DeviceUnavailable`] when no input
    /// device grants access.
    fn capture(&mut self) -> Result<Self::Capture>;
}
