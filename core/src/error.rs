use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModemError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Audio input device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Audio output channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("Character {0:?} is not in the symbol alphabet")]
    UnsupportedCharacter(char),

    #[error("Spectrum has {actual} bins, expected {expected}")]
    SpectrumMismatch { expected: usize, actual: usize },

    #[error("FFT error: {0}")]
    FftError(String),
}

pub type Result<T> = std::result::Result<T, ModemError>;
