use std::time::Duration;

use crate::error::{ModemError, Result};

/// Digits, lowercase letters and space.
pub const DEFAULT_ALPHABET: &str = "0123456789abcdefghijklmnopqrstuvwxyz ";

/// Lowest slot of the symbol table (start delimiter), in Hz.
pub const DEFAULT_FREQ_MIN: f32 = 18_500.0;

/// Spacing between adjacent symbol slots, in Hz.
pub const DEFAULT_FREQ_STEP: f32 = 25.0;

pub const DEFAULT_CHAR_DURATION_MS: u64 = 200;
pub const DEFAULT_RAMP_DURATION_MS: u64 = 1;
pub const DEFAULT_PEAK_THRESHOLD: f32 = -65.0;
pub const DEFAULT_MIN_RUN_LENGTH: usize = 2;
pub const DEFAULT_TIMEOUT_MS: u64 = 300;
pub const DEFAULT_HISTORY_CAPACITY: usize = 16;

/// Silence inserted in front of a tone that repeats the previous symbol.
pub const DEFAULT_REPEAT_GAP_MS: u64 = 100;

/// Empty ticks that separate two tone events of the same character.
pub const DEFAULT_SEPARATOR_TICKS: usize = 2;

/// Roughly five seconds at 60 ticks per second.
pub const DEFAULT_HEALTH_CHECK_INTERVAL: u64 = 60 * 5;

/// Session configuration shared by the transmitter and the receiver.
///
/// Both sides of a link must agree on the alphabet and the frequency plan;
/// the remaining fields only tune one side.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ModemConfig {
    pub alphabet: String,
    pub freq_min: f32,
    pub freq_step: f32,
    pub char_duration_ms: u64,
    pub ramp_duration_ms: u64,
    pub repeat_gap_ms: u64,
    pub peak_threshold: f32,
    pub min_run_length: usize,
    pub timeout_ms: u64,
    pub history_capacity: usize,
    pub separator_ticks: usize,
    pub health_check_interval: u64,
    /// Log every transcribed symbol at debug level.
    pub debug: bool,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            alphabet: DEFAULT_ALPHABET.to_string(),
            freq_min: DEFAULT_FREQ_MIN,
            freq_step: DEFAULT_FREQ_STEP,
            char_duration_ms: DEFAULT_CHAR_DURATION_MS,
            ramp_duration_ms: DEFAULT_RAMP_DURATION_MS,
            repeat_gap_ms: DEFAULT_REPEAT_GAP_MS,
            peak_threshold: DEFAULT_PEAK_THRESHOLD,
            min_run_length: DEFAULT_MIN_RUN_LENGTH,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            separator_ticks: DEFAULT_SEPARATOR_TICKS,
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            debug: false,
        }
    }
}

impl ModemConfig {
    pub fn char_duration(&self) -> Duration {
        Duration::from_millis(self.char_duration_ms)
    }

    pub fn ramp_duration(&self) -> Duration {
        Duration::from_millis(self.ramp_duration_ms)
    }

    pub fn repeat_gap(&self) -> Duration {
        Duration::from_millis(self.repeat_gap_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Check cross-field constraints. Symbol table constraints are checked
    /// separately by [`crate::SymbolTable::new`].
    pub fn validate(&self) -> Result<()> {
        if self.char_duration_ms == 0 {
            return Err(ModemError::Configuration(
                "char_duration_ms must be positive".into(),
            ));
        }
        if 2 * self.ramp_duration_ms > self.char_duration_ms {
            return Err(ModemError::Configuration(format!(
                "ramp of {} ms does not fit twice into a {} ms tone",
                self.ramp_duration_ms, self.char_duration_ms
            )));
        }
        // The shortened repeat tone still needs room for both ramps.
        if self.repeat_gap_ms + 2 * self.ramp_duration_ms >= self.char_duration_ms {
            return Err(ModemError::Configuration(format!(
                "repeat gap of {} ms leaves no tone in a {} ms slot",
                self.repeat_gap_ms, self.char_duration_ms
            )));
        }
        if self.min_run_length == 0 {
            return Err(ModemError::Configuration(
                "min_run_length must be at least 1".into(),
            ));
        }
        if self.history_capacity <= self.min_run_length {
            return Err(ModemError::Configuration(format!(
                "history capacity {} cannot hold a run longer than {}",
                self.history_capacity, self.min_run_length
            )));
        }
        if self.separator_ticks == 0 {
            return Err(ModemError::Configuration(
                "separator_ticks must be at least 1".into(),
            ));
        }
        if self.health_check_interval == 0 {
            return Err(ModemError::Configuration(
                "health_check_interval must be at least 1".into(),
            ));
        }
        if !self.peak_threshold.is_finite() {
            return Err(ModemError::Configuration(
                "peak_threshold must be finite".into(),
            ));
        }
        Ok(())
    }
}
