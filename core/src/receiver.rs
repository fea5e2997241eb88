use std::mem;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::ModemConfig;
use crate::error::{ModemError, Result};
use crate::history::HistoryBuffer;
use crate::spectrum::BinMapping;
use crate::symbols::{Symbol, SymbolTable};

/// A lowest in-band magnitude below this means the capture has decayed into
/// a broken state.
const STUCK_FLOOR_DB: f32 = -300.0;

/// Value a broken capture pins its leading bins to.
const PINNED_MAGNITUDE_DB: f32 = -100.0;

/// Number of leading bins inspected for the pinned condition.
const PINNED_BIN_COUNT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Receiving,
}

/// Output of the receiver, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverEvent {
    Character(char),
    Message(String),
}

/// One raw detection kept in the history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub symbol: Symbol,
    pub at: Duration,
}

/// Strongest in-band bin of the latest spectrum, whether or not it cleared
/// the threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub bin: usize,
    pub frequency: f32,
    pub magnitude: f32,
}

#[derive(Debug, Default, PartialEq)]
pub struct TickOutcome {
    pub events: Vec<ReceiverEvent>,
    /// The health check found the spectrum pathological. The receiver has
    /// already reset itself; the host must rebuild the capture pipeline.
    pub restart_required: bool,
}

/// Spectral-peak receiver.
///
/// Each [`tick`](Receiver::tick) consumes one spectrum and runs the whole
/// pipeline synchronously:
///
/// 1. pick the strongest bin inside the symbol band and map it to a symbol if
///    it clears the peak threshold;
/// 2. record the detection, or on an empty tick check the inter-symbol
///    timeout;
/// 3. confirm a symbol once the newest run of identical detections is longer
///    than `min_run_length`, consuming that run;
/// 4. feed the confirmed symbol to the Idle/Receiving framing machine.
///
/// Every `health_check_interval` ticks the spectrum is also checked for the
/// stuck-capture signatures before anything else runs.
pub struct Receiver {
    table: Arc<SymbolTable>,
    mapping: BinMapping,
    band: Range<usize>,
    peak_threshold: f32,
    min_run_length: usize,
    timeout: Duration,
    separator_ticks: usize,
    health_check_interval: u64,
    debug: bool,

    history: HistoryBuffer<Detection>,
    last_detection: Option<Duration>,
    state: FrameState,
    buffer: String,
    last_confirmed: Option<char>,
    empty_ticks: usize,
    ticks: u64,
    last_peak: Option<Peak>,
}

impl Receiver {
    pub fn new(table: Arc<SymbolTable>, mapping: BinMapping, config: &ModemConfig) -> Result<Self> {
        config.validate()?;
        if mapping.bin_count() == 0 || !mapping.sample_rate().is_finite() || mapping.sample_rate() <= 0.0 {
            return Err(ModemError::Configuration(format!(
                "unusable spectrum layout: {} bins at {} Hz",
                mapping.bin_count(),
                mapping.sample_rate()
            )));
        }
        let half_step = table.freq_step() / 2.0;
        if table.freq_max() + half_step >= mapping.nyquist() {
            return Err(ModemError::Configuration(format!(
                "symbol band tops out at {} Hz, above the {} Hz Nyquist limit",
                table.freq_max(),
                mapping.nyquist()
            )));
        }
        if mapping.resolution() >= table.freq_step() {
            return Err(ModemError::Configuration(format!(
                "bins are {:.1} Hz wide, too coarse for a {} Hz symbol step",
                mapping.resolution(),
                table.freq_step()
            )));
        }

        let band_start = mapping.freq_to_index(table.freq_min());
        let band_end = (mapping.freq_to_index(table.freq_max() + half_step) + 1).min(mapping.bin_count());

        Ok(Self {
            band: band_start..band_end,
            mapping,
            table,
            peak_threshold: config.peak_threshold,
            min_run_length: config.min_run_length,
            timeout: config.timeout(),
            separator_ticks: config.separator_ticks,
            health_check_interval: config.health_check_interval,
            debug: config.debug,
            history: HistoryBuffer::new(config.history_capacity),
            last_detection: None,
            state: FrameState::Idle,
            buffer: String::new(),
            last_confirmed: None,
            empty_ticks: 0,
            ticks: 0,
            last_peak: None,
        })
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Characters accumulated for the frame in progress.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn mapping(&self) -> BinMapping {
        self.mapping
    }

    pub fn table(&self) -> &SymbolTable {
        &self.table
    }

    pub fn peak_threshold(&self) -> f32 {
        self.peak_threshold
    }

    pub fn last_peak(&self) -> Option<Peak> {
        self.last_peak
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn history(&self) -> &HistoryBuffer<Detection> {
        &self.history
    }

    /// Bins searched for symbol peaks.
    pub fn band(&self) -> Range<usize> {
        self.band.clone()
    }

    /// Forget every detection and drop any frame in progress.
    pub fn reset(&mut self) {
        self.history.clear();
        self.last_detection = None;
        self.state = FrameState::Idle;
        self.buffer.clear();
        self.last_confirmed = None;
        self.empty_ticks = 0;
        self.last_peak = None;
    }

    /// Run the pipeline over one spectrum captured at `now`.
    pub fn tick(&mut self, spectrum: &[f32], now: Duration) -> Result<TickOutcome> {
        if spectrum.len() != self.mapping.bin_count() {
            return Err(ModemError::SpectrumMismatch {
                expected: self.mapping.bin_count(),
                actual: spectrum.len(),
            });
        }

        let mut outcome = TickOutcome::default();
        self.ticks += 1;

        if self.ticks % self.health_check_interval == 0 && self.is_stuck(spectrum) {
            self.reset();
            outcome.restart_required = true;
            return Ok(outcome);
        }

        match self.detect(spectrum) {
            Some(symbol) => {
                if self.debug {
                    debug!("Transcribed symbol {:?}", symbol.to_char());
                }
                self.history.add(Detection { symbol, at: now });
                self.last_detection = Some(now);
                self.empty_ticks = 0;
            }
            None => {
                self.empty_ticks += 1;
                if self.empty_ticks >= self.separator_ticks {
                    // Silence separates tone events; the next run of the
                    // same character is a new character.
                    self.last_confirmed = None;
                }
                self.check_timeout(now);
            }
        }

        if let Some(symbol) = self.confirm() {
            self.advance_frame(symbol, &mut outcome.events);
        }

        Ok(outcome)
    }

    fn detect(&mut self, spectrum: &[f32]) -> Option<Symbol> {
        let mut best: Option<(usize, f32)> = None;
        for (bin, &magnitude) in spectrum.iter().enumerate().take(self.band.end).skip(self.band.start) {
            if magnitude.is_nan() {
                continue;
            }
            if best.map_or(true, |(_, top)| magnitude > top) {
                best = Some((bin, magnitude));
            }
        }

        self.last_peak = best.map(|(bin, magnitude)| Peak {
            bin,
            frequency: self.mapping.index_to_freq(bin),
            magnitude,
        });

        let peak = self.last_peak?;
        if peak.magnitude > self.peak_threshold {
            Some(self.table.freq_to_char(peak.frequency))
        } else {
            None
        }
    }

    fn check_timeout(&mut self, now: Duration) {
        let Some(last) = self.last_detection else {
            return;
        };
        if now.saturating_sub(last) <= self.timeout {
            return;
        }

        if self.state == FrameState::Receiving {
            debug!("Message {:?} timed out, dropping it", self.buffer);
            self.state = FrameState::Idle;
            self.buffer.clear();
        }
        self.history.clear();
        self.last_detection = None;
        self.last_confirmed = None;
    }

    /// Confirm the newest run of identical detections if it is long enough,
    /// removing it so the same tone is not matched again.
    fn confirm(&mut self) -> Option<Symbol> {
        let newest = self.history.last()?.symbol;
        let run = self
            .history
            .iter()
            .rev()
            .take_while(|detection| detection.symbol == newest)
            .count();
        if run <= self.min_run_length {
            return None;
        }
        let len = self.history.len();
        self.history.remove_range(len - run, run);
        Some(newest)
    }

    fn advance_frame(&mut self, symbol: Symbol, events: &mut Vec<ReceiverEvent>) {
        match (self.state, symbol) {
            (FrameState::Idle, Symbol::Start) => {
                info!("Frame start detected");
                self.buffer.clear();
                self.last_confirmed = None;
                self.state = FrameState::Receiving;
            }
            (FrameState::Idle, _) => {}
            (FrameState::Receiving, Symbol::Data(c)) => {
                if self.last_confirmed != Some(c) {
                    self.buffer.push(c);
                    self.last_confirmed = Some(c);
                    events.push(ReceiverEvent::Character(c));
                }
            }
            (FrameState::Receiving, Symbol::End) => {
                let message = mem::take(&mut self.buffer);
                info!("Frame complete: {message:?}");
                events.push(ReceiverEvent::Message(message));
                self.last_confirmed = None;
                self.state = FrameState::Idle;
            }
            (FrameState::Receiving, Symbol::Start) => {}
        }
    }

    fn is_stuck(&self, spectrum: &[f32]) -> bool {
        let floor = spectrum[self.band.clone()]
            .iter()
            .copied()
            .fold(f32::INFINITY, f32::min);
        if floor < STUCK_FLOOR_DB {
            warn!("In-band floor at {floor} dB, restarting receiver");
            return true;
        }

        let head = &spectrum[..spectrum.len().min(PINNED_BIN_COUNT)];
        if !head.is_empty() && head.iter().all(|&m| m == PINNED_MAGNITUDE_DB) {
            warn!(
                "First {} bins pinned at {PINNED_MAGNITUDE_DB} dB, restarting receiver",
                head.len()
            );
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f32 = 44_100.0;
    const BINS: usize = 1024;
    const FLOOR: f32 = -120.0;
    const TICK: Duration = Duration::from_millis(16);

    fn receiver_with(config: ModemConfig) -> Receiver {
        let table = Arc::new(SymbolTable::from_config(&config).unwrap());
        Receiver::new(table, BinMapping::new(SAMPLE_RATE, BINS), &config).unwrap()
    }

    fn receiver() -> Receiver {
        receiver_with(ModemConfig::default())
    }

    fn silence() -> Vec<f32> {
        vec![FLOOR; BINS]
    }

    fn spectrum_for(receiver: &Receiver, symbol: Symbol) -> Vec<f32> {
        let freq = receiver.table().char_to_freq(symbol).unwrap();
        let mut spectrum = silence();
        spectrum[receiver.mapping().freq_to_index(freq)] = -20.0;
        spectrum
    }

    /// Feed `ticks` copies of `spectrum`, returning every event.
    fn feed(receiver: &mut Receiver, spectrum: &[f32], ticks: usize, now: &mut Duration) -> Vec<ReceiverEvent> {
        let mut events = Vec::new();
        for _ in 0..ticks {
            let outcome = receiver.tick(spectrum, *now).unwrap();
            assert!(!outcome.restart_required);
            events.extend(outcome.events);
            *now += TICK;
        }
        events
    }

    #[test]
    fn test_run_confirms_once_and_is_consumed() {
        let mut rx = receiver();
        let start = spectrum_for(&rx, Symbol::Start);
        let mut now = Duration::ZERO;

        feed(&mut rx, &start, 2, &mut now);
        assert_eq!(rx.history().len(), 2);
        assert_eq!(rx.state(), FrameState::Idle);

        // Third identical detection exceeds min_run_length = 2.
        feed(&mut rx, &start, 1, &mut now);
        assert_eq!(rx.state(), FrameState::Receiving);
        assert!(rx.history().is_empty());
    }

    #[test]
    fn test_interleaved_noise_breaks_run() {
        let mut rx = receiver();
        let start = spectrum_for(&rx, Symbol::Start);
        let other = spectrum_for(&rx, Symbol::Data('q'));
        let mut now = Duration::ZERO;

        feed(&mut rx, &start, 2, &mut now);
        feed(&mut rx, &other, 1, &mut now);
        feed(&mut rx, &start, 2, &mut now);
        assert_eq!(rx.state(), FrameState::Idle);
        assert_eq!(rx.history().len(), 5);
    }

    #[test]
    fn test_frame_emits_characters_and_message() {
        let mut rx = receiver();
        let mut now = Duration::ZERO;
        let mut events = Vec::new();
        for symbol in [Symbol::Start, Symbol::Data('o'), Symbol::Data('k'), Symbol::End] {
            let spectrum = spectrum_for(&rx, symbol);
            events.extend(feed(&mut rx, &spectrum, 12, &mut now));
        }
        assert_eq!(
            events,
            vec![
                ReceiverEvent::Character('o'),
                ReceiverEvent::Character('k'),
                ReceiverEvent::Message("ok".into()),
            ]
        );
        assert_eq!(rx.state(), FrameState::Idle);
        assert_eq!(rx.buffer(), "");
    }

    #[test]
    fn test_data_outside_frame_is_ignored() {
        let mut rx = receiver();
        let mut now = Duration::ZERO;
        let x = spectrum_for(&rx, Symbol::Data('x'));
        let end = spectrum_for(&rx, Symbol::End);
        let mut events = feed(&mut rx, &x, 12, &mut now);
        events.extend(feed(&mut rx, &end, 12, &mut now));
        assert!(events.is_empty());
    }

    #[test]
    fn test_weak_peak_is_not_a_detection() {
        let mut rx = receiver();
        let mut spectrum = spectrum_for(&rx, Symbol::Start);
        let bin = rx.last_peak().map(|p| p.bin);
        assert_eq!(bin, None);
        let index = rx.mapping().freq_to_index(rx.table().freq_min());
        spectrum[index] = -70.0;

        let outcome = rx.tick(&spectrum, Duration::ZERO).unwrap();
        assert!(outcome.events.is_empty());
        assert!(rx.history().is_empty());

        let peak = rx.last_peak().unwrap();
        assert_eq!(peak.bin, index);
        assert_eq!(peak.magnitude, -70.0);
        assert_eq!(rx.peak_threshold(), -65.0);
    }

    #[test]
    fn test_out_of_band_peak_is_ignored() {
        let mut rx = receiver();
        let mut spectrum = silence();
        // A loud 1 kHz tone sits below the symbol band.
        spectrum[rx.mapping().freq_to_index(1_000.0)] = 0.0;
        spectrum[BINS - 1] = 0.0;
        rx.tick(&spectrum, Duration::ZERO).unwrap();
        assert!(rx.history().is_empty());
        assert_eq!(rx.last_peak().map(|p| p.magnitude), Some(FLOOR));
    }

    #[test]
    fn test_timeout_abandons_partial_message() {
        let mut rx = receiver();
        let mut now = Duration::ZERO;
        let mut events = Vec::new();
        for symbol in [Symbol::Start, Symbol::Data('h')] {
            let spectrum = spectrum_for(&rx, symbol);
            events.extend(feed(&mut rx, &spectrum, 12, &mut now));
        }
        assert_eq!(rx.buffer(), "h");
        assert_eq!(rx.state(), FrameState::Receiving);

        // 20 empty ticks = 320 ms, beyond the 300 ms timeout.
        events.extend(feed(&mut rx, &silence(), 20, &mut now));
        assert_eq!(rx.state(), FrameState::Idle);
        assert_eq!(rx.buffer(), "");
        assert!(rx.history().is_empty());

        let end = spectrum_for(&rx, Symbol::End);
        events.extend(feed(&mut rx, &end, 12, &mut now));
        assert_eq!(events, vec![ReceiverEvent::Character('h')]);
    }

    #[test]
    fn test_short_silence_keeps_frame() {
        let mut rx = receiver();
        let mut now = Duration::ZERO;
        let start = spectrum_for(&rx, Symbol::Start);
        feed(&mut rx, &start, 12, &mut now);
        feed(&mut rx, &silence(), 10, &mut now);
        assert_eq!(rx.state(), FrameState::Receiving);
    }

    #[test]
    fn test_repeat_needs_separator() {
        let mut rx = receiver();
        let mut now = Duration::ZERO;
        let a = spectrum_for(&rx, Symbol::Data('a'));
        let start = spectrum_for(&rx, Symbol::Start);
        let end = spectrum_for(&rx, Symbol::End);

        let mut events = feed(&mut rx, &start, 12, &mut now);
        // A long tone is one character.
        events.extend(feed(&mut rx, &a, 24, &mut now));
        // One empty tick is not a separator.
        events.extend(feed(&mut rx, &silence(), 1, &mut now));
        events.extend(feed(&mut rx, &a, 6, &mut now));
        // Two empty ticks are.
        events.extend(feed(&mut rx, &silence(), 2, &mut now));
        events.extend(feed(&mut rx, &a, 6, &mut now));
        events.extend(feed(&mut rx, &end, 12, &mut now));

        assert_eq!(events.last(), Some(&ReceiverEvent::Message("aa".into())));
    }

    #[test]
    fn test_health_check_restarts_on_collapsed_floor() {
        let config = ModemConfig {
            health_check_interval: 5,
            ..ModemConfig::default()
        };
        let mut rx = receiver_with(config);
        let mut now = Duration::ZERO;
        let start = spectrum_for(&rx, Symbol::Start);
        feed(&mut rx, &start, 4, &mut now);
        assert_eq!(rx.state(), FrameState::Receiving);

        let mut broken = silence();
        broken[rx.band().start + 3] = f32::NEG_INFINITY;
        let outcome = rx.tick(&broken, now).unwrap();
        assert!(outcome.restart_required);
        assert_eq!(rx.state(), FrameState::Idle);
        assert!(rx.history().is_empty());
    }

    #[test]
    fn test_health_check_restarts_on_pinned_bins() {
        let config = ModemConfig {
            health_check_interval: 3,
            ..ModemConfig::default()
        };
        let mut rx = receiver_with(config);
        let mut pinned = silence();
        pinned[..PINNED_BIN_COUNT].iter_mut().for_each(|m| *m = PINNED_MAGNITUDE_DB);

        assert!(!rx.tick(&pinned, Duration::ZERO).unwrap().restart_required);
        assert!(!rx.tick(&pinned, TICK).unwrap().restart_required);
        assert!(rx.tick(&pinned, TICK * 2).unwrap().restart_required);

        // A single pinned bin is not enough.
        pinned[4] = -101.0;
        assert!(!rx.tick(&pinned, TICK * 3).unwrap().restart_required);
        assert!(!rx.tick(&pinned, TICK * 4).unwrap().restart_required);
        assert!(!rx.tick(&pinned, TICK * 5).unwrap().restart_required);
    }

    #[test]
    fn test_wrong_spectrum_length_is_an_error() {
        let mut rx = receiver();
        let result = rx.tick(&[FLOOR; 16], Duration::ZERO);
        assert!(matches!(
            result,
            Err(ModemError::SpectrumMismatch { expected: BINS, actual: 16 })
        ));
        assert_eq!(rx.ticks(), 0);
    }

    #[test]
    fn test_band_must_fit_below_nyquist() {
        let config = ModemConfig::default();
        let table = Arc::new(SymbolTable::from_config(&config).unwrap());
        let result = Receiver::new(table, BinMapping::new(16_000.0, 512), &config);
        assert!(matches!(result, Err(ModemError::Configuration(_))));
    }

    #[test]
    fn test_high_sample_rate_needs_larger_fft() {
        let config = ModemConfig::default();
        let table = Arc::new(SymbolTable::from_config(&config).unwrap());
        let coarse = Receiver::new(Arc::clone(&table), BinMapping::for_fft(96_000.0, 2048), &config);
        assert!(matches!(coarse, Err(ModemError::Configuration(_))));

        let size = crate::analyser::fft_size_for(96_000.0, table.freq_step(), 2048).unwrap();
        let rx = Receiver::new(table, BinMapping::for_fft(96_000.0, size), &config);
        assert!(rx.is_ok());
    }

    #[test]
    fn test_coarse_bins_rejected() {
        let config = ModemConfig::default();
        let table = Arc::new(SymbolTable::from_config(&config).unwrap());
        let result = Receiver::new(table, BinMapping::new(48_000.0, 256), &config);
        assert!(result.is_err());
    }
}
