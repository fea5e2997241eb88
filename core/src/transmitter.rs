use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::config::ModemConfig;
use crate::error::{ModemError, Result};
use crate::symbols::{Symbol, SymbolTable};
use crate::tone::{Tone, ToneScheduler};

/// Timing of one queued message on the scheduler's clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transmission {
    pub starts_at: Duration,
    pub ends_at: Duration,
    pub tone_count: usize,
}

impl Transmission {
    /// Nominal airtime. Hosts use it for a best-effort completion notice;
    /// it is not synchronized with actual playback.
    pub fn duration(&self) -> Duration {
        self.ends_at - self.starts_at
    }
}

/// Open-loop tone transmitter.
///
/// A message goes out as `[start] + characters + [end]`, one tone per
/// symbol in back-to-back slots of `char_duration`. When a symbol repeats its
/// predecessor, its tone starts `repeat_gap` into the slot so the receiver
/// hears two separate tone events.
pub struct Transmitter {
    table: Arc<SymbolTable>,
    char_duration: Duration,
    ramp_duration: Duration,
    repeat_gap: Duration,
}

impl Transmitter {
    pub fn new(table: Arc<SymbolTable>, config: &ModemConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            table,
            char_duration: config.char_duration(),
            ramp_duration: config.ramp_duration(),
            repeat_gap: config.repeat_gap(),
        })
    }

    pub fn table(&self) -> &SymbolTable {
        &self.table
    }

    pub fn char_duration(&self) -> Duration {
        self.char_duration
    }

    /// Frame a message, rejecting characters the table cannot carry.
    pub fn frame(&self, message: &str) -> Result<Vec<Symbol>> {
        let mut symbols = Vec::with_capacity(message.chars().count() + 2);
        symbols.push(Symbol::Start);
        for c in message.chars() {
            let symbol = self
                .table
                .symbol_for_char(c)
                .ok_or(ModemError::UnsupportedCharacter(c))?;
            symbols.push(symbol);
        }
        symbols.push(Symbol::End);
        Ok(symbols)
    }

    /// Tones for `message` with slot 0 starting at `now`.
    pub fn tones(&self, message: &str, now: Duration) -> Result<Vec<Tone>> {
        let symbols = self.frame(message)?;
        let mut tones = Vec::with_capacity(symbols.len());
        let mut previous = None;

        for (i, &symbol) in symbols.iter().enumerate() {
            let frequency = self
                .table
                .char_to_freq(symbol)
                .ok_or(ModemError::UnsupportedCharacter(symbol.to_char()))?;
            let slot = now + self.char_duration * i as u32;
            let (start, duration) = if previous == Some(symbol) && !self.repeat_gap.is_zero() {
                (slot + self.repeat_gap, self.char_duration - self.repeat_gap)
            } else {
                (slot, self.char_duration)
            };
            tones.push(Tone {
                frequency,
                start,
                duration,
                ramp: self.ramp_duration,
            });
            previous = Some(symbol);
        }
        Ok(tones)
    }

    /// Queue every tone of `message` on `scheduler`, starting now. Returns
    /// as soon as the tones are queued.
    pub fn send<S: ToneScheduler + ?Sized>(&self, scheduler: &mut S, message: &str) -> Result<Transmission> {
        let starts_at = scheduler.current_time();
        let tones = self.tones(message, starts_at)?;
        let tone_count = tones.len();
        for tone in tones {
            scheduler.schedule(tone)?;
        }
        debug!("Queued {tone_count} tones for {message:?}");

        Ok(Transmission {
            starts_at,
            ends_at: starts_at + self.char_duration * tone_count as u32,
            tone_count,
        })
    }
}
