use std::collections::HashSet;
use std::fmt;

use crate::error::{ModemError, Result};

/// One transmittable unit: a frame delimiter or a character of the alphabet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Symbol {
    Start,
    End,
    Data(char),
}

impl Symbol {
    /// Textual form of the start-of-frame delimiter.
    pub const START_CHAR: char = '^';
    /// Textual form of the end-of-frame delimiter.
    pub const END_CHAR: char = '$';

    pub fn is_delimiter(&self) -> bool {
        !matches!(self, Symbol::Data(_))
    }

    pub fn to_char(self) -> char {
        match self {
            Symbol::Start => Self::START_CHAR,
            Symbol::End => Self::END_CHAR,
            Symbol::Data(c) => c,
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_char())
    }
}

/// Bidirectional character ↔ frequency mapping.
///
/// Slot layout, with `n` characters in the alphabet:
/// - slot 0 at `freq_min`: start delimiter
/// - slots 1..=n: alphabet characters in order
/// - slot n+1: end delimiter
///
/// Every slot is `freq_step` Hz apart, so the table spans
/// `[freq_min, freq_min + freq_step * (n + 1)]` and the delimiters sit at the
/// two extremes where they cannot collide with data symbols.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolTable {
    alphabet: Vec<char>,
    freq_min: f32,
    freq_step: f32,
}

impl SymbolTable {
    pub fn new(alphabet: &str, freq_min: f32, freq_step: f32) -> Result<Self> {
        if !freq_step.is_finite() || freq_step <= 0.0 {
            return Err(ModemError::Configuration(format!(
                "frequency step must be positive, got {freq_step}"
            )));
        }
        if !freq_min.is_finite() || freq_min <= 0.0 {
            return Err(ModemError::Configuration(format!(
                "minimum frequency must be positive, got {freq_min}"
            )));
        }

        let alphabet: Vec<char> = alphabet.chars().collect();
        if alphabet.is_empty() {
            return Err(ModemError::Configuration("alphabet is empty".into()));
        }

        let mut seen = HashSet::with_capacity(alphabet.len());
        for &c in &alphabet {
            if c == Symbol::START_CHAR || c == Symbol::END_CHAR {
                return Err(ModemError::Configuration(format!(
                    "alphabet may not contain the delimiter {c:?}"
                )));
            }
            if !seen.insert(c) {
                return Err(ModemError::Configuration(format!(
                    "alphabet contains {c:?} more than once"
                )));
            }
        }

        let table = Self {
            alphabet,
            freq_min,
            freq_step,
        };
        if !table.freq_max().is_finite() {
            return Err(ModemError::Configuration(
                "frequency plan overflows".into(),
            ));
        }
        Ok(table)
    }

    pub fn from_config(config: &crate::ModemConfig) -> Result<Self> {
        Self::new(&config.alphabet, config.freq_min, config.freq_step)
    }

    pub fn freq_min(&self) -> f32 {
        self.freq_min
    }

    pub fn freq_step(&self) -> f32 {
        self.freq_step
    }

    /// Frequency of the end delimiter, the highest slot.
    pub fn freq_max(&self) -> f32 {
        self.slot_freq(self.slot_count() - 1)
    }

    /// Alphabet characters plus both delimiters.
    pub fn slot_count(&self) -> usize {
        self.alphabet.len() + 2
    }

    pub fn alphabet(&self) -> &[char] {
        &self.alphabet
    }

    pub fn contains(&self, c: char) -> bool {
        self.alphabet.contains(&c)
    }

    /// Map a message character to its symbol, if the alphabet carries it.
    pub fn symbol_for_char(&self, c: char) -> Option<Symbol> {
        self.contains(c).then_some(Symbol::Data(c))
    }

    /// Frequency assigned to a symbol. Characters outside the alphabet have
    /// no slot and yield `None`.
    pub fn char_to_freq(&self, symbol: Symbol) -> Option<f32> {
        let slot = match symbol {
            Symbol::Start => 0,
            Symbol::End => self.slot_count() - 1,
            Symbol::Data(c) => self.alphabet.iter().position(|&a| a == c)? + 1,
        };
        Some(self.slot_freq(slot))
    }

    /// Symbol whose slot is nearest to `freq`. Frequencies outside the table
    /// clamp to the closest delimiter.
    pub fn freq_to_char(&self, freq: f32) -> Symbol {
        let last = self.slot_count() - 1;
        let position = ((freq - self.freq_min) / self.freq_step).round();
        let slot = if position.is_nan() || position <= 0.0 {
            0
        } else {
            (position as usize).min(last)
        };
        self.slot_symbol(slot)
    }

    /// Every `(symbol, frequency)` pair from the lowest slot to the highest.
    pub fn frequencies(&self) -> impl Iterator<Item = (Symbol, f32)> + '_ {
        (0..self.slot_count()).map(|slot| (self.slot_symbol(slot), self.slot_freq(slot)))
    }

    fn slot_freq(&self, slot: usize) -> f32 {
        self.freq_min + self.freq_step * slot as f32
    }

    fn slot_symbol(&self, slot: usize) -> Symbol {
        if slot == 0 {
            Symbol::Start
        } else if slot > self.alphabet.len() {
            Symbol::End
        } else {
            Symbol::Data(self.alphabet[slot - 1])
        }
    }
}
