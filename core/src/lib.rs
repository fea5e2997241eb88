//! Tone-per-character acoustic modem
//!
//! A message is sent as a framed run of pure tones in a narrow near-ultrasonic
//! band, one frequency per character. The receiver finds the dominant in-band
//! peak of each spectrum it is handed, debounces the detections and
//! reassembles the frame.
//!
//! The crate owns no audio I/O. Hosts plug in a [`ToneScheduler`] for output
//! and a [`SpectrumSource`] for input; [`ToneRenderer`] and
//! [`SpectrumAnalyser`] are offline implementations of both.

pub mod analyser;
pub mod clock;
pub mod config;
pub mod error;
pub mod history;
pub mod listener;
pub mod receiver;
pub mod recording;
pub mod spectrum;
pub mod symbols;
pub mod tone;
pub mod transmitter;

pub use analyser::SpectrumAnalyser;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ModemConfig;
pub use error::{ModemError, Result};
pub use history::HistoryBuffer;
pub use listener::Listener;
pub use receiver::{FrameState, Peak, Receiver, ReceiverEvent, TickOutcome};
pub use recording::RecordingSource;
pub use spectrum::{BinMapping, SpectrumCapture, SpectrumSource};
pub use symbols::{Symbol, SymbolTable};
pub use tone::{Tone, ToneRenderer, ToneScheduler};
pub use transmitter::{Transmission, Transmitter};
