use std::sync::mpsc::{self, Receiver as EventStream, Sender};

use log::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{ModemError, Result};
use crate::receiver::{Receiver, ReceiverEvent};
use crate::spectrum::{SpectrumCapture, SpectrumSource};

/// Drives a [`Receiver`] from a spectrum source.
///
/// The host calls [`poll`](Listener::poll) once per display frame (or on any
/// periodic timer). Each poll samples the capture, runs one receiver tick and
/// hands the resulting events to every subscriber. When the receiver asks for
/// a restart the capture is dropped and reopened from the source.
pub struct Listener<S: SpectrumSource, C: Clock> {
    receiver: Receiver,
    source: S,
    clock: C,
    capture: Option<S::Capture>,
    spectrum: Vec<f32>,
    subscribers: Vec<Sender<ReceiverEvent>>,
    running: bool,
    restarts: u64,
    failed_reopens: u64,
}

impl<S: SpectrumSource, C: Clock> Listener<S, C> {
    pub fn new(receiver: Receiver, source: S, clock: C) -> Self {
        let spectrum = vec![0.0; receiver.mapping().bin_count()];
        Self {
            receiver,
            source,
            clock,
            capture: None,
            spectrum,
            subscribers: Vec::new(),
            running: false,
            restarts: 0,
            failed_reopens: 0,
        }
    }

    /// Open the capture and start listening. A no-op if already running.
    pub fn start(&mut self) -> Result<()> {
        if self.running {
            return Ok(());
        }
        self.capture = Some(self.open_capture()?);
        self.running = true;
        info!("Listening on {} bins", self.spectrum.len());
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Events from every future poll are also sent to the returned stream.
    /// Dropping the stream unsubscribes it.
    pub fn subscribe(&mut self) -> EventStream<ReceiverEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Run one tick. Returns the events it produced, which are also
    /// delivered to subscribers. Does nothing while stopped.
    pub fn poll(&mut self) -> Vec<ReceiverEvent> {
        if !self.running {
            return Vec::new();
        }

        let Some(capture) = self.capture.as_mut() else {
            self.reopen();
            return Vec::new();
        };
        if let Err(e) = capture.sample(&mut self.spectrum) {
            warn!("Spectrum capture failed: {e}");
            return Vec::new();
        }

        let outcome = match self.receiver.tick(&self.spectrum, self.clock.now()) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Receiver tick failed: {e}");
                return Vec::new();
            }
        };

        if outcome.restart_required {
            warn!("Spectrum looks stuck, restarting capture");
            self.capture = None;
            self.restarts += 1;
            self.reopen();
        }

        if !outcome.events.is_empty() {
            self.subscribers
                .retain(|subscriber| outcome.events.iter().all(|event| subscriber.send(event.clone()).is_ok()));
        }
        outcome.events
    }

    /// Release the capture and drop any partial message. Idempotent.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.capture = None;
        self.receiver.reset();
        self.running = false;
        self.failed_reopens = 0;
        info!("Stopped listening");
    }

    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    /// Number of times a stuck capture was rebuilt.
    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    /// Consecutive failed attempts to reopen the capture since the last
    /// success.
    pub fn failed_reopens(&self) -> u64 {
        self.failed_reopens
    }

    fn reopen(&mut self) {
        match self.open_capture() {
            Ok(capture) => {
                if self.failed_reopens > 0 {
                    info!("Capture reopened after {} failed attempts", self.failed_reopens);
                }
                self.failed_reopens = 0;
                self.capture = Some(capture);
            }
            Err(e) => {
                self.failed_reopens += 1;
                // Only the first failure of a streak is worth a warning.
                if self.failed_reopens == 1 {
                    warn!("Could not reopen capture, retrying every poll: {e}");
                } else {
                    debug!("Reopen attempt {} failed: {e}", self.failed_reopens);
                }
            }
        }
    }

    fn open_capture(&mut self) -> Result<S::Capture> {
        let capture = self.source.capture()?;
        let mapping = capture.bin_mapping();
        if mapping != self.receiver.mapping() {
            return Err(ModemError::Configuration(format!(
                "capture delivers {} bins at {} Hz, receiver expects {} bins at {} Hz",
                mapping.bin_count(),
                mapping.sample_rate(),
                self.receiver.mapping().bin_count(),
                self.receiver.mapping().sample_rate()
            )));
        }
        Ok(capture)
    }
}

impl<S: SpectrumSource, C: Clock> Drop for Listener<S, C> {
    fn drop(&mut self) {
        self.stop();
    }
}
