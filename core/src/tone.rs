use std::f32::consts::TAU;
use std::time::Duration;

use crate::error::{ModemError, Result};

/// One enveloped pure tone on the scheduler's timeline.
///
/// The gain ramps linearly 0→1 over `ramp`, holds at 1, and ramps 1→0 over
/// the last `ramp` of `duration`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub frequency: f32,
    pub start: Duration,
    pub duration: Duration,
    pub ramp: Duration,
}

impl Tone {
    pub fn end(&self) -> Duration {
        self.start + self.duration
    }

    /// Envelope gain at absolute time `t` (seconds on the scheduler clock).
    pub fn gain_at(&self, t: f64) -> f32 {
        let start = self.start.as_secs_f64();
        let end = self.end().as_secs_f64();
        if t < start || t >= end {
            return 0.0;
        }
        let ramp = self.ramp.as_secs_f64();
        if ramp <= 0.0 {
            return 1.0;
        }
        let rise = (t - start) / ramp;
        let fall = (end - t) / ramp;
        rise.min(fall).min(1.0) as f32
    }
}

/// Output capability: schedule enveloped tones on an audio clock.
pub trait ToneScheduler {
    /// Current position of the scheduler's clock.
    fn current_time(&self) -> Duration;

    /// Fails with [`ModemError::ChannelUnavailable`] if the tone cannot be
    /// queued on the output.
    fn schedule(&mut self, tone: Tone) -> Result<()>;
}

/// Peak amplitude of rendered tones; leaves headroom below full scale.
const RENDER_AMPLITUDE: f32 = 0.5;

/// Offline scheduler that synthesizes scheduled tones into PCM samples.
///
/// The timeline starts at zero and `current_time` only moves when the caller
/// advances it, so a whole transmission can be rendered into one buffer.
pub struct ToneRenderer {
    sample_rate: u32,
    now: Duration,
    tones: Vec<Tone>,
}

impl ToneRenderer {
    pub fn new(sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(ModemError::Configuration("sample rate must be positive".into()));
        }
        Ok(Self {
            sample_rate,
            now: Duration::ZERO,
            tones: Vec::new(),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn tones(&self) -> &[Tone] {
        &self.tones
    }

    /// Move the clock forward, e.g. to leave lead-in silence.
    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    /// End of the last scheduled tone.
    pub fn end_time(&self) -> Duration {
        self.tones
            .iter()
            .map(Tone::end)
            .max()
            .unwrap_or(self.now)
    }

    /// Render every scheduled tone from time zero up to `end_time() + tail`.
    pub fn render(&self, tail: Duration) -> Vec<f32> {
        let total = (self.end_time() + tail).as_secs_f64();
        let len = (total * self.sample_rate as f64).ceil() as usize;
        let mut samples = vec![0.0f32; len];
        for tone in &self.tones {
            self.render_tone(tone, &mut samples);
        }
        samples
    }

    fn render_tone(&self, tone: &Tone, samples: &mut [f32]) {
        let rate = self.sample_rate as f64;
        let first = (tone.start.as_secs_f64() * rate).floor() as usize;
        let last = ((tone.end().as_secs_f64() * rate).ceil() as usize).min(samples.len());

        for (i, sample) in samples.iter_mut().enumerate().take(last).skip(first) {
            let t = i as f64 / rate;
            let gain = tone.gain_at(t);
            if gain == 0.0 {
                continue;
            }
            // Phase is relative to the tone start; wrapping keeps f32 precise.
            let elapsed = t - tone.start.as_secs_f64();
            let cycles = (tone.frequency as f64 * elapsed).fract() as f32;
            *sample += (TAU * cycles).sin() * gain * RENDER_AMPLITUDE;
        }
    }
}

impl ToneScheduler for ToneRenderer {
    fn current_time(&self) -> Duration {
        self.now
    }

    fn schedule(&mut self, tone: Tone) -> Result<()> {
        if !tone.frequency.is_finite() || tone.frequency <= 0.0 {
            return Err(ModemError::ChannelUnavailable(format!(
                "cannot render a {} Hz tone",
                tone.frequency
            )));
        }
        if tone.frequency >= self.sample_rate as f32 / 2.0 {
            return Err(ModemError::ChannelUnavailable(format!(
                "{} Hz is above the Nyquist limit of a {} Hz output",
                tone.frequency, self.sample_rate
            )));
        }
        self.tones.push(tone);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(start_ms: u64, duration_ms: u64) -> Tone {
        Tone {
            frequency: 1000.0,
            start: Duration::from_millis(start_ms),
            duration: Duration::from_millis(duration_ms),
            ramp: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_envelope_ramps_and_holds() {
        let tone = tone(100, 200);
        assert_eq!(tone.gain_at(0.05), 0.0);
        assert_eq!(tone.gain_at(0.1), 0.0);
        assert!((tone.gain_at(0.1005) - 0.5).abs() < 1e-3);
        assert_eq!(tone.gain_at(0.15), 1.0);
        assert_eq!(tone.gain_at(0.2985), 1.0);
        assert!((tone.gain_at(0.2995) - 0.5).abs() < 1e-3);
        assert_eq!(tone.gain_at(0.3), 0.0);
    }

    #[test]
    fn test_zero_ramp_is_rectangular() {
        let tone = Tone {
            ramp: Duration::ZERO,
            ..tone(0, 10)
        };
        assert_eq!(tone.gain_at(0.0), 1.0);
        assert_eq!(tone.gain_at(0.0099), 1.0);
        assert_eq!(tone.gain_at(0.01), 0.0);
    }

    #[test]
    fn test_render_places_tone_in_time() {
        let mut renderer = ToneRenderer::new(8000).unwrap();
        renderer.schedule(tone(100, 100)).unwrap();
        let samples = renderer.render(Duration::from_millis(100));

        assert!((2400..=2401).contains(&samples.len()));
        assert!(samples[..800].iter().all(|&s| s == 0.0));
        assert!(samples[1600..].iter().all(|&s| s == 0.0));

        let peak = samples[800..1600].iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak > 0.45 && peak <= RENDER_AMPLITUDE + 1e-6, "peak {peak}");
    }

    #[test]
    fn test_schedule_rejects_unplayable_frequency() {
        let mut renderer = ToneRenderer::new(8000).unwrap();
        let high = Tone {
            frequency: 4000.0,
            ..tone(0, 10)
        };
        assert!(matches!(
            renderer.schedule(high),
            Err(ModemError::ChannelUnavailable(_))
        ));
        assert!(renderer.tones().is_empty());
    }

    #[test]
    fn test_advance_moves_clock() {
        let mut renderer = ToneRenderer::new(8000).unwrap();
        assert_eq!(renderer.current_time(), Duration::ZERO);
        renderer.advance(Duration::from_millis(250));
        assert_eq!(renderer.current_time(), Duration::from_millis(250));
        assert_eq!(renderer.end_time(), Duration::from_millis(250));
    }
}
