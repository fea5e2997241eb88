// End-to-end tests with an idealized channel: the spectrum source looks up
// which scheduled tone is sounding at the current clock time and reports a
// single clean peak for it. Ticks run at 60 per second.

use std::sync::Arc;
use std::time::Duration;

use sonicnet_core::{
    BinMapping, Clock, FrameState, Listener, ManualClock, ModemConfig, ModemError, Receiver, ReceiverEvent, Result,
    SpectrumCapture, SpectrumSource, SymbolTable, Tone, ToneRenderer, ToneScheduler, Transmitter,
};

const SAMPLE_RATE: f32 = 44_100.0;
const FFT_SIZE: usize = 2048;
const NOISE_FLOOR: f32 = -120.0;
const TONE_LEVEL: f32 = -30.0;

fn tick() -> Duration {
    Duration::from_secs(1) / 60
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Clone)]
struct ScheduledChannel {
    tones: Vec<Tone>,
    mapping: BinMapping,
    clock: ManualClock,
    available: bool,
}

struct ScheduledCapture {
    channel: ScheduledChannel,
}

impl SpectrumSource for ScheduledChannel {
    type Capture = ScheduledCapture;

    fn capture(&mut self) -> Result<ScheduledCapture> {
        if !self.available {
            return Err(ModemError::DeviceUnavailable("microphone permission denied".into()));
        }
        Ok(ScheduledCapture { channel: self.clone() })
    }
}

impl SpectrumCapture for ScheduledCapture {
    fn bin_mapping(&self) -> BinMapping {
        self.channel.mapping
    }

    fn sample(&mut self, spectrum: &mut [f32]) -> Result<()> {
        spectrum.fill(NOISE_FLOOR);
        let now = self.channel.clock.now().as_secs_f64();
        for tone in &self.channel.tones {
            if tone.gain_at(now) > 0.5 {
                spectrum[self.channel.mapping.freq_to_index(tone.frequency)] = TONE_LEVEL;
            }
        }
        Ok(())
    }
}

struct Link {
    config: ModemConfig,
    table: Arc<SymbolTable>,
    clock: ManualClock,
    renderer: ToneRenderer,
}

impl Link {
    fn new(config: ModemConfig) -> Self {
        init_logging();
        let table = Arc::new(SymbolTable::from_config(&config).expect("valid table"));
        Self {
            config,
            table,
            clock: ManualClock::new(),
            renderer: ToneRenderer::new(SAMPLE_RATE as u32).expect("renderer"),
        }
    }

    fn send_at(&mut self, at: Duration, message: &str) {
        let tx = Transmitter::new(Arc::clone(&self.table), &self.config).expect("transmitter");
        let now = self.renderer.current_time();
        self.renderer.advance(at.saturating_sub(now));
        tx.send(&mut self.renderer, message).expect("send");
    }

    fn listener(&self) -> Listener<ScheduledChannel, ManualClock> {
        let mapping = BinMapping::for_fft(SAMPLE_RATE, FFT_SIZE);
        let receiver = Receiver::new(Arc::clone(&self.table), mapping, &self.config).expect("receiver");
        let channel = ScheduledChannel {
            tones: self.renderer.tones().to_vec(),
            mapping,
            clock: self.clock.clone(),
            available: true,
        };
        Listener::new(receiver, channel, self.clock.clone())
    }

    fn run_until(&self, listener: &mut Listener<ScheduledChannel, ManualClock>, until: Duration) -> Vec<ReceiverEvent> {
        let mut events = Vec::new();
        while self.clock.now() < until {
            self.clock.advance(tick());
            events.extend(listener.poll());
        }
        events
    }
}

fn messages(events: &[ReceiverEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            ReceiverEvent::Message(m) => Some(m.clone()),
            ReceiverEvent::Character(_) => None,
        })
        .collect()
}

fn characters(events: &[ReceiverEvent]) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            ReceiverEvent::Character(c) => Some(*c),
            ReceiverEvent::Message(_) => None,
        })
        .collect()
}

#[test]
fn test_hi_round_trip() {
    let mut link = Link::new(ModemConfig::default());
    link.send_at(Duration::from_millis(100), "hi");
    let mut listener = link.listener();
    let stream = listener.subscribe();
    listener.start().expect("start");

    let events = link.run_until(&mut listener, Duration::from_secs(2));
    let expected = vec![
        ReceiverEvent::Character('h'),
        ReceiverEvent::Character('i'),
        ReceiverEvent::Message("hi".into()),
    ];
    assert_eq!(events, expected);
    assert_eq!(stream.try_iter().collect::<Vec<_>>(), expected);
    assert_eq!(listener.receiver().state(), FrameState::Idle);
}

#[test]
fn test_idle_timeout_drops_partial_message() {
    let mut link = Link::new(ModemConfig::default());
    let tx = Transmitter::new(Arc::clone(&link.table), &link.config).expect("transmitter");
    // "h" without its end delimiter.
    let mut tones = tx.tones("h", Duration::from_millis(100)).expect("tones");
    tones.pop();
    for tone in tones {
        link.renderer.schedule(tone).expect("schedule");
    }

    let mut listener = link.listener();
    listener.start().expect("start");

    let events = link.run_until(&mut listener, Duration::from_millis(450));
    assert_eq!(events, vec![ReceiverEvent::Character('h')]);
    assert_eq!(listener.receiver().state(), FrameState::Receiving);

    let events = link.run_until(&mut listener, Duration::from_secs(2));
    assert!(events.is_empty(), "no message after timeout, got {events:?}");
    assert_eq!(listener.receiver().state(), FrameState::Idle);
    assert_eq!(listener.receiver().buffer(), "");
}

#[test]
fn test_receiver_recovers_after_abandoned_frame() {
    let mut link = Link::new(ModemConfig::default());
    let tx = Transmitter::new(Arc::clone(&link.table), &link.config).expect("transmitter");
    let mut tones = tx.tones("xy", Duration::from_millis(100)).expect("tones");
    tones.pop();
    for tone in tones {
        link.renderer.schedule(tone).expect("schedule");
    }
    link.send_at(Duration::from_millis(1500), "ok");

    let mut listener = link.listener();
    listener.start().expect("start");
    let events = link.run_until(&mut listener, Duration::from_secs(3));

    assert_eq!(characters(&events), "xyok");
    assert_eq!(messages(&events), vec!["ok".to_string()]);
}

#[test]
fn test_repeated_characters_are_separated() {
    let mut link = Link::new(ModemConfig::default());
    link.send_at(Duration::from_millis(100), "aabb");
    let mut listener = link.listener();
    listener.start().expect("start");

    let events = link.run_until(&mut listener, Duration::from_secs(2));
    assert_eq!(characters(&events), "aabb");
    assert_eq!(messages(&events), vec!["aabb".to_string()]);
}

#[test]
fn test_repeats_collapse_without_gap() {
    let config = ModemConfig {
        repeat_gap_ms: 0,
        ..ModemConfig::default()
    };
    let mut link = Link::new(config);
    link.send_at(Duration::from_millis(100), "aabb");
    let mut listener = link.listener();
    listener.start().expect("start");

    let events = link.run_until(&mut listener, Duration::from_secs(2));
    assert_eq!(messages(&events), vec!["ab".to_string()]);
}

#[test]
fn test_back_to_back_messages() {
    let mut link = Link::new(ModemConfig::default());
    link.send_at(Duration::from_millis(100), "one");
    link.send_at(Duration::from_millis(1500), "two 2");
    let mut listener = link.listener();
    listener.start().expect("start");

    let events = link.run_until(&mut listener, Duration::from_secs(4));
    assert_eq!(messages(&events), vec!["one".to_string(), "two 2".to_string()]);
}

#[test]
fn test_unavailable_microphone() {
    let link = Link::new(ModemConfig::default());
    let mapping = BinMapping::for_fft(SAMPLE_RATE, FFT_SIZE);
    let receiver = Receiver::new(Arc::clone(&link.table), mapping, &link.config).expect("receiver");
    let channel = ScheduledChannel {
        tones: Vec::new(),
        mapping,
        clock: link.clock.clone(),
        available: false,
    };
    let mut listener = Listener::new(receiver, channel, link.clock.clone());

    let err = listener.start().expect_err("no device");
    assert!(matches!(err, ModemError::DeviceUnavailable(_)));
    assert!(!listener.is_running());
}

#[test]
fn test_stopped_listener_misses_transmission() {
    let mut link = Link::new(ModemConfig::default());
    link.send_at(Duration::from_millis(100), "lost");
    link.send_at(Duration::from_millis(2000), "kept");
    let mut listener = link.listener();
    listener.start().expect("start");

    // Stop halfway through the first message.
    let events = link.run_until(&mut listener, Duration::from_millis(620));
    assert_eq!(characters(&events), "lo");
    listener.stop();
    let events = link.run_until(&mut listener, Duration::from_millis(1800));
    assert!(events.is_empty());

    listener.start().expect("restart");
    let events = link.run_until(&mut listener, Duration::from_secs(4));
    assert_eq!(messages(&events), vec!["kept".to_string()]);
}
