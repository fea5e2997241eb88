use std::sync::Arc;
use std::time::Duration;

use js_sys::{Array, Function, Object, Promise, Reflect};
use log::{Level, LevelFilter, Log, Metadata, Record};
use sonicnet_core::analyser::{fft_size_for, DEFAULT_FFT_SIZE};
use sonicnet_core::{
    BinMapping, Clock, FrameState, Listener, ModemConfig, ModemError, Receiver, ReceiverEvent, SpectrumCapture,
    SpectrumSource, SymbolTable, Tone, ToneScheduler, Transmitter,
};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    AnalyserNode, AudioContext, AudioContextState, AudioNode, AudioScheduledSourceNode, MediaStream,
    MediaStreamAudioSourceNode, MediaStreamConstraints, MediaStreamTrack,
};

/// Browser capture processing that would filter out or level the tones.
const RAW_CAPTURE: [(&str, bool); 3] = [
    ("echoCancellation", false),
    ("noiseSuppression", false),
    ("autoGainControl", false),
];

/// A context created outside a user gesture starts suspended and has to be
/// resumed before it plays or analyses anything.
fn needs_resume(state: AudioContextState) -> bool {
    state == AudioContextState::Suspended
}

/// Hand every event to `deliver`, even after one fails, and report the
/// first failure.
fn dispatch<E>(
    events: Vec<ReceiverEvent>,
    mut deliver: impl FnMut(&ReceiverEvent) -> Result<(), E>,
) -> Result<(), E> {
    let mut first_error = None;
    for event in &events {
        if let Err(e) = deliver(event) {
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

fn to_js(e: ModemError) -> JsValue {
    JsValue::from_str(&e.to_string())
}

fn describe(value: &JsValue) -> String {
    value.as_string().unwrap_or_else(|| format!("{value:?}"))
}

/// Routes the core's log records to the browser console.
struct ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = JsValue::from_str(&format!("[{}] {}", record.target(), record.args()));
        match record.level() {
            Level::Error => web_sys::console::error_1(&line),
            Level::Warn => web_sys::console::warn_1(&line),
            Level::Info => web_sys::console::info_1(&line),
            Level::Debug | Level::Trace => web_sys::console::debug_1(&line),
        }
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger;

#[wasm_bindgen(start)]
pub fn init() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Info);
    }
}

/// Ask the user for microphone access.
#[wasm_bindgen(js_name = requestMicrophone)]
pub async fn request_microphone() -> Result<MediaStream, JsValue> {
    let window = web_sys::window().ok_or_else(|| JsValue::from_str("no window"))?;
    let devices = window.navigator().media_devices()?;
    let audio = Object::new();
    for (key, enabled) in RAW_CAPTURE {
        Reflect::set(&audio, &JsValue::from_str(key), &JsValue::from_bool(enabled))?;
    }
    let constraints = MediaStreamConstraints::new();
    constraints.set_audio(&audio);
    let stream = JsFuture::from(devices.get_user_media_with_constraints(&constraints)?).await?;
    stream.dyn_into::<MediaStream>()
}

/// Tone output on an `AudioContext`: one oscillator and gain node per tone.
pub struct WebAudioEngine {
    ctx: AudioContext,
}

impl WebAudioEngine {
    pub fn new(ctx: AudioContext) -> Self {
        Self { ctx }
    }

    /// Resume a suspended context. The promise settles once audio runs.
    fn resume(&self) -> Result<Promise, JsValue> {
        if needs_resume(self.ctx.state()) {
            self.ctx.resume()
        } else {
            Ok(Promise::resolve(&JsValue::UNDEFINED))
        }
    }

    fn queue(&self, tone: &Tone) -> Result<(), JsValue> {
        let start = tone.start.as_secs_f64();
        let end = tone.end().as_secs_f64();
        let ramp = tone.ramp.as_secs_f64();

        let oscillator = self.ctx.create_oscillator()?;
        oscillator.frequency().set_value(tone.frequency);

        let gain = self.ctx.create_gain()?;
        let envelope = gain.gain();
        envelope.set_value_at_time(0.0, start)?;
        envelope.linear_ramp_to_value_at_time(1.0, start + ramp)?;
        envelope.set_value_at_time(1.0, end - ramp)?;
        envelope.linear_ramp_to_value_at_time(0.0, end)?;

        oscillator.connect_with_audio_node(&gain)?;
        gain.connect_with_audio_node(&self.ctx.destination())?;

        let source: &AudioScheduledSourceNode = &oscillator;
        source.start_with_when(start)?;
        source.stop_with_when(end)?;
        Ok(())
    }
}

impl ToneScheduler for WebAudioEngine {
    fn current_time(&self) -> Duration {
        Duration::from_secs_f64(self.ctx.current_time().max(0.0))
    }

    fn schedule(&mut self, tone: Tone) -> sonicnet_core::Result<()> {
        self.queue(&tone)
            .map_err(|e| ModemError::ChannelUnavailable(describe(&e)))
    }
}

/// Reads detection time off the audio context.
#[derive(Clone)]
pub struct AudioClock {
    ctx: AudioContext,
}

impl Clock for AudioClock {
    fn now(&self) -> Duration {
        Duration::from_secs_f64(self.ctx.current_time().max(0.0))
    }
}

/// A granted microphone stream. Each capture builds a fresh
/// stream source and analyser on top of it; dropping the source stops the
/// microphone tracks.
pub struct MicrophoneSource {
    ctx: AudioContext,
    stream: MediaStream,
    fft_size: usize,
}

impl MicrophoneSource {
    /// Pick the smallest analyser size at least as large as the default
    /// whose bins are finer than `freq_step` at the context's sample rate.
    pub fn new(ctx: AudioContext, stream: MediaStream, freq_step: f32) -> Result<Self, ModemError> {
        let sample_rate = ctx.sample_rate();
        let fft_size = fft_size_for(sample_rate, freq_step, DEFAULT_FFT_SIZE).ok_or_else(|| {
            ModemError::Configuration(format!(
                "no analyser size resolves {freq_step} Hz steps at {sample_rate} Hz"
            ))
        })?;
        Ok(Self { ctx, stream, fft_size })
    }

    pub fn bin_mapping(&self) -> BinMapping {
        BinMapping::for_fft(self.ctx.sample_rate(), self.fft_size)
    }

    fn build(&self) -> Result<AnalyserCapture, JsValue> {
        let input = self.ctx.create_media_stream_source(&self.stream)?;
        let analyser = self.ctx.create_analyser()?;
        analyser.set_fft_size(self.fft_size as u32);
        analyser.set_smoothing_time_constant(0.0);
        input.connect_with_audio_node(&analyser)?;
        Ok(AnalyserCapture {
            mapping: self.bin_mapping(),
            input,
            analyser,
        })
    }
}

impl SpectrumSource for MicrophoneSource {
    type Capture = AnalyserCapture;

    fn capture(&mut self) -> sonicnet_core::Result<AnalyserCapture> {
        self.build()
            .map_err(|e| ModemError::DeviceUnavailable(describe(&e)))
    }
}

impl Drop for MicrophoneSource {
    fn drop(&mut self) {
        let tracks: Array = self.stream.get_tracks();
        for track in tracks.iter() {
            if let Ok(track) = track.dyn_into::<MediaStreamTrack>() {
                track.stop();
            }
        }
    }
}

pub struct AnalyserCapture {
    mapping: BinMapping,
    input: MediaStreamAudioSourceNode,
    analyser: AnalyserNode,
}

impl SpectrumCapture for AnalyserCapture {
    fn bin_mapping(&self) -> BinMapping {
        self.mapping
    }

    fn sample(&mut self, spectrum: &mut [f32]) -> sonicnet_core::Result<()> {
        let bins = self.analyser.frequency_bin_count() as usize;
        if spectrum.len() != bins {
            return Err(ModemError::SpectrumMismatch {
                expected: bins,
                actual: spectrum.len(),
            });
        }
        self.analyser.get_float_frequency_data(spectrum);
        Ok(())
    }
}

impl Drop for AnalyserCapture {
    fn drop(&mut self) {
        let input: &AudioNode = &self.input;
        input.disconnect().ok();
    }
}

/// Browser-facing modem. Call `poll()` once per animation frame while
/// listening; decoded characters and messages arrive through the callbacks.
#[wasm_bindgen]
pub struct SonicModem {
    config: ModemConfig,
    table: Arc<SymbolTable>,
    transmitter: Transmitter,
    engine: WebAudioEngine,
    listener: Option<Listener<MicrophoneSource, AudioClock>>,
    on_character: Option<Function>,
    on_message: Option<Function>,
}

#[wasm_bindgen]
impl SonicModem {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Result<SonicModem, JsValue> {
        Self::with_config(ModemConfig::default())
    }

    /// Build a modem from a JSON object of settings; missing fields use
    /// defaults.
    #[wasm_bindgen(js_name = fromConfigJson)]
    pub fn from_config_json(json: &str) -> Result<SonicModem, JsValue> {
        let config: ModemConfig = serde_json::from_str(json).map_err(|e| JsValue::from_str(&e.to_string()))?;
        Self::with_config(config)
    }

    fn with_config(config: ModemConfig) -> Result<SonicModem, JsValue> {
        let table = Arc::new(SymbolTable::from_config(&config).map_err(to_js)?);
        let transmitter = Transmitter::new(Arc::clone(&table), &config).map_err(to_js)?;
        let ctx = AudioContext::new()?;
        Ok(SonicModem {
            config,
            table,
            transmitter,
            engine: WebAudioEngine::new(ctx),
            listener: None,
            on_character: None,
            on_message: None,
        })
    }

    #[wasm_bindgen(js_name = setOnCharacter)]
    pub fn set_on_character(&mut self, callback: Option<Function>) {
        self.on_character = callback;
    }

    #[wasm_bindgen(js_name = setOnMessage)]
    pub fn set_on_message(&mut self, callback: Option<Function>) {
        self.on_message = callback;
    }

    /// Resume the audio context. Call from a user gesture when the page
    /// starts without one; `send` and `startListening` also try.
    pub fn resume(&self) -> Result<Promise, JsValue> {
        self.engine.resume()
    }

    /// Queue every tone of `message`. The returned promise resolves once the
    /// nominal airtime has elapsed.
    pub fn send(&mut self, message: &str) -> Result<Promise, JsValue> {
        self.engine.resume()?;
        let transmission = self.transmitter.send(&mut self.engine, message).map_err(to_js)?;
        let millis = transmission.duration().as_millis() as i32;
        Ok(Promise::new(&mut |resolve, _reject| {
            let scheduled = web_sys::window().map(|window| {
                window.set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, millis)
            });
            if !matches!(scheduled, Some(Ok(_))) {
                resolve.call0(&JsValue::NULL).ok();
            }
        }))
    }

    /// Start decoding from a stream returned by `requestMicrophone()`.
    #[wasm_bindgen(js_name = startListening)]
    pub fn start_listening(&mut self, stream: MediaStream) -> Result<(), JsValue> {
        self.stop_listening();
        self.engine.resume()?;
        let ctx = self.engine.ctx.clone();
        let source = MicrophoneSource::new(ctx.clone(), stream, self.table.freq_step()).map_err(to_js)?;
        let receiver = Receiver::new(Arc::clone(&self.table), source.bin_mapping(), &self.config).map_err(to_js)?;
        let mut listener = Listener::new(receiver, source, AudioClock { ctx });
        listener.start().map_err(to_js)?;
        self.listener = Some(listener);
        Ok(())
    }

    /// Stop decoding and release the microphone.
    #[wasm_bindgen(js_name = stopListening)]
    pub fn stop_listening(&mut self) {
        self.listener = None;
    }

    #[wasm_bindgen(js_name = isListening)]
    pub fn is_listening(&self) -> bool {
        self.listener.as_ref().is_some_and(|l| l.is_running())
    }

    /// Run one receiver tick and dispatch its events to the callbacks.
    pub fn poll(&mut self) -> Result<(), JsValue> {
        let Some(listener) = self.listener.as_mut() else {
            return Ok(());
        };
        let (on_character, on_message) = (&self.on_character, &self.on_message);
        dispatch(listener.poll(), |event| {
            let (callback, arg) = match event {
                ReceiverEvent::Character(c) => (on_character, c.to_string()),
                ReceiverEvent::Message(message) => (on_message, message.clone()),
            };
            match callback {
                Some(callback) => callback.call1(&JsValue::NULL, &JsValue::from_str(&arg)).map(drop),
                None => Ok(()),
            }
        })
    }

    /// "idle" or "receiving".
    pub fn state(&self) -> String {
        let state = self.listener.as_ref().map(|l| l.receiver().state());
        match state {
            Some(FrameState::Receiving) => "receiving".into(),
            _ => "idle".into(),
        }
    }

    /// Characters received so far in the current frame.
    pub fn buffer(&self) -> String {
        self.listener
            .as_ref()
            .map(|l| l.receiver().buffer().to_string())
            .unwrap_or_default()
    }

    #[wasm_bindgen(js_name = peakFrequency)]
    pub fn peak_frequency(&self) -> Option<f32> {
        self.listener.as_ref()?.receiver().last_peak().map(|p| p.frequency)
    }

    #[wasm_bindgen(js_name = peakMagnitude)]
    pub fn peak_magnitude(&self) -> Option<f32> {
        self.listener.as_ref()?.receiver().last_peak().map(|p| p.magnitude)
    }

    #[wasm_bindgen(js_name = peakThreshold)]
    pub fn peak_threshold(&self) -> f32 {
        self.config.peak_threshold
    }
}
