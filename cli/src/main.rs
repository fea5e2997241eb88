mod wav;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use sonicnet_core::{
    Clock, Listener, ManualClock, ModemConfig, ModemError, Receiver, ReceiverEvent, RecordingSource, Symbol,
    SymbolTable, SystemClock, ToneRenderer, Transmitter,
};
use thiserror::Error;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// Spectrum samples per second, matching a browser's display refresh.
const TICKS_PER_SECOND: u32 = 60;

/// Silence before the first tone of an encoded file.
const LEAD_IN: Duration = Duration::from_millis(200);

/// Silence after the last tone, long enough for the receiver to time out.
const TAIL: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "sonicnet")]
#[command(about = "Send short text messages over near-ultrasonic tones")]
struct Cli {
    /// JSON file with modem settings; missing fields use defaults
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Tone length per character in milliseconds
    #[arg(long, global = true, value_name = "MS")]
    char_duration: Option<u64>,

    /// Minimum peak level in dB for a detection
    #[arg(long, global = true, value_name = "DB", allow_negative_numbers = true)]
    threshold: Option<f32>,

    /// Silence before a repeated character in milliseconds (0 disables)
    #[arg(long, global = true, value_name = "MS")]
    repeat_gap: Option<u64>,

    /// More logging (-v debug, -vv also every transcribed symbol)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a message to a WAV file
    Encode {
        /// Text to send
        message: String,

        /// Output WAV file
        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,

        /// Output sample rate in Hz
        #[arg(long, default_value = "44100")]
        sample_rate: u32,
    },

    /// Decode messages from a WAV recording
    Decode {
        /// Input WAV file
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        /// Replay at real speed instead of as fast as possible
        #[arg(long)]
        realtime: bool,
    },

    /// Render a message and decode it again in memory
    Loopback {
        /// Text to send
        message: String,
    },

    /// Print the symbol to frequency table
    Table,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Modem(#[from] ModemError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Invalid config file {path}: {source}")]
    Config {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Unsupported WAV format: {0}")]
    UnsupportedFormat(String),

    #[error("No message decoded")]
    NoMessage,

    #[error("Loopback mismatch: sent {sent:?}, decoded {decoded:?}")]
    Mismatch { sent: String, decoded: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        _ => "debug",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = load_config(&cli)?;
    match cli.command {
        Commands::Encode {
            message,
            output,
            sample_rate,
        } => encode_command(&config, &message, &output, sample_rate),
        Commands::Decode { input, realtime } => decode_command(&config, &input, realtime).await,
        Commands::Loopback { message } => loopback_command(&config, &message),
        Commands::Table => table_command(&config),
    }
}

fn load_config(cli: &Cli) -> Result<ModemConfig, CliError> {
    let mut config = match &cli.config {
        Some(path) => {
            let file = std::fs::File::open(path)?;
            serde_json::from_reader(std::io::BufReader::new(file)).map_err(|source| CliError::Config {
                path: path.clone(),
                source,
            })?
        }
        None => ModemConfig::default(),
    };

    if let Some(ms) = cli.char_duration {
        config.char_duration_ms = ms;
    }
    if let Some(db) = cli.threshold {
        config.peak_threshold = db;
    }
    if let Some(ms) = cli.repeat_gap {
        config.repeat_gap_ms = ms;
    }
    if cli.verbose >= 2 {
        config.debug = true;
    }
    config.validate()?;
    debug!("Using {config:?}");
    Ok(config)
}

fn render(config: &ModemConfig, message: &str, sample_rate: u32) -> Result<Vec<f32>, CliError> {
    let table = Arc::new(SymbolTable::from_config(config)?);
    let transmitter = Transmitter::new(table, config)?;
    let mut renderer = ToneRenderer::new(sample_rate)?;
    renderer.advance(LEAD_IN);

    let transmission = transmitter.send(&mut renderer, message)?;
    info!(
        "Encoded {} tones, {:.2}s on air",
        transmission.tone_count,
        transmission.duration().as_secs_f32()
    );
    Ok(renderer.render(TAIL))
}

fn encode_command(config: &ModemConfig, message: &str, output: &Path, sample_rate: u32) -> Result<(), CliError> {
    let samples = render(config, message, sample_rate)?;
    wav::write(output, &samples, sample_rate)?;
    println!("Wrote {} samples to {}", samples.len(), output.display());
    Ok(())
}

async fn decode_command(config: &ModemConfig, input: &Path, realtime: bool) -> Result<(), CliError> {
    let recording = wav::read(input)?;
    info!(
        "Decoding {:.2}s of audio",
        recording.samples.len() as f32 / recording.sample_rate as f32
    );

    let messages = if realtime {
        let clock = SystemClock::new();
        let mut interval = tokio::time::interval(tick());
        let mut decoder = FileDecoder::new(config, recording, clock)?;
        while !decoder.finished() {
            interval.tick().await;
            decoder.step();
        }
        decoder.messages
    } else {
        let clock = ManualClock::new();
        let mut decoder = FileDecoder::new(config, recording, clock.clone())?;
        while !decoder.finished() {
            clock.advance(tick());
            decoder.step();
        }
        decoder.messages
    };

    if messages.is_empty() {
        return Err(CliError::NoMessage);
    }
    Ok(())
}

fn loopback_command(config: &ModemConfig, message: &str) -> Result<(), CliError> {
    let sample_rate = 44_100;
    let recording = wav::Recording {
        samples: render(config, message, sample_rate)?,
        sample_rate,
    };

    let clock = ManualClock::new();
    let mut decoder = FileDecoder::new(config, recording, clock.clone())?;
    while !decoder.finished() {
        clock.advance(tick());
        decoder.step();
    }

    match decoder.messages.first() {
        Some(decoded) if decoded == message => Ok(()),
        Some(decoded) => Err(CliError::Mismatch {
            sent: message.to_string(),
            decoded: decoded.clone(),
        }),
        None => Err(CliError::NoMessage),
    }
}

fn table_command(config: &ModemConfig) -> Result<(), CliError> {
    let table = SymbolTable::from_config(config)?;
    for (symbol, frequency) in table.frequencies() {
        let label = match symbol {
            Symbol::Start => "start".to_string(),
            Symbol::End => "end".to_string(),
            Symbol::Data(' ') => "space".to_string(),
            Symbol::Data(c) => c.to_string(),
        };
        println!("{label:>6}  {frequency:.1} Hz");
    }
    Ok(())
}

fn tick() -> Duration {
    Duration::from_secs(1) / TICKS_PER_SECOND
}

/// Replays a recording into a listener and prints what it hears.
struct FileDecoder<C: Clock + Clone> {
    listener: Listener<RecordingSource<C>, C>,
    clock: C,
    end: Duration,
    messages: Vec<String>,
}

impl<C: Clock + Clone> FileDecoder<C> {
    fn new(config: &ModemConfig, recording: wav::Recording, clock: C) -> Result<Self, CliError> {
        let table = Arc::new(SymbolTable::from_config(config)?);
        let source = RecordingSource::new(recording.samples, recording.sample_rate, clock.clone());
        let end = clock.now() + source.duration();
        let receiver = Receiver::new(table, source.bin_mapping(), config)?;
        let mut listener = Listener::new(receiver, source, clock.clone());
        listener.start()?;
        Ok(Self {
            listener,
            clock,
            end,
            messages: Vec::new(),
        })
    }

    fn finished(&self) -> bool {
        self.clock.now() >= self.end
    }

    fn step(&mut self) {
        let mut stdout = std::io::stdout();
        for event in self.listener.poll() {
            match event {
                ReceiverEvent::Character(c) => {
                    print!("{c}");
                    stdout.flush().ok();
                }
                ReceiverEvent::Message(message) => {
                    println!();
                    println!("message: {message}");
                    self.messages.push(message);
                }
            }
        }
    }
}
