use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::CliError;

/// Mono audio at a known sample rate.
pub struct Recording {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Write mono samples as 16-bit PCM.
pub fn write(path: &Path, samples: &[f32], sample_rate: u32) -> Result<(), CliError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        writer.write_sample((clamped * i16::MAX as f32) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Read a WAV file, mixing all channels down to mono.
pub fn read(path: &Path) -> Result<Recording, CliError> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    tracing::debug!(
        "Read WAV: {} Hz, {} channels, {} bits",
        spec.sample_rate,
        spec.channels,
        spec.bits_per_sample
    );

    let interleaved = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        (SampleFormat::Int, bits @ 1..=32) => int_samples(&mut reader, bits)?,
        (format, bits) => {
            return Err(CliError::UnsupportedFormat(format!("{bits}-bit {format:?}")));
        }
    };

    let channels = usize::from(spec.channels.max(1));
    let samples = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    Ok(Recording {
        samples,
        sample_rate: spec.sample_rate,
    })
}

fn int_samples(reader: &mut WavReader<BufReader<File>>, bits: u16) -> Result<Vec<f32>, CliError> {
    let scale = 1.0 / (1u64 << (bits - 1)) as f32;
    let samples = reader
        .samples::<i32>()
        .map(|s| s.map(|v| v as f32 * scale))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read_mono() {
        let path = std::env::temp_dir().join(format!("sonicnet-wav-{}.wav", std::process::id()));
        let samples: Vec<f32> = (0..480).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        write(&path, &samples, 48_000).unwrap();

        let recording = read(&path).unwrap();
        assert_eq!(recording.sample_rate, 48_000);
        assert_eq!(recording.samples.len(), 480);
        assert!((recording.samples[0] - 0.5).abs() < 1e-3);
        assert!((recording.samples[1] + 0.5).abs() < 1e-3);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_stereo_is_mixed_down() {
        let path = std::env::temp_dir().join(format!("sonicnet-stereo-{}.wav", std::process::id()));
        let spec = WavSpec {
            channels: 2,
            sample_rate: 8_000,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for _ in 0..10 {
            writer.write_sample(0.25f32).unwrap();
            writer.write_sample(0.75f32).unwrap();
        }
        writer.finalize().unwrap();

        let recording = read(&path).unwrap();
        assert_eq!(recording.samples, vec![0.5; 10]);
        std::fs::remove_file(&path).ok();
    }
}
