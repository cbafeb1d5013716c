use std::io::Cursor;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

/// Mono float samples in [-1, 1] as produced by the model libraries.
#[derive(Clone, Debug, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn to_base64_wav(&self) -> Result<String> {
        encode_wav_base64(&self.samples, self.sample_rate)
    }
}

pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    anyhow::ensure!(sample_rate > 0, "sample rate must be positive");

    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    // 44 byte header + 2 bytes per sample
    let mut buffer = Vec::with_capacity(44 + samples.len() * 2);

    {
        let mut cursor = Cursor::new(&mut buffer);
        let mut writer = WavWriter::new(&mut cursor, spec).context("failed to start WAV stream")?;
        for &sample in samples {
            let clamped = if sample.is_finite() {
                sample.clamp(-1.0, 1.0)
            } else {
                0.0
            };
            writer.write_sample((clamped * i16::MAX as f32) as i16)?;
        }
        writer.finalize().context("failed to finalize WAV stream")?;
    }

    Ok(buffer)
}

pub fn encode_wav_base64(samples: &[f32], sample_rate: u32) -> Result<String> {
    let wav = encode_wav(samples, sample_rate)?;
    Ok(BASE64.encode(wav))
}

/// Inverse of [`encode_wav_base64`]; samples come back quantized to 16 bits.
pub fn decode_wav_base64(encoded: &str) -> Result<Waveform> {
    let bytes = BASE64
        .decode(encoded.as_bytes())
        .context("audio payload is not valid base64")?;
    let mut reader = WavReader::new(Cursor::new(bytes)).context("audio payload is not a WAV")?;
    let spec = reader.spec();
    let samples = reader
        .samples::<i16>()
        .map(|sample| sample.map(|value| value as f32 / i16::MAX as f32))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Waveform::new(samples, spec.sample_rate))
}
