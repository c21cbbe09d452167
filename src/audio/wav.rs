//! WAV decoding for job inputs.

use crate::audio::AudioDecoder;
use crate::audio::buffer::{AudioBuffer, resample};
use crate::defaults::SAMPLE_RATE;
use crate::error::{Result, ScribedError};
use std::io::Cursor;

/// Decodes WAV data of any sample rate and channel count into 16kHz mono.
///
/// Integer and float sample formats are accepted. Other containers are
/// reported as unreadable; upstream media tooling is expected to convert them.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavDecoder;

impl WavDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl AudioDecoder for WavDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<AudioBuffer> {
        if bytes.is_empty() {
            return Err(ScribedError::AudioEmpty);
        }

        let mut reader =
            hound::WavReader::new(Cursor::new(bytes)).map_err(|e| ScribedError::AudioUnreadable {
                message: format!("Failed to parse WAV file: {}", e),
            })?;

        let spec = reader.spec();
        if spec.channels == 0 {
            return Err(ScribedError::AudioUnreadable {
                message: "WAV header declares zero channels".to_string(),
            });
        }

        let interleaved: Vec<i16> = match spec.sample_format {
            hound::SampleFormat::Int if spec.bits_per_sample <= 16 => reader
                .samples::<i16>()
                .collect::<std::result::Result<Vec<_>, _>>(),
            hound::SampleFormat::Int => {
                let shift = spec.bits_per_sample.saturating_sub(16);
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| (v >> shift) as i16))
                    .collect()
            }
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
                .collect(),
        }
        .map_err(|e| ScribedError::AudioUnreadable {
            message: format!("Failed to read WAV samples: {}", e),
        })?;

        let mono = downmix(&interleaved, spec.channels);
        if mono.is_empty() {
            return Err(ScribedError::AudioEmpty);
        }

        let samples = if spec.sample_rate != SAMPLE_RATE {
            resample(&mono, spec.sample_rate, SAMPLE_RATE)
        } else {
            mono
        };

        tracing::debug!(
            source_rate = spec.sample_rate,
            channels = spec.channels,
            samples = samples.len(),
            "Decoded WAV input"
        );

        Ok(AudioBuffer::new(samples, SAMPLE_RATE))
    }
}

/// Average interleaved frames down to one channel. Trailing partial frames
/// are dropped.
fn downmix(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = channels as usize;
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}
