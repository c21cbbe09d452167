//! Audio input handling: decoding job inputs and slicing them into windows.

pub mod buffer;
pub mod wav;

pub use buffer::AudioBuffer;
pub use wav::WavDecoder;

use crate::error::Result;

/// Turns the raw bytes of a job input into mono PCM samples.
///
/// Decoding is blocking; async callers run it on the blocking pool.
pub trait AudioDecoder: Send + Sync {
    /// Decode `bytes` into a buffer.
    ///
    /// Empty audio is [`crate::ScribedError::AudioEmpty`]; anything that is not
    /// decodable is [`crate::ScribedError::AudioUnreadable`].
    fn decode(&self, bytes: &[u8]) -> Result<AudioBuffer>;
}

/// Decoder that ignores its input and hands out a fixed buffer.
///
/// Lets tests run hour-long jobs against a low sample rate buffer without
/// writing hour-long WAV files.
#[derive(Debug, Clone)]
pub struct FixedDecoder {
    buffer: AudioBuffer,
}

impl FixedDecoder {
    pub fn new(buffer: AudioBuffer) -> Self {
        Self { buffer }
    }

    /// Silent buffer of `duration_secs` at `sample_rate`.
    pub fn silence(duration_secs: f64, sample_rate: u32) -> Self {
        let len = (duration_secs * sample_rate as f64).round() as usize;
        Self::new(AudioBuffer::new(vec![0; len], sample_rate))
    }
}

impl AudioDecoder for FixedDecoder {
    fn decode(&self, _bytes: &[u8]) -> Result<AudioBuffer> {
        if self.buffer.is_empty() {
            return Err(crate::error::ScribedError::AudioEmpty);
        }
        Ok(self.buffer.clone())
    }
}
