use crate::defaults::SAMPLE_RATE;
use std::sync::Arc;

/// Decoded mono 16-bit PCM audio.
///
/// Samples are shared, so cloning a buffer is cheap; [`AudioBuffer::slice`]
/// copies only the requested range.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Arc<[i16]>,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate: sample_rate.max(1),
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Length of the audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Copy of the audio between `start` and `end` seconds, clamped to the
    /// buffer bounds.
    pub fn slice(&self, start: f64, end: f64) -> AudioBuffer {
        let rate = self.sample_rate as f64;
        let len = self.samples.len();
        let from = ((start.max(0.0) * rate).round() as usize).min(len);
        let to = ((end.max(0.0) * rate).round() as usize).clamp(from, len);
        AudioBuffer::new(self.samples[from..to].to_vec(), self.sample_rate)
    }

    /// The same audio at the model's sample rate.
    pub fn to_model_rate(&self) -> AudioBuffer {
        if self.sample_rate == SAMPLE_RATE {
            return self.clone();
        }
        AudioBuffer::new(
            resample(&self.samples, self.sample_rate, SAMPLE_RATE),
            SAMPLE_RATE,
        )
    }
}

/// Simple linear interpolation resampling.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = source_pos.floor() as usize;
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx.min(samples.len() - 1)]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_uses_sample_rate() {
        let buffer = AudioBuffer::new(vec![0; 48000], 16000);
        assert_eq!(buffer.duration_secs(), 3.0);
    }

    #[test]
    fn slice_copies_requested_range() {
        let samples: Vec<i16> = (0..100).collect();
        let buffer = AudioBuffer::new(samples, 10);

        let window = buffer.slice(2.0, 3.5);

        assert_eq!(window.samples().len(), 15);
        assert_eq!(window.samples()[0], 20);
        assert_eq!(window.sample_rate(), 10);
    }

    #[test]
    fn slice_clamps_past_the_end() {
        let buffer = AudioBuffer::new(vec![1; 100], 10);

        assert_eq!(buffer.slice(9.0, 30.0).duration_secs(), 1.0);
        assert!(buffer.slice(20.0, 30.0).is_empty());
    }

    #[test]
    fn to_model_rate_resamples() {
        let buffer = AudioBuffer::new(vec![0; 8000], 8000);
        let model = buffer.to_model_rate();
        assert_eq!(model.sample_rate(), SAMPLE_RATE);
        assert_eq!(model.samples().len(), 16000);
    }

    #[test]
    fn resample_identity_same_rate() {
        let samples = vec![100i16, 200, 300, 400, 500];
        assert_eq!(resample(&samples, 16000, 16000), samples);
    }

    #[test]
    fn resample_upsample_interpolates() {
        let resampled = resample(&[0i16, 1000, 2000], 8000, 16000);

        assert_eq!(resampled.len(), 6);
        assert_eq!(resampled[0], 0);
        assert!(resampled[1] > 0 && resampled[1] < 1000);
        assert_eq!(resampled[2], 1000);
    }

    #[test]
    fn resample_handles_edge_cases() {
        assert!(resample(&[], 16000, 8000).is_empty());
        assert_eq!(resample(&[100i16], 16000, 8000), vec![100]);
    }

    #[test]
    fn resample_preserves_signal_amplitude() {
        let resampled = resample(&[1000i16; 100], 16000, 8000);
        assert!(resampled.iter().all(|&s| (999..=1001).contains(&s)));
    }
}
